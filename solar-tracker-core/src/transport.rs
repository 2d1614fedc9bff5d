/// Identifier handed back by the transport for a queued publish.
pub type MessageId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Outgoing queue is full, message dropped
    QueueFull,
    /// Payload does not fit the outgoing message buffer
    PayloadTooLarge,
    /// Topic does not fit the outgoing message buffer
    TopicTooLong,
    /// No broker session
    Disconnected,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::QueueFull => write!(f, "Outgoing queue full"),
            TransportError::PayloadTooLarge => write!(f, "Payload too large"),
            TransportError::TopicTooLong => write!(f, "Topic too long"),
            TransportError::Disconnected => write!(f, "Not connected to broker"),
        }
    }
}

/// Publish side of the telemetry link.
#[allow(async_fn_in_trait)]
pub trait TelemetryTransport {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<MessageId, TransportError>;
}
