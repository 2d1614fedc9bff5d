use core::sync::atomic::{AtomicBool, Ordering};

use defmt::*;
use embassy_executor::Spawner;
use embassy_futures::select::{self, Either};
use embassy_net::{Ipv4Address, Stack};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::String;
use mountain_mqtt::client::{Client, ClientError, ConnectionSettings, EventHandlerError};
use mountain_mqtt::data::quality_of_service::QualityOfService;
use mountain_mqtt::mqtt_manager::{ConnectionId, MqttOperations};
use mountain_mqtt::packets::publish::ApplicationMessage;
use mountain_mqtt_embassy::mqtt_manager::{self, FromApplicationMessage, MqttEvent, Settings};
use solar_tracker_core::telemetry::PayloadBytes;
use solar_tracker_core::{MessageId, Qos, TelemetryTransport, TransportError};
use static_cell::StaticCell;

use crate::tracker::events::TrackerEvents;
use crate::utils::channels::{ActionPub, ActionSub};
use crate::utils::protocol::Presence;
use crate::utils::topics::DEVICE_ATTRIBUTES_TOPIC;

/// Set once the broker session is stable, cleared on disconnect.
static MQTT_CONNECTED: AtomicBool = AtomicBool::new(false);

pub fn is_connected() -> bool {
    MQTT_CONNECTED.load(Ordering::Relaxed)
}

#[derive(Clone)]
pub enum MqttAction {
    Announce { connection_id: ConnectionId, presence: Presence },
    Action(TrackerMqttAction),
}

impl MqttOperations for MqttAction {
    async fn perform<'a, 'b, C>(
        &'b mut self,
        client: &mut C,
        client_id: &'a str,
        current_connection_id: ConnectionId,
        is_retry: bool,
    ) -> Result<(), ClientError>
    where
        C: Client<'a>,
    {
        match self {
            // Specific to one connection, not retried
            Self::Announce {
                connection_id,
                presence,
            } => {
                if connection_id == &current_connection_id && !is_retry {
                    let Ok(payload) = serde_json_core::to_string::<_, 96>(&*presence) else {
                        error!("Presence does not fit the announce buffer, skipping announce");
                        return Ok(());
                    };
                    client
                        .publish(
                            DEVICE_ATTRIBUTES_TOPIC,
                            payload.as_bytes(),
                            QualityOfService::Qos1,
                            false,
                        )
                        .await?;
                }
            }
            // Actions are sent on any connection, and retried
            Self::Action(action) => {
                action
                    .perform(client, client_id, current_connection_id, is_retry)
                    .await?;
            }
        }
        Ok(())
    }
}

#[embassy_executor::task]
async fn mqtt_channel_task(
    stack: Stack<'static>,
    client_id: &'static str,
    access_token: &'static str,
    event_sender: Sender<'static, NoopRawMutex, MqttEvent<TrackerEvents>, 32>,
    action_receiver: Receiver<'static, NoopRawMutex, MqttAction, 32>,
    host: Ipv4Address,
    port: u16,
) -> ! {
    let settings = Settings::new(host, port);
    // ThingsBoard authenticates devices by access token passed as the username
    let connection_settings = ConnectionSettings::authenticated(client_id, access_token, &[]);

    mqtt_manager::run::<MqttAction, TrackerEvents, 16, 4096, 32>(
        stack,
        connection_settings,
        settings,
        event_sender,
        action_receiver,
    )
    .await
}

#[embassy_executor::task]
async fn mqtt_task(
    mut actions_in: ActionSub,
    actions_out: Sender<'static, NoopRawMutex, MqttAction, 32>,
    events_in: Receiver<'static, NoopRawMutex, MqttEvent<TrackerEvents>, 32>,
    presence: Presence,
) -> ! {
    loop {
        let next = select::select(actions_in.next_message_pure(), events_in.receive()).await;
        match next {
            Either::First(action) => {
                // Always leave space free for the announce action sent on connect.
                // If we have to drop telemetry, do so rather than blocking
                if actions_out.free_capacity() > 8 {
                    if actions_out.try_send(MqttAction::Action(action)).is_err() {
                        warn!("MQTT action queue full, dropping telemetry");
                    }
                } else {
                    warn!("MQTT action queue saturated, dropping telemetry");
                }
            }
            Either::Second(event) => match event {
                MqttEvent::ApplicationEvent {
                    connection_id: _,
                    event: TrackerEvents::Downlink { topic },
                } => {
                    info!("Ignoring downlink on {}", topic.as_str());
                }
                MqttEvent::Connected { connection_id } => {
                    actions_out
                        .send(MqttAction::Announce {
                            connection_id,
                            presence: presence.clone(),
                        })
                        .await
                }
                MqttEvent::ConnectionStable { .. } => {
                    info!("MQTT connection stable");
                    MQTT_CONNECTED.store(true, Ordering::Relaxed);
                }
                MqttEvent::Disconnected { .. } => {
                    info!("MQTT disconnected");
                    MQTT_CONNECTED.store(false, Ordering::Relaxed);
                }
                event => {
                    info!("{:?}", event);
                }
            },
        }
    }
}

static MQTT_ACTION_CHANNEL_CELL: StaticCell<Channel<NoopRawMutex, MqttAction, 32>> = StaticCell::new();
static MQTT_EVENT_CHANNEL_CELL: StaticCell<Channel<NoopRawMutex, MqttEvent<TrackerEvents>, 32>> = StaticCell::new();

pub async fn init(
    spawner: &Spawner,
    stack: Stack<'static>,
    client_id: &'static str,
    access_token: &'static str,
    action_sub: ActionSub,
    presence: Presence,
    host: Ipv4Address,
    port: u16,
) {
    let mqtt_action_channel = MQTT_ACTION_CHANNEL_CELL.init(Channel::<NoopRawMutex, MqttAction, 32>::new());
    let mqtt_event_channel =
        MQTT_EVENT_CHANNEL_CELL.init(Channel::<NoopRawMutex, MqttEvent<TrackerEvents>, 32>::new());

    unwrap!(spawner.spawn(mqtt_channel_task(
        stack,
        client_id,
        access_token,
        mqtt_event_channel.sender(),
        mqtt_action_channel.receiver(),
        host,
        port
    )));

    unwrap!(spawner.spawn(mqtt_task(
        action_sub,
        mqtt_action_channel.sender(),
        mqtt_event_channel.receiver(),
        presence,
    )));
}

impl<const P: usize> FromApplicationMessage<P> for TrackerEvents {
    fn from_application_message(
        message: &ApplicationMessage<P>,
    ) -> Result<Self, EventHandlerError> {
        info!("Received message on {}: {}", message.topic_name, message.payload);
        let topic = String::try_from(message.topic_name)
            .map_err(|_| EventHandlerError::UnexpectedApplicationMessageTopic)?;
        Ok(TrackerEvents::Downlink { topic })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerMqttAction {
    Telemetry {
        id: MessageId,
        topic: String<64>,
        payload: PayloadBytes,
        qos: Qos,
        retain: bool,
    },
}

fn quality_of_service(qos: Qos) -> QualityOfService {
    match qos {
        Qos::AtMostOnce => QualityOfService::Qos0,
        Qos::AtLeastOnce => QualityOfService::Qos1,
        Qos::ExactlyOnce => QualityOfService::Qos2,
    }
}

impl MqttOperations for TrackerMqttAction {
    async fn perform<'a, 'b, C>(
        &'b mut self,
        client: &mut C,
        _client_id: &'a str,
        _connection_id: ConnectionId,
        _is_retry: bool,
    ) -> Result<(), ClientError>
    where
        C: Client<'a>,
    {
        match self {
            TrackerMqttAction::Telemetry {
                id,
                topic,
                payload,
                qos,
                retain,
            } => {
                info!("Publishing telemetry {}: {=[u8]:a}", id, payload.as_slice());
                client
                    .publish(topic.as_str(), payload.as_slice(), quality_of_service(*qos), *retain)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Hands telemetry frames to the MQTT task without waiting on the network.
pub struct MqttTelemetryTransport {
    actions: ActionPub,
    next_id: MessageId,
}

impl MqttTelemetryTransport {
    pub fn new(actions: ActionPub) -> Self {
        Self {
            actions,
            next_id: 0,
        }
    }
}

impl TelemetryTransport for MqttTelemetryTransport {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<MessageId, TransportError> {
        if !is_connected() {
            return Err(TransportError::Disconnected);
        }
        let topic = String::try_from(topic).map_err(|_| TransportError::TopicTooLong)?;
        let payload =
            PayloadBytes::from_slice(payload).map_err(|_| TransportError::PayloadTooLarge)?;

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.actions
            .try_publish(TrackerMqttAction::Telemetry {
                id,
                topic,
                payload,
                qos,
                retain,
            })
            .map_err(|_| TransportError::QueueFull)?;
        Ok(id)
    }
}
