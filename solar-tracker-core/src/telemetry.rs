use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::TelemetryConfig;
use crate::sensor::{Reading, SensorFrame};

/// Size of the serialized telemetry frame.
pub const PAYLOAD_CAPACITY: usize = 128;

pub type PayloadBytes = heapless::Vec<u8, PAYLOAD_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryError {
    /// Serialized payload does not fit in the frame buffer
    Overflow,
}

impl core::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TelemetryError::Overflow => write!(f, "Telemetry payload exceeds {} bytes", PAYLOAD_CAPACITY),
        }
    }
}

/// Flat label → reading map, serialized as a JSON object.
///
/// Built fresh every cycle and consumed by [`TelemetryPayload::into_json`].
#[derive(Debug, PartialEq, Eq)]
pub struct TelemetryPayload<'a> {
    fields: [(&'a str, Reading); 3],
}

pub fn build_payload<'a>(
    left: Reading,
    right: Reading,
    aux: Reading,
    label_left: &'a str,
    label_right: &'a str,
    label_aux: &'a str,
) -> TelemetryPayload<'a> {
    TelemetryPayload {
        fields: [(label_left, left), (label_right, right), (label_aux, aux)],
    }
}

impl<'a> TelemetryPayload<'a> {
    pub fn from_frame(frame: &SensorFrame, config: &'a TelemetryConfig) -> Self {
        build_payload(
            frame.left,
            frame.right,
            frame.aux,
            config.label_left,
            config.label_right,
            config.label_aux,
        )
    }

    pub fn get(&self, label: &str) -> Option<Reading> {
        self.fields
            .iter()
            .find(|(name, _)| *name == label)
            .map(|(_, value)| *value)
    }

    pub fn into_json(self) -> Result<PayloadBytes, TelemetryError> {
        serde_json_core::to_vec::<_, PAYLOAD_CAPACITY>(&self).map_err(|_| TelemetryError::Overflow)
    }
}

impl Serialize for TelemetryPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (label, value) in &self.fields {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Triple {
        a: u16,
        b: u16,
        c: u16,
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct PanelTelemetry {
        ldr_izqdo: u16,
        ldr_dcho: u16,
        placa_movil: u16,
    }

    #[test]
    fn test_payload_round_trip() {
        let json = build_payload(10, 20, 30, "a", "b", "c").into_json().unwrap();
        assert_eq!(json.as_slice(), br#"{"a":10,"b":20,"c":30}"#);

        let (triple, _): (Triple, usize) = serde_json_core::from_slice(&json).unwrap();
        assert_eq!(triple, Triple { a: 10, b: 20, c: 30 });
    }

    #[test]
    fn test_payload_from_frame_uses_configured_labels() {
        let config = TelemetryConfig::default();
        let frame = SensorFrame {
            left: 1200,
            right: 1340,
            aux: 2500,
        };
        let payload = TelemetryPayload::from_frame(&frame, &config);
        assert_eq!(payload.get("ldr_dcho"), Some(1340));
        assert_eq!(payload.get("missing"), None);

        let json = payload.into_json().unwrap();
        let (decoded, _): (PanelTelemetry, usize) = serde_json_core::from_slice(&json).unwrap();
        assert_eq!(
            decoded,
            PanelTelemetry {
                ldr_izqdo: 1200,
                ldr_dcho: 1340,
                placa_movil: 2500
            }
        );
    }

    #[test]
    fn test_payload_extremes() {
        let json = build_payload(0, 4095, 0, "l", "r", "x").into_json().unwrap();
        assert_eq!(json.as_slice(), br#"{"l":0,"r":4095,"x":0}"#);
    }

    #[test]
    fn test_oversized_labels_overflow() {
        let long = "a_very_long_label_that_keeps_going_and_going_and_going";
        let payload = build_payload(1, 2, 3, long, long, long);
        assert_eq!(payload.into_json(), Err(TelemetryError::Overflow));
    }
}
