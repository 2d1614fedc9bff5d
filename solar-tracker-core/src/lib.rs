//! Hardware-agnostic core of the solar tracker firmware.
//!
//! The panel is oriented by comparing two LDR readings and stepping a motor
//! until they balance, then a telemetry frame is published. Hardware and
//! network access come in through the [`sensor::SensorReader`],
//! [`actuator::PanelActuator`] and [`transport::TelemetryTransport`] traits so
//! the control logic runs unchanged on the host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod actuator;
pub mod alignment;
pub mod config;
pub mod h_bridge;
pub mod scheduler;
pub mod sensor;
pub mod telemetry;
pub mod transport;

pub use actuator::{ActuatorError, Direction, PanelActuator};
pub use alignment::{
    select_direction, within_band, AlignmentController, AlignmentOutcome, Correction, CorrectionStep,
    Decision, ToleranceBand,
};
pub use config::{ConfigError, TelemetryConfig, TrackerConfig};
pub use h_bridge::HBridge;
pub use scheduler::{CycleReport, CycleScheduler, CycleState, PublishError};
pub use sensor::{Reading, SensorChannel, SensorFault, SensorFrame, SensorReader, ADC_MAX};
pub use telemetry::{build_payload, PayloadBytes, TelemetryError, TelemetryPayload};
pub use transport::{MessageId, Qos, TelemetryTransport, TransportError};
