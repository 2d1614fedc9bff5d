//! Tracker configuration.
//!
//! Every tunable of the control loop lives here and is handed to the
//! controller and scheduler at construction.

use crate::sensor::{Reading, ADC_MAX};
use crate::transport::Qos;

/// Basis points in 100%.
pub const BASIS_POINTS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Darkness threshold above the converter range
    ThresholdOutOfRange(Reading),
    /// Tolerance of 100% or more
    ToleranceOutOfRange(u16),
    /// A correction pass must be allowed at least one step
    ZeroStepBound,
    /// Telemetry topic or label is empty
    EmptyField,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::ThresholdOutOfRange(value) => {
                write!(f, "Darkness threshold {} exceeds ADC range", value)
            }
            ConfigError::ToleranceOutOfRange(bp) => write!(f, "Tolerance of {} bp out of range", bp),
            ConfigError::ZeroStepBound => write!(f, "Correction step bound must be non-zero"),
            ConfigError::EmptyField => write!(f, "Telemetry topic and labels must be non-empty"),
        }
    }
}

/// Telemetry publishing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryConfig {
    pub topic: &'static str,
    pub label_left: &'static str,
    pub label_right: &'static str,
    pub label_aux: &'static str,
    pub qos: Qos,
    pub retain: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            topic: "v1/devices/me/telemetry",
            label_left: "ldr_izqdo",
            label_right: "ldr_dcho",
            label_aux: "placa_movil",
            qos: Qos::AtLeastOnce,
            retain: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackerConfig {
    /// Correction is skipped only when both LDRs read at or above this value
    pub dark_threshold: Reading,
    /// Lower tolerance around the reference reading, in basis points
    pub tolerance_below_bp: u16,
    /// Upper tolerance around the reference reading, in basis points
    pub tolerance_above_bp: u16,
    /// Motor steps allowed in one correction pass before giving up
    pub max_correction_steps: u32,
    /// Settle time between a motor step and the next sample
    pub step_interval_ms: u32,
    /// Delay after a correction pass
    pub tracking_delay_ms: u32,
    /// Delay when no correction was needed
    pub idle_delay_ms: u32,
    /// Delay after telemetry, before the next cycle
    pub cycle_delay_ms: u32,
    pub telemetry: TelemetryConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            dark_threshold: 3400,
            tolerance_below_bp: 150,
            tolerance_above_bp: 150,
            max_correction_steps: 400,
            step_interval_ms: 10,
            tracking_delay_ms: 100,
            idle_delay_ms: 1000,
            cycle_delay_ms: 2000,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dark_threshold > ADC_MAX {
            return Err(ConfigError::ThresholdOutOfRange(self.dark_threshold));
        }
        for bp in [self.tolerance_below_bp, self.tolerance_above_bp] {
            if bp as u32 >= BASIS_POINTS {
                return Err(ConfigError::ToleranceOutOfRange(bp));
            }
        }
        if self.max_correction_steps == 0 {
            return Err(ConfigError::ZeroStepBound);
        }
        let telemetry = &self.telemetry;
        let fields = [
            telemetry.topic,
            telemetry.label_left,
            telemetry.label_right,
            telemetry.label_aux,
        ];
        if fields.iter().any(|field| field.is_empty()) {
            return Err(ConfigError::EmptyField);
        }
        Ok(())
    }
}
