/// Rotation to apply to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorError {
    /// GPIO pin operation failed
    GpioError,
}

impl core::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ActuatorError::GpioError => write!(f, "GPIO pin operation failed"),
        }
    }
}

/// Motor that rotates the panel one step at a time.
///
/// `step` is async so the motor pulse suspends the caller instead of spinning.
#[allow(async_fn_in_trait)]
pub trait PanelActuator {
    async fn step(&mut self, direction: Direction) -> Result<(), ActuatorError>;

    /// Leave the motor unpowered once a correction pass is over.
    fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}
