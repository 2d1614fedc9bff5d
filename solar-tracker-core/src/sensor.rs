/// Raw ADC sample.
pub type Reading = u16;

/// Full scale of the 12-bit converter.
pub const ADC_MAX: Reading = 4095;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorChannel {
    LeftLdr,
    RightLdr,
    PanelVoltage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorFault {
    /// The conversion on this channel failed
    Unavailable(SensorChannel),
    /// The converter returned a value above its full scale
    OutOfRange { channel: SensorChannel, value: u16 },
}

impl core::fmt::Display for SensorFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SensorFault::Unavailable(channel) => write!(f, "{:?} conversion failed", channel),
            SensorFault::OutOfRange { channel, value } => {
                write!(f, "{:?} reading {} out of range", channel, value)
            }
        }
    }
}

/// One synchronized sample of the three channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorFrame {
    pub left: Reading,
    pub right: Reading,
    pub aux: Reading,
}

impl SensorFrame {
    pub fn checked(left: u16, right: u16, aux: u16) -> Result<Self, SensorFault> {
        let channels = [
            (SensorChannel::LeftLdr, left),
            (SensorChannel::RightLdr, right),
            (SensorChannel::PanelVoltage, aux),
        ];
        for (channel, value) in channels {
            if value > ADC_MAX {
                return Err(SensorFault::OutOfRange { channel, value });
            }
        }
        Ok(Self { left, right, aux })
    }
}

pub trait SensorReader {
    fn read_all(&mut self) -> Result<SensorFrame, SensorFault>;
}
