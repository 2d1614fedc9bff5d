use esp_hal::analog::adc::{Adc, AdcChannel, AdcPin};
use esp_hal::peripherals::ADC1;
use esp_hal::Blocking;
use solar_tracker_core::{SensorChannel, SensorFault, SensorFrame, SensorReader};

type Adc1<'d> = Adc<'d, ADC1<'d>, Blocking>;

/// Samples both LDRs and the panel voltage divider on ADC1.
pub struct AdcSensorsManager<'d, L, R, P>
where
    L: AdcChannel,
    R: AdcChannel,
    P: AdcChannel,
{
    adc: Adc1<'d>,
    left_ldr: AdcPin<L, ADC1<'d>>,
    right_ldr: AdcPin<R, ADC1<'d>>,
    panel: AdcPin<P, ADC1<'d>>,
}

impl<'d, L, R, P> AdcSensorsManager<'d, L, R, P>
where
    L: AdcChannel,
    R: AdcChannel,
    P: AdcChannel,
{
    pub fn new(
        adc: Adc1<'d>,
        left_ldr: AdcPin<L, ADC1<'d>>,
        right_ldr: AdcPin<R, ADC1<'d>>,
        panel: AdcPin<P, ADC1<'d>>,
    ) -> Self {
        Self {
            adc,
            left_ldr,
            right_ldr,
            panel,
        }
    }
}

fn read_channel<'d, PIN: AdcChannel>(
    adc: &mut Adc1<'d>,
    pin: &mut AdcPin<PIN, ADC1<'d>>,
    channel: SensorChannel,
) -> Result<u16, SensorFault> {
    nb::block!(adc.read_oneshot(pin)).map_err(|_| SensorFault::Unavailable(channel))
}

impl<L, R, P> SensorReader for AdcSensorsManager<'_, L, R, P>
where
    L: AdcChannel,
    R: AdcChannel,
    P: AdcChannel,
{
    fn read_all(&mut self) -> Result<SensorFrame, SensorFault> {
        let left = read_channel(&mut self.adc, &mut self.left_ldr, SensorChannel::LeftLdr)?;
        let right = read_channel(&mut self.adc, &mut self.right_ldr, SensorChannel::RightLdr)?;
        let panel = read_channel(&mut self.adc, &mut self.panel, SensorChannel::PanelVoltage)?;
        SensorFrame::checked(left, right, panel)
    }
}
