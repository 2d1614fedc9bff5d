//! Tracking loop: read → align or idle → publish → wait.

use embedded_hal_async::delay::DelayNs;

use crate::actuator::{Direction, PanelActuator};
use crate::alignment::{AlignmentController, AlignmentOutcome, CorrectionStep, Decision};
use crate::config::{ConfigError, TrackerConfig};
use crate::sensor::{SensorFrame, SensorReader};
use crate::telemetry::{TelemetryError, TelemetryPayload};
use crate::transport::{MessageId, TelemetryTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleState {
    Idle,
    Tracking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    Encode(TelemetryError),
    Transport(TransportError),
}

impl core::fmt::Display for PublishError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PublishError::Encode(e) => write!(f, "Encoding failed: {}", e),
            PublishError::Transport(e) => write!(f, "Transport failed: {}", e),
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    pub state: CycleState,
    pub outcome: AlignmentOutcome,
    /// Last frame read in the cycle, `None` when the sensors failed
    pub frame: Option<SensorFrame>,
    /// `None` when telemetry was skipped
    pub publish: Option<Result<MessageId, PublishError>>,
}

pub struct CycleScheduler<S, A, T, D>
where
    S: SensorReader,
    A: PanelActuator,
    T: TelemetryTransport,
    D: DelayNs,
{
    config: TrackerConfig,
    controller: AlignmentController,
    sensors: S,
    actuator: A,
    transport: T,
    delay: D,
    state: CycleState,
    cycles: u32,
}

impl<S, A, T, D> CycleScheduler<S, A, T, D>
where
    S: SensorReader,
    A: PanelActuator,
    T: TelemetryTransport,
    D: DelayNs,
{
    pub fn new(
        config: TrackerConfig,
        sensors: S,
        actuator: A,
        transport: T,
        delay: D,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            controller: AlignmentController::new(&config),
            config,
            sensors,
            actuator,
            transport,
            delay,
            state: CycleState::Idle,
            cycles: 0,
        })
    }

    /// State the loop is left in after the last cycle.
    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub async fn run(&mut self) -> ! {
        info!("Starting tracking loop");
        loop {
            let report = self.run_cycle().await;
            debug!("Cycle {} finished: {:?}", self.cycles, report.outcome);
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles = self.cycles.wrapping_add(1);

        let frame = match self.sensors.read_all() {
            Ok(frame) => frame,
            Err(fault) => {
                warn!("Sensor read failed, skipping telemetry: {:?}", fault);
                self.state = CycleState::Idle;
                self.delay.delay_ms(self.config.idle_delay_ms).await;
                self.delay.delay_ms(self.config.cycle_delay_ms).await;
                return CycleReport {
                    state: CycleState::Idle,
                    outcome: AlignmentOutcome::SensorFault(fault),
                    frame: None,
                    publish: None,
                };
            }
        };
        info!(
            "Panel: {}, left LDR: {}, right LDR: {}",
            frame.aux,
            frame.left,
            frame.right
        );

        let (state, outcome, latest) = match self.controller.decide(frame.left, frame.right) {
            Decision::Idle => {
                self.state = CycleState::Idle;
                (CycleState::Idle, AlignmentOutcome::Idle, Some(frame))
            }
            Decision::Track(direction) => {
                self.state = CycleState::Tracking;
                let (outcome, latest) = self.correct(direction, frame).await;
                if let AlignmentOutcome::Aligned { .. } = outcome {
                    self.state = CycleState::Idle;
                }
                (CycleState::Tracking, outcome, latest)
            }
        };

        let settle_ms = match (state, latest) {
            (CycleState::Tracking, Some(_)) => self.config.tracking_delay_ms,
            _ => self.config.idle_delay_ms,
        };
        self.delay.delay_ms(settle_ms).await;

        let publish = match latest {
            Some(frame) => {
                let result = self.publish(&frame).await;
                match result {
                    Ok(id) => debug!("Telemetry queued, id={}", id),
                    Err(e) => error!("Telemetry dropped: {:?}", e),
                }
                Some(result)
            }
            None => None,
        };

        self.delay.delay_ms(self.config.cycle_delay_ms).await;

        CycleReport {
            state,
            outcome,
            frame: latest,
            publish,
        }
    }

    /// Step the motor until the moving side settles, the step bound is hit or
    /// a collaborator fails. Returns the outcome and the last good frame.
    async fn correct(
        &mut self,
        direction: Direction,
        mut frame: SensorFrame,
    ) -> (AlignmentOutcome, Option<SensorFrame>) {
        let mut correction = self.controller.begin(direction);

        let result = loop {
            match correction.poll(&frame) {
                CorrectionStep::Settled { steps } => {
                    match direction {
                        Direction::Left => info!("Turned left, {} steps", steps),
                        Direction::Right => info!("Turned right, {} steps", steps),
                    }
                    break (AlignmentOutcome::Aligned { direction, steps }, Some(frame));
                }
                CorrectionStep::TimedOut { steps } => {
                    warn!(
                        "Correction did not settle after {} steps (left {}, right {})",
                        steps,
                        frame.left,
                        frame.right
                    );
                    break (
                        AlignmentOutcome::CorrectionTimeout { direction, steps },
                        Some(frame),
                    );
                }
                CorrectionStep::Actuate(direction) => {
                    if let Err(error) = self.actuator.step(direction).await {
                        error!("Motor step failed: {:?}", error);
                        break (
                            AlignmentOutcome::ActuatorFault {
                                direction,
                                steps: correction.steps(),
                                error,
                            },
                            Some(frame),
                        );
                    }
                    self.delay.delay_ms(self.config.step_interval_ms).await;
                    match self.sensors.read_all() {
                        Ok(next) => frame = next,
                        Err(fault) => {
                            warn!("Sensor read failed during correction: {:?}", fault);
                            break (AlignmentOutcome::SensorFault(fault), None);
                        }
                    }
                }
            }
        };

        if let Err(error) = self.actuator.release() {
            error!("Failed to release panel motor: {:?}", error);
        }
        result
    }

    async fn publish(&mut self, frame: &SensorFrame) -> Result<MessageId, PublishError> {
        let telemetry = &self.config.telemetry;
        let payload = TelemetryPayload::from_frame(frame, telemetry)
            .into_json()
            .map_err(PublishError::Encode)?;
        self.transport
            .publish(telemetry.topic, &payload, telemetry.qos, telemetry.retain)
            .await
            .map_err(PublishError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorError;
    use crate::sensor::{SensorChannel, SensorFault};
    use crate::transport::Qos;
    use crate::h_bridge::{HBridge, DEFAULT_PULSE_MS};
    use core::cell::RefCell;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::string::String;
    use std::vec::Vec;

    /// Replays scripted frames, repeating the last one once exhausted.
    struct ScriptedSensors {
        script: VecDeque<Result<SensorFrame, SensorFault>>,
        last: Result<SensorFrame, SensorFault>,
        reads: usize,
    }

    impl ScriptedSensors {
        fn new(script: &[Result<SensorFrame, SensorFault>]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                last: script[0],
                reads: 0,
            }
        }

        fn frames(frames: &[(u16, u16, u16)]) -> Self {
            let script: Vec<_> = frames
                .iter()
                .map(|&(left, right, aux)| Ok(SensorFrame { left, right, aux }))
                .collect();
            Self::new(&script)
        }
    }

    impl SensorReader for ScriptedSensors {
        fn read_all(&mut self) -> Result<SensorFrame, SensorFault> {
            self.reads += 1;
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            self.last
        }
    }

    #[derive(Default)]
    struct RecordingActuator {
        steps: Vec<Direction>,
        releases: usize,
        fail: bool,
    }

    impl PanelActuator for RecordingActuator {
        async fn step(&mut self, direction: Direction) -> Result<(), ActuatorError> {
            if self.fail {
                return Err(ActuatorError::GpioError);
            }
            self.steps.push(direction);
            Ok(())
        }

        fn release(&mut self) -> Result<(), ActuatorError> {
            self.releases += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        published: Vec<(String, Vec<u8>, Qos, bool)>,
        fail: Option<TransportError>,
    }

    impl TelemetryTransport for RecordingTransport {
        async fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: Qos,
            retain: bool,
        ) -> Result<MessageId, TransportError> {
            if let Some(e) = self.fail {
                return Err(e);
            }
            self.published
                .push((topic.into(), payload.to_vec(), qos, retain));
            Ok(self.published.len() as MessageId)
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        waits_ms: Vec<u32>,
    }

    impl DelayNs for RecordingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.waits_ms.push(ns / 1_000_000);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.waits_ms.push(ms);
        }
    }

    type TestScheduler =
        CycleScheduler<ScriptedSensors, RecordingActuator, RecordingTransport, RecordingDelay>;

    fn scheduler(config: TrackerConfig, sensors: ScriptedSensors) -> TestScheduler {
        CycleScheduler::new(
            config,
            sensors,
            RecordingActuator::default(),
            RecordingTransport::default(),
            RecordingDelay::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_idle_cycle_publishes_and_waits_long() {
        let mut s = scheduler(
            TrackerConfig::default(),
            ScriptedSensors::frames(&[(3500, 3600, 2000)]),
        );
        let report = block_on(s.run_cycle());

        assert_eq!(report.state, CycleState::Idle);
        assert_eq!(report.outcome, AlignmentOutcome::Idle);
        assert_eq!(report.publish, Some(Ok(1)));
        assert!(s.actuator.steps.is_empty());
        assert_eq!(s.actuator.releases, 0);
        assert_eq!(s.delay.waits_ms, vec![1000, 2000]);

        let (topic, payload, qos, retain) = &s.transport.published[0];
        assert_eq!(topic, "v1/devices/me/telemetry");
        assert_eq!(
            payload.as_slice(),
            br#"{"ldr_izqdo":3500,"ldr_dcho":3600,"placa_movil":2000}"#
        );
        assert_eq!(*qos, Qos::AtLeastOnce);
        assert!(!retain);
    }

    #[test]
    fn test_tracking_cycle_steps_until_balanced() {
        let mut s = scheduler(
            TrackerConfig::default(),
            ScriptedSensors::frames(&[
                (3000, 4000, 100),
                (3500, 4000, 110),
                (3990, 4000, 120),
            ]),
        );
        let report = block_on(s.run_cycle());

        assert_eq!(report.state, CycleState::Tracking);
        assert_eq!(
            report.outcome,
            AlignmentOutcome::Aligned {
                direction: Direction::Left,
                steps: 2
            }
        );
        assert_eq!(s.actuator.steps, vec![Direction::Left, Direction::Left]);
        assert_eq!(s.actuator.releases, 1);
        assert_eq!(s.state(), CycleState::Idle);
        // Two settle waits, the short tracking delay, then the cycle delay
        assert_eq!(s.delay.waits_ms, vec![10, 10, 100, 2000]);
        assert_eq!(
            report.frame,
            Some(SensorFrame {
                left: 3990,
                right: 4000,
                aux: 120
            })
        );
        assert_eq!(
            s.transport.published[0].1.as_slice(),
            br#"{"ldr_izqdo":3990,"ldr_dcho":4000,"placa_movil":120}"#
        );
    }

    #[test]
    fn test_in_band_pair_issues_no_steps() {
        let mut s = scheduler(
            TrackerConfig::default(),
            ScriptedSensors::frames(&[(3000, 3000, 0)]),
        );
        for _ in 0..5 {
            block_on(s.actuator.step(Direction::Left)).unwrap();
        }
        let report = block_on(s.run_cycle());

        assert_eq!(
            report.outcome,
            AlignmentOutcome::Aligned {
                direction: Direction::Right,
                steps: 0
            }
        );
        assert_eq!(s.actuator.steps.len(), 5);
        assert_eq!(s.sensors.reads, 1);
    }

    #[test]
    fn test_non_converging_pair_times_out() {
        let mut config = TrackerConfig::default();
        config.max_correction_steps = 25;
        let mut s = scheduler(config, ScriptedSensors::frames(&[(3000, 3300, 0)]));
        let report = block_on(s.run_cycle());

        assert_eq!(
            report.outcome,
            AlignmentOutcome::CorrectionTimeout {
                direction: Direction::Left,
                steps: 25
            }
        );
        assert_eq!(s.actuator.steps.len(), 25);
        assert_eq!(s.actuator.releases, 1);
        assert_eq!(s.state(), CycleState::Tracking);
        // Telemetry still goes out
        assert_eq!(s.transport.published.len(), 1);
    }

    #[test]
    fn test_sensor_fault_skips_telemetry() {
        let fault = SensorFault::Unavailable(SensorChannel::LeftLdr);
        let mut s = scheduler(TrackerConfig::default(), ScriptedSensors::new(&[Err(fault)]));
        let report = block_on(s.run_cycle());

        assert_eq!(report.outcome, AlignmentOutcome::SensorFault(fault));
        assert_eq!(report.publish, None);
        assert!(s.transport.published.is_empty());
        assert_eq!(s.delay.waits_ms, vec![1000, 2000]);
    }

    #[test]
    fn test_sensor_fault_during_correction() {
        let fault = SensorFault::Unavailable(SensorChannel::RightLdr);
        let sensors = ScriptedSensors::new(&[
            Ok(SensorFrame {
                left: 1000,
                right: 2000,
                aux: 0,
            }),
            Err(fault),
        ]);
        let mut s = scheduler(TrackerConfig::default(), sensors);
        let report = block_on(s.run_cycle());

        assert_eq!(report.state, CycleState::Tracking);
        assert_eq!(report.outcome, AlignmentOutcome::SensorFault(fault));
        assert_eq!(report.frame, None);
        assert!(s.transport.published.is_empty());
        assert_eq!(s.actuator.releases, 1);
        assert_eq!(s.delay.waits_ms, vec![10, 1000, 2000]);
    }

    #[test]
    fn test_actuator_fault_is_reported() {
        let mut s = scheduler(
            TrackerConfig::default(),
            ScriptedSensors::frames(&[(4000, 1000, 0)]),
        );
        s.actuator.fail = true;
        let report = block_on(s.run_cycle());

        assert_eq!(
            report.outcome,
            AlignmentOutcome::ActuatorFault {
                direction: Direction::Right,
                steps: 1,
                error: ActuatorError::GpioError
            }
        );
        assert_eq!(s.transport.published.len(), 1);
    }

    #[test]
    fn test_transport_failure_is_not_fatal() {
        let mut s = scheduler(
            TrackerConfig::default(),
            ScriptedSensors::frames(&[(3500, 3600, 0)]),
        );
        s.transport.fail = Some(TransportError::QueueFull);

        let report = block_on(s.run_cycle());
        assert_eq!(
            report.publish,
            Some(Err(PublishError::Transport(TransportError::QueueFull)))
        );

        s.transport.fail = None;
        let report = block_on(s.run_cycle());
        assert_eq!(report.publish, Some(Ok(1)));
        assert_eq!(s.cycles(), 2);
    }

    struct NullPin;

    impl embedded_hal::digital::ErrorType for NullPin {
        type Error = Infallible;
    }

    impl embedded_hal::digital::OutputPin for NullPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// Async delay that yields once per wait and logs it on a shared timeline.
    #[derive(Clone, Default)]
    struct YieldingDelay {
        timeline: Rc<RefCell<Vec<u32>>>,
        yields: Rc<RefCell<usize>>,
    }

    impl DelayNs for YieldingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.delay_ms(ns / 1_000_000).await
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.timeline.borrow_mut().push(ms);
            embassy_futures::yield_now().await;
            *self.yields.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_motor_pulse_awaits_async_delay() {
        let delay = YieldingDelay::default();
        let bridge = HBridge::new(
            NullPin,
            NullPin,
            NullPin,
            NullPin,
            NullPin,
            delay.clone(),
            DEFAULT_PULSE_MS,
        )
        .unwrap();
        let mut s = CycleScheduler::new(
            TrackerConfig::default(),
            ScriptedSensors::frames(&[(3000, 4000, 0), (3500, 4000, 0), (3990, 4000, 0)]),
            bridge,
            RecordingTransport::default(),
            delay.clone(),
        )
        .unwrap();

        let report = block_on(s.run_cycle());

        assert_eq!(
            report.outcome,
            AlignmentOutcome::Aligned {
                direction: Direction::Left,
                steps: 2
            }
        );
        // Each pulse is followed by the settle wait, all on the same async delay
        assert_eq!(
            *delay.timeline.borrow(),
            vec![DEFAULT_PULSE_MS, 10, DEFAULT_PULSE_MS, 10, 100, 2000]
        );
        assert_eq!(*delay.yields.borrow(), 6);
        assert!(!s.actuator.is_active());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = TrackerConfig::default();
        config.max_correction_steps = 0;
        let result = CycleScheduler::new(
            config,
            ScriptedSensors::frames(&[(0, 0, 0)]),
            RecordingActuator::default(),
            RecordingTransport::default(),
            RecordingDelay::default(),
        );
        assert!(matches!(result, Err(ConfigError::ZeroStepBound)));
    }
}
