//! # Discrete H-bridge panel motor driver
//!
//! Drives the panel motor through four switching transistors.
//!
//! ```text
//!        Q1 ─┬─ M ─┬─ Q3
//!        Q2 ─┘     └─ Q4
//! ```
//!
//! Q1/Q2 form the left leg and Q3/Q4 the right leg. Turning on Q1 and Q4
//! rotates the panel left, Q3 and Q2 rotates it right. A step is a fixed-width
//! pulse; the bridge is fully opened before and after every pulse so the two
//! switches of a leg are never closed together. The pulse is awaited, so other
//! tasks keep running while the motor turns.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

use crate::actuator::{ActuatorError, Direction, PanelActuator};

/// Default width of a single motor step pulse.
pub const DEFAULT_PULSE_MS: u32 = 20;

pub struct HBridge<Q1, Q2, Q3, Q4, LED, D>
where
    Q1: OutputPin,
    Q2: OutputPin,
    Q3: OutputPin,
    Q4: OutputPin,
    LED: OutputPin,
    D: DelayNs,
{
    q1: Q1,
    q2: Q2,
    q3: Q3,
    q4: Q4,
    status_led: LED,
    delay: D,
    pulse_ms: u32,
    active: bool,
    steps: u32,
}

impl<Q1, Q2, Q3, Q4, LED, D> HBridge<Q1, Q2, Q3, Q4, LED, D>
where
    Q1: OutputPin,
    Q2: OutputPin,
    Q3: OutputPin,
    Q4: OutputPin,
    LED: OutputPin,
    D: DelayNs,
{
    /// Create a driver with every switch open and the status LED off.
    pub fn new(
        q1: Q1,
        q2: Q2,
        q3: Q3,
        q4: Q4,
        status_led: LED,
        delay: D,
        pulse_ms: u32,
    ) -> Result<Self, ActuatorError> {
        let mut bridge = HBridge {
            q1,
            q2,
            q3,
            q4,
            status_led,
            delay,
            pulse_ms,
            active: false,
            steps: 0,
        };
        bridge.open_all()?;
        bridge
            .status_led
            .set_low()
            .map_err(|_| ActuatorError::GpioError)?;
        Ok(bridge)
    }

    /// Steps issued since the driver was created.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Whether a correction pass is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn open_all(&mut self) -> Result<(), ActuatorError> {
        self.q1.set_low().map_err(|_| ActuatorError::GpioError)?;
        self.q2.set_low().map_err(|_| ActuatorError::GpioError)?;
        self.q3.set_low().map_err(|_| ActuatorError::GpioError)?;
        self.q4.set_low().map_err(|_| ActuatorError::GpioError)?;
        Ok(())
    }

    fn close_diagonal(&mut self, direction: Direction) -> Result<(), ActuatorError> {
        match direction {
            Direction::Left => {
                self.q1.set_high().map_err(|_| ActuatorError::GpioError)?;
                self.q4.set_high().map_err(|_| ActuatorError::GpioError)?;
            }
            Direction::Right => {
                self.q3.set_high().map_err(|_| ActuatorError::GpioError)?;
                self.q2.set_high().map_err(|_| ActuatorError::GpioError)?;
            }
        }
        Ok(())
    }
}

impl<Q1, Q2, Q3, Q4, LED, D> PanelActuator for HBridge<Q1, Q2, Q3, Q4, LED, D>
where
    Q1: OutputPin,
    Q2: OutputPin,
    Q3: OutputPin,
    Q4: OutputPin,
    LED: OutputPin,
    D: DelayNs,
{
    async fn step(&mut self, direction: Direction) -> Result<(), ActuatorError> {
        if !self.active {
            self.status_led
                .set_high()
                .map_err(|_| ActuatorError::GpioError)?;
            self.active = true;
        }

        self.open_all()?;
        let pulse = self.close_diagonal(direction);
        if pulse.is_ok() {
            self.delay.delay_ms(self.pulse_ms).await;
        }
        // Open the bridge even if closing it failed halfway
        self.open_all()?;
        pulse?;

        self.steps = self.steps.wrapping_add(1);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.open_all()?;
        self.status_led
            .set_low()
            .map_err(|_| ActuatorError::GpioError)?;
        self.active = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    /// Index of each pin in the shared level table.
    const Q1: usize = 0;
    const Q2: usize = 1;
    const Q3: usize = 2;
    const Q4: usize = 3;
    const LED: usize = 4;

    #[derive(Default)]
    struct Board {
        levels: [bool; 5],
        shoot_through: bool,
        pulses: Vec<[bool; 4]>,
    }

    struct MockPin {
        index: usize,
        board: Rc<RefCell<Board>>,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.board.borrow_mut().levels[self.index] = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            let mut board = self.board.borrow_mut();
            board.levels[self.index] = true;
            let l = board.levels;
            if (l[Q1] && l[Q2]) || (l[Q3] && l[Q4]) {
                board.shoot_through = true;
            }
            Ok(())
        }
    }

    struct MockDelay {
        board: Rc<RefCell<Board>>,
        total_ns: u64,
    }

    impl MockDelay {
        fn record(&mut self, ns: u64) {
            let mut board = self.board.borrow_mut();
            let l = board.levels;
            board.pulses.push([l[Q1], l[Q2], l[Q3], l[Q4]]);
            self.total_ns += ns;
        }
    }

    impl DelayNs for MockDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.record(ns as u64);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.record(ms as u64 * 1_000_000);
        }
    }

    fn bridge(
        board: &Rc<RefCell<Board>>,
    ) -> HBridge<MockPin, MockPin, MockPin, MockPin, MockPin, MockDelay> {
        let pin = |index| MockPin {
            index,
            board: board.clone(),
        };
        let delay = MockDelay {
            board: board.clone(),
            total_ns: 0,
        };
        HBridge::new(pin(Q1), pin(Q2), pin(Q3), pin(Q4), pin(LED), delay, DEFAULT_PULSE_MS)
            .unwrap()
    }

    #[test]
    fn test_step_energises_one_diagonal() {
        let board = Rc::new(RefCell::new(Board::default()));
        let mut hb = bridge(&board);

        block_on(hb.step(Direction::Left)).unwrap();
        block_on(hb.step(Direction::Right)).unwrap();

        let b = board.borrow();
        assert_eq!(b.pulses, vec![[true, false, false, true], [false, true, true, false]]);
        assert!(!b.shoot_through);
        // Bridge is open between steps
        assert_eq!(&b.levels[..4], &[false; 4]);
        assert_eq!(hb.steps(), 2);
    }

    #[test]
    fn test_status_led_follows_correction_pass() {
        let board = Rc::new(RefCell::new(Board::default()));
        let mut hb = bridge(&board);
        assert!(!board.borrow().levels[LED]);

        block_on(hb.step(Direction::Right)).unwrap();
        assert!(hb.is_active());
        assert!(board.borrow().levels[LED]);

        hb.release().unwrap();
        assert!(!hb.is_active());
        assert!(!board.borrow().levels[LED]);
    }

    #[test]
    fn test_pulse_width() {
        let board = Rc::new(RefCell::new(Board::default()));
        let mut hb = bridge(&board);
        for _ in 0..3 {
            block_on(hb.step(Direction::Left)).unwrap();
        }
        assert_eq!(hb.delay.total_ns, 3 * DEFAULT_PULSE_MS as u64 * 1_000_000);
    }

    #[test]
    fn test_actuator_error_display() {
        assert_eq!(ActuatorError::GpioError.to_string(), "GPIO pin operation failed");
    }
}
