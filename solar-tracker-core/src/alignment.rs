//! Panel alignment decisions.
//!
//! [`AlignmentController::decide`] looks at one pair of LDR readings and
//! tells whether the panel must be turned. A turn is carried out through a
//! [`Correction`], a small state machine polled once per fresh sample: it asks
//! for one motor step at a time until the moving side reads within the
//! tolerance band of the opposite side, or the step bound is hit.

use crate::actuator::{ActuatorError, Direction};
use crate::config::{TrackerConfig, BASIS_POINTS};
use crate::sensor::{Reading, SensorFault, SensorFrame};

const DEFAULT_TOLERANCE_BP: u16 = 150;

/// Closed interval around a reference reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ToleranceBand {
    lower: u32,
    upper: u32,
}

impl ToleranceBand {
    /// Band of `reference - below_bp` to `reference + above_bp`, in basis points.
    ///
    /// Bounds are rounded inwards so integer readings compare exactly as they
    /// would against the real-valued band.
    pub fn around(reference: Reading, below_bp: u16, above_bp: u16) -> Self {
        // Widened so a full-scale reference with a wide band cannot overflow
        let reference = reference as u64;
        let scale = BASIS_POINTS as u64;
        let below = scale.saturating_sub(below_bp as u64);
        let above = scale + above_bp as u64;
        Self {
            lower: saturate((reference * below).div_ceil(scale)),
            upper: saturate(reference * above / scale),
        }
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> u32 {
        self.upper
    }

    pub fn contains(&self, value: Reading) -> bool {
        let value = value as u32;
        value >= self.lower && value <= self.upper
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Whether `lo` is within ±1.5% of `hi`.
pub fn within_band(lo: Reading, hi: Reading) -> bool {
    ToleranceBand::around(hi, DEFAULT_TOLERANCE_BP, DEFAULT_TOLERANCE_BP).contains(lo)
}

/// Turn towards the darker LDR.
pub fn select_direction(left: Reading, right: Reading) -> Direction {
    if left < right {
        Direction::Left
    } else {
        Direction::Right
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decision {
    Idle,
    Track(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CorrectionStep {
    /// Issue one motor step, then poll again with a fresh frame
    Actuate(Direction),
    Settled { steps: u32 },
    TimedOut { steps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlignmentOutcome {
    /// Both LDRs bright enough, nothing to do
    Idle,
    Aligned {
        direction: Direction,
        steps: u32,
    },
    /// Step bound reached without the readings settling
    CorrectionTimeout {
        direction: Direction,
        steps: u32,
    },
    ActuatorFault {
        direction: Direction,
        steps: u32,
        error: ActuatorError,
    },
    SensorFault(SensorFault),
}

/// One correction pass in a fixed direction.
#[derive(Debug, Clone)]
pub struct Correction {
    direction: Direction,
    below_bp: u16,
    above_bp: u16,
    max_steps: u32,
    steps: u32,
}

impl Correction {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// The moving side is compared against the band around the opposite side.
    pub fn is_settled(&self, frame: &SensorFrame) -> bool {
        let (value, reference) = match self.direction {
            Direction::Left => (frame.left, frame.right),
            Direction::Right => (frame.right, frame.left),
        };
        ToleranceBand::around(reference, self.below_bp, self.above_bp).contains(value)
    }

    pub fn poll(&mut self, frame: &SensorFrame) -> CorrectionStep {
        if self.is_settled(frame) {
            return CorrectionStep::Settled { steps: self.steps };
        }
        if self.steps >= self.max_steps {
            return CorrectionStep::TimedOut { steps: self.steps };
        }
        self.steps += 1;
        CorrectionStep::Actuate(self.direction)
    }
}

#[derive(Debug, Clone)]
pub struct AlignmentController {
    dark_threshold: Reading,
    below_bp: u16,
    above_bp: u16,
    max_steps: u32,
}

impl AlignmentController {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            dark_threshold: config.dark_threshold,
            below_bp: config.tolerance_below_bp,
            above_bp: config.tolerance_above_bp,
            max_steps: config.max_correction_steps,
        }
    }

    /// A single LDR under the threshold is enough to start tracking.
    pub fn decide(&self, left: Reading, right: Reading) -> Decision {
        if left < self.dark_threshold || right < self.dark_threshold {
            Decision::Track(select_direction(left, right))
        } else {
            Decision::Idle
        }
    }

    pub fn begin(&self, direction: Direction) -> Correction {
        Correction {
            direction,
            below_bp: self.below_bp,
            above_bp: self.above_bp,
            max_steps: self.max_steps,
            steps: 0,
        }
    }
}
