use crate::error::LoopError;
use crate::{Callback, Host};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// `value` is the target interval in milliseconds.
    FixedDelay,
    /// `value` is the decimation factor: run every n-th display refresh.
    DisplaySync,
    /// `value` is unused.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub mode: TimingMode,
    #[serde(default)]
    pub value: f64,
}

impl Timing {
    pub fn fixed_delay(interval_ms: f64) -> Self {
        Self {
            mode: TimingMode::FixedDelay,
            value: interval_ms,
        }
    }

    pub fn display_sync(decimation: u32) -> Self {
        Self {
            mode: TimingMode::DisplaySync,
            value: f64::from(decimation.max(1)),
        }
    }

    pub fn immediate() -> Self {
        Self {
            mode: TimingMode::Immediate,
            value: 0.0,
        }
    }

    /// A positive rate ticks on a fixed delay, anything else follows the display.
    pub fn from_fps(fps: f64) -> Self {
        if fps > 0.0 {
            Self::fixed_delay(1000.0 / fps)
        } else {
            Self::display_sync(1)
        }
    }

    /// Fixed delays must be finite and non-negative; decimation factors must
    /// be whole numbers of at least one.
    pub fn validate(&self) -> Result<(), LoopError> {
        let valid = match self.mode {
            TimingMode::FixedDelay => self.value.is_finite() && self.value >= 0.0,
            TimingMode::DisplaySync => {
                self.value.is_finite() && self.value >= 1.0 && self.value.fract() == 0.0
            }
            TimingMode::Immediate => true,
        };
        if valid {
            Ok(())
        } else {
            Err(LoopError::InvalidTiming {
                mode: self.mode,
                value: self.value,
            })
        }
    }

    /// Whether a display-synced tick with the given frame number skips the payload.
    pub fn skips_frame(&self, frame: u32) -> bool {
        if self.mode != TimingMode::DisplaySync || self.value <= 1.0 {
            return false;
        }
        let factor = self.value as u32;
        factor > 1 && frame % factor != 0
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::display_sync(1)
    }
}

/// The armed re-scheduling discipline. Absent while the loop is paused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Strategy {
    Timeout { interval_ms: f64 },
    Refresh,
    Immediate,
}

impl Strategy {
    pub(crate) fn for_timing(timing: Timing) -> Self {
        match timing.mode {
            TimingMode::FixedDelay => Strategy::Timeout {
                interval_ms: timing.value,
            },
            TimingMode::DisplaySync => Strategy::Refresh,
            TimingMode::Immediate => Strategy::Immediate,
        }
    }

    pub(crate) fn method(&self) -> &'static str {
        match self {
            Strategy::Timeout { .. } => "timeout",
            Strategy::Refresh => "rAF",
            Strategy::Immediate => "immediate",
        }
    }

    /// Asks the host for the next tick. Fixed delays are measured from the
    /// start of the previous tick, so payload run time does not accumulate as drift.
    pub(crate) fn arm<H: Host + ?Sized>(&self, host: &H, tick_start: f64, tick: Callback) {
        match *self {
            Strategy::Timeout { interval_ms } => {
                let wait = (tick_start + interval_ms - host.now()).max(0.0);
                host.defer_fixed_delay(wait, tick);
            }
            Strategy::Refresh => host.defer_on_display_refresh(tick),
            Strategy::Immediate => host.defer_immediate(tick),
        }
    }
}
