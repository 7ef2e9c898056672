use crate::timing::TimingMode;
use thiserror::Error;

/// Error type returned by payloads and blocker tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("a main loop is already configured; cancel it before starting another")]
    AlreadyRunning,

    #[error("no main loop is configured")]
    NoActiveLoop,

    #[error("invalid {mode:?} timing value {value}")]
    InvalidTiming { mode: TimingMode, value: f64 },

    #[error("main loop task '{label}' failed: {source}")]
    PayloadFault {
        label: String,
        #[source]
        source: BoxError,
    },
}

impl LoopError {
    pub(crate) fn fault(label: impl Into<String>, source: BoxError) -> Self {
        LoopError::PayloadFault {
            label: label.into(),
            source,
        }
    }
}
