pub mod async_calls;
pub mod blockers;
pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod immediate;
pub mod manual;
pub mod status;
pub mod timing;

/// A one-shot callback handed to the host for later invocation.
pub type Callback = Box<dyn FnOnce()>;

/// The capabilities a main loop needs from whatever is hosting it.
/// This allows the same loop to run in a browser, a native event loop, or a test harness.
pub trait Host {
    /// Get the current time in milliseconds (monotonic).
    fn now(&self) -> f64;

    /// Invoke `callback` once, no earlier than `delay_ms` from now.
    fn defer_fixed_delay(&self, delay_ms: f64, callback: Callback);

    /// Invoke `callback` once, on the next display refresh.
    fn defer_on_display_refresh(&self, callback: Callback);

    /// Invoke `callback` once, on the next turn of the host's event loop.
    /// Hosts without a native primitive can build this on [`immediate::EmulatedImmediate`].
    fn defer_immediate(&self, callback: Callback);

    /// Receives human readable progress text. Optional.
    fn report_status(&self, _text: &str) {}

    /// Global kill switch, checked before every tick.
    fn is_aborted(&self) -> bool {
        false
    }

    /// Unhandled-fault channel for errors raised while ticking.
    fn report_fault(&self, error: LoopError) {
        tracing::error!(%error, "main loop stopped");
    }
}

pub use async_calls::IntervalHandle;
pub use config::LoopConfig;
pub use controller::{Flow, MainLoop};
pub use error::{BoxError, LoopError};
pub use immediate::{EmulatedImmediate, MarkerPort};
pub use manual::{Deferral, ManualHost};
pub use timing::{Timing, TimingMode};
