//! One-shot async calls that honor the host's abort switch and a pause gate,
//! independent of whether a main loop is running.

use crate::controller::{Inner, MainLoop};
use crate::{Callback, Host};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Stops a repeating call started with [`MainLoop::set_interval`].
#[derive(Clone)]
pub struct IntervalHandle {
    cancelled: Rc<Cell<bool>>,
}

impl IntervalHandle {
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

struct Interval {
    period_ms: f64,
    callback: RefCell<Box<dyn FnMut()>>,
    cancelled: Rc<Cell<bool>>,
}

impl<H: Host + 'static> MainLoop<H> {
    /// Runs `f` after `millis`, or on the next display refresh when `millis` is negative.
    pub fn call_later(&self, millis: f64, f: impl FnOnce() + 'static) {
        if millis >= 0.0 {
            self.set_timeout(millis, f);
        } else {
            self.request_display_refresh(f);
        }
    }

    pub fn set_timeout(&self, delay_ms: f64, f: impl FnOnce() + 'static) {
        let callback = self.guarded(Box::new(f));
        self.inner.host.defer_fixed_delay(delay_ms, callback);
    }

    /// Runs `f` every `period_ms` until the handle is cancelled. Firings that
    /// land while async calls are paused are dropped, not queued.
    pub fn set_interval(&self, period_ms: f64, f: impl FnMut() + 'static) -> IntervalHandle {
        let cancelled = Rc::new(Cell::new(false));
        let interval = Rc::new(Interval {
            period_ms: period_ms.max(0.0),
            callback: RefCell::new(Box::new(f)),
            cancelled: cancelled.clone(),
        });
        let due = self.inner.host.now() + interval.period_ms;
        arm_interval(Rc::downgrade(&self.inner), interval, due);
        IntervalHandle { cancelled }
    }

    pub fn request_display_refresh(&self, f: impl FnOnce() + 'static) {
        let callback = self.guarded(Box::new(f));
        self.inner.host.defer_on_display_refresh(callback);
    }

    /// Callbacks firing from now on are held back until [`resume_async_calls`](Self::resume_async_calls).
    pub fn pause_async_calls(&self) {
        self.inner.async_allowed.set(false);
    }

    /// Re-allows async calls and runs the held-back ones right away, oldest first.
    pub fn resume_async_calls(&self) {
        self.inner.async_allowed.set(true);
        let queued: Vec<Callback> = self.inner.async_queue.borrow_mut().drain(..).collect();
        for callback in queued {
            callback();
        }
    }

    pub fn queued_async_calls(&self) -> usize {
        self.inner.async_queue.borrow().len()
    }

    fn guarded(&self, f: Callback) -> Callback {
        let weak: Weak<Inner<H>> = Rc::downgrade(&self.inner);
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.host.is_aborted() {
                return;
            }
            if inner.async_allowed.get() {
                f();
            } else {
                inner.async_queue.borrow_mut().push_back(f);
            }
        })
    }
}

/// Firings are scheduled against the ideal cadence, so a late firing does not
/// push back the ones after it.
fn arm_interval<H: Host + 'static>(weak: Weak<Inner<H>>, interval: Rc<Interval>, due: f64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let delay = (due - inner.host.now()).max(0.0);
    let next = weak.clone();
    inner.host.defer_fixed_delay(
        delay,
        Box::new(move || {
            let Some(inner) = next.upgrade() else {
                return;
            };
            if interval.cancelled.get() || inner.host.is_aborted() {
                return;
            }
            if inner.async_allowed.get() {
                let mut callback = interval.callback.borrow_mut();
                (&mut **callback)();
            }
            if interval.cancelled.get() {
                return;
            }
            let following = due + interval.period_ms;
            drop(inner);
            arm_interval(next, interval, following);
        }),
    );
}
