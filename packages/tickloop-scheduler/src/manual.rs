//! A host driven by hand: virtual clock, explicit stepping, and a record of
//! everything the loop asked for. Used by tests and by native embedders that
//! pump it from their own event loop.

use crate::immediate::{EmulatedImmediate, IMMEDIATE_MARKER, MarkerPort};
use crate::{Callback, Host, LoopError};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Display refresh period used unless overridden.
pub const DEFAULT_REFRESH_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// A deferral request as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Deferral {
    FixedDelay(f64),
    DisplayRefresh,
    Immediate,
}

enum Ready {
    Run(Callback),
    Marker,
}

type ReadyQueue = Rc<RefCell<VecDeque<Ready>>>;

struct QueuePort {
    ready: ReadyQueue,
}

impl MarkerPort for QueuePort {
    fn post_marker(&self) {
        self.ready.borrow_mut().push_back(Ready::Marker);
    }
}

struct Timer {
    due: f64,
    seq: u64,
    callback: Callback,
}

struct HostState {
    now: f64,
    seq: u64,
    timers: Vec<Timer>,
    refresh: SmallVec<[Callback; 4]>,
    /// Deadline of the pending refresh batch, fixed when its first callback was requested.
    refresh_due: Option<f64>,
    next_refresh: f64,
    refresh_interval: f64,
    requests: Vec<Deferral>,
    statuses: Vec<String>,
    faults: Vec<LoopError>,
}

impl HostState {
    /// Frame-aligned time of the next refresh. Requests landing within 2ms of
    /// a frame boundary go to the following frame to avoid zero-length frames.
    fn refresh_deadline(&mut self) -> f64 {
        if self.next_refresh == 0.0 {
            self.next_refresh = self.now + self.refresh_interval;
        } else {
            while self.now + 2.0 >= self.next_refresh {
                self.next_refresh += self.refresh_interval;
            }
        }
        self.next_refresh
    }

    fn take_refresh(&mut self, at: f64) -> Event {
        self.refresh_due = None;
        Event::Refresh(at, std::mem::take(&mut self.refresh))
    }

    fn earliest_timer(&self) -> Option<usize> {
        self.timers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)))
            .map(|(index, _)| index)
    }
}

enum Event {
    Ready(Ready),
    Timer(f64, Callback),
    Refresh(f64, SmallVec<[Callback; 4]>),
}

struct Shared {
    state: RefCell<HostState>,
    ready: ReadyQueue,
    emulated: Option<EmulatedImmediate<QueuePort>>,
    aborted: Cell<bool>,
}

#[derive(Clone)]
pub struct ManualHost {
    shared: Rc<Shared>,
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualHost {
    /// A host with a native immediate primitive.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A host whose immediates go through [`EmulatedImmediate`] marker messages.
    pub fn with_emulated_immediate() -> Self {
        Self::build(true)
    }

    fn build(emulated: bool) -> Self {
        let ready: ReadyQueue = Rc::new(RefCell::new(VecDeque::new()));
        let emulated = emulated.then(|| {
            EmulatedImmediate::new(QueuePort {
                ready: ready.clone(),
            })
        });
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(HostState {
                    now: 0.0,
                    seq: 0,
                    timers: Vec::new(),
                    refresh: SmallVec::new(),
                    refresh_due: None,
                    next_refresh: 0.0,
                    refresh_interval: DEFAULT_REFRESH_INTERVAL_MS,
                    requests: Vec::new(),
                    statuses: Vec::new(),
                    faults: Vec::new(),
                }),
                ready,
                emulated,
                aborted: Cell::new(false),
            }),
        }
    }

    pub fn set_refresh_interval(&self, interval_ms: f64) {
        self.shared.state.borrow_mut().refresh_interval = interval_ms;
    }

    pub fn uses_emulated_immediate(&self) -> bool {
        self.shared.emulated.is_some()
    }

    /// Moves the clock forward without running anything, as if the caller were busy.
    pub fn spend(&self, ms: f64) {
        self.shared.state.borrow_mut().now += ms.max(0.0);
    }

    /// Moves the clock to `ms`. The clock never goes backwards.
    pub fn set_now(&self, ms: f64) {
        let mut state = self.shared.state.borrow_mut();
        state.now = state.now.max(ms);
    }

    pub fn abort(&self) {
        self.shared.aborted.set(true);
    }

    /// When the next event would run, if anything is pending.
    pub fn next_event_at(&self) -> Option<f64> {
        if !self.shared.ready.borrow().is_empty() {
            return Some(self.shared.state.borrow().now);
        }
        let state = self.shared.state.borrow();
        let timer = state.earliest_timer().map(|index| state.timers[index].due);
        match (timer, state.refresh_due) {
            (Some(t), Some(r)) => Some(t.min(r).max(state.now)),
            (Some(t), None) => Some(t.max(state.now)),
            (None, Some(r)) => Some(r.max(state.now)),
            (None, None) => None,
        }
    }

    /// Runs the earliest pending event, advancing the clock to it.
    /// Returns `false` when nothing is pending.
    pub fn step(&self) -> bool {
        let Some(event) = self.take_next() else {
            return false;
        };
        match event {
            Event::Ready(Ready::Run(callback)) => callback(),
            Event::Ready(Ready::Marker) => {
                if let Some(emulated) = &self.shared.emulated {
                    emulated.on_message(IMMEDIATE_MARKER);
                }
            }
            Event::Timer(due, callback) => {
                self.set_now(due);
                callback();
            }
            Event::Refresh(at, callbacks) => {
                self.set_now(at);
                for callback in callbacks {
                    callback();
                }
            }
        }
        true
    }

    fn take_next(&self) -> Option<Event> {
        if let Some(ready) = self.shared.ready.borrow_mut().pop_front() {
            return Some(Event::Ready(ready));
        }
        let mut state = self.shared.state.borrow_mut();
        let timer = state.earliest_timer();
        match (timer, state.refresh_due) {
            (Some(index), Some(at)) if state.timers[index].due > at => Some(state.take_refresh(at)),
            (Some(index), _) => {
                let timer = state.timers.swap_remove(index);
                Some(Event::Timer(timer.due, timer.callback))
            }
            (None, Some(at)) => Some(state.take_refresh(at)),
            (None, None) => None,
        }
    }

    /// Runs up to `n` events and returns how many ran.
    pub fn run_steps(&self, n: usize) -> usize {
        let mut ran = 0;
        while ran < n && self.step() {
            ran += 1;
        }
        ran
    }

    /// Runs every event due at or before `ms`, then moves the clock there.
    /// Loops in immediate mode never go idle; drive those with [`run_steps`](Self::run_steps).
    pub fn run_until(&self, ms: f64) {
        while self.next_event_at().is_some_and(|at| at <= ms) {
            self.step();
        }
        self.set_now(ms);
    }

    pub fn advance(&self, ms: f64) {
        let target = self.now() + ms;
        self.run_until(target);
    }

    pub fn requests(&self) -> Vec<Deferral> {
        self.shared.state.borrow().requests.clone()
    }

    pub fn take_requests(&self) -> Vec<Deferral> {
        std::mem::take(&mut self.shared.state.borrow_mut().requests)
    }

    pub fn statuses(&self) -> Vec<String> {
        self.shared.state.borrow().statuses.clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.shared.state.borrow().statuses.last().cloned()
    }

    pub fn take_faults(&self) -> Vec<LoopError> {
        std::mem::take(&mut self.shared.state.borrow_mut().faults)
    }

    pub fn pending_timers(&self) -> usize {
        self.shared.state.borrow().timers.len()
    }

    pub fn pending_refresh(&self) -> usize {
        self.shared.state.borrow().refresh.len()
    }

    pub fn pending_immediates(&self) -> usize {
        self.shared.ready.borrow().len()
    }
}

impl Host for ManualHost {
    fn now(&self) -> f64 {
        self.shared.state.borrow().now
    }

    fn defer_fixed_delay(&self, delay_ms: f64, callback: Callback) {
        let mut state = self.shared.state.borrow_mut();
        state.requests.push(Deferral::FixedDelay(delay_ms));
        let due = state.now + delay_ms.max(0.0);
        let seq = state.seq;
        state.seq += 1;
        state.timers.push(Timer { due, seq, callback });
    }

    fn defer_on_display_refresh(&self, callback: Callback) {
        let mut state = self.shared.state.borrow_mut();
        state.requests.push(Deferral::DisplayRefresh);
        if state.refresh_due.is_none() {
            let due = state.refresh_deadline();
            state.refresh_due = Some(due);
        }
        state.refresh.push(callback);
    }

    fn defer_immediate(&self, callback: Callback) {
        self.shared
            .state
            .borrow_mut()
            .requests
            .push(Deferral::Immediate);
        match &self.shared.emulated {
            Some(emulated) => emulated.enqueue(callback),
            None => self
                .shared
                .ready
                .borrow_mut()
                .push_back(Ready::Run(callback)),
        }
    }

    fn report_status(&self, text: &str) {
        self.shared.state.borrow_mut().statuses.push(text.to_string());
    }

    fn is_aborted(&self) -> bool {
        self.shared.aborted.get()
    }

    fn report_fault(&self, error: LoopError) {
        tracing::error!(%error, "main loop stopped");
        self.shared.state.borrow_mut().faults.push(error);
    }
}
