use crate::blockers::{Blocker, BlockerQueue, Progress};
use crate::config::LoopConfig;
use crate::error::{BoxError, LoopError};
use crate::generation::{Generation, LoopId};
use crate::status::status_text;
use crate::timing::{Strategy, Timing, TimingMode};
use crate::{Callback, Host};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// What the payload wants the loop to do after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Intentional loop exit. The loop is cancelled and not re-armed.
    Exit,
}

type Payload<H> = Rc<RefCell<Box<dyn FnMut(&MainLoop<H>) -> Result<Flow, BoxError>>>>;
type Task<H> = Box<dyn FnOnce(&MainLoop<H>) -> Result<(), BoxError>>;

struct LoopState<H: Host> {
    generation: Generation,
    /// Generation the current arming was made under.
    loop_id: LoopId,
    /// Pauses not yet balanced by a resume.
    paused_depth: u32,
    active: bool,
    payload: Option<Payload<H>>,
    timing: Timing,
    strategy: Option<Strategy>,
    frame_counter: u32,
    tick_start: f64,
    blockers: BlockerQueue<Task<H>>,
    progress: Progress,
}

/// A replaceable hook that is moved out of its slot while it runs, so it can
/// replace or clear itself. `epoch` changes on every set or clear.
struct HookSlot<F: ?Sized> {
    hook: RefCell<Option<Box<F>>>,
    epoch: Cell<u64>,
}

impl<F: ?Sized> HookSlot<F> {
    fn new() -> Self {
        Self {
            hook: RefCell::new(None),
            epoch: Cell::new(0),
        }
    }

    fn set(&self, hook: Box<F>) {
        self.epoch.set(self.epoch.get() + 1);
        *self.hook.borrow_mut() = Some(hook);
    }

    fn clear(&self) {
        self.epoch.set(self.epoch.get() + 1);
        self.hook.borrow_mut().take();
    }

    fn take(&self) -> Option<(Box<F>, u64)> {
        let hook = self.hook.borrow_mut().take()?;
        Some((hook, self.epoch.get()))
    }

    /// Puts a hook back after its call, unless it was set or cleared meanwhile.
    fn restore(&self, hook: Box<F>, epoch: u64) {
        if self.epoch.get() == epoch {
            *self.hook.borrow_mut() = Some(hook);
        }
    }
}

pub(crate) struct Inner<H: Host> {
    pub(crate) host: H,
    config: LoopConfig,
    state: RefCell<LoopState<H>>,
    pre_tick: HookSlot<dyn FnMut() -> bool>,
    post_tick: HookSlot<dyn FnMut()>,
    pub(crate) async_allowed: Cell<bool>,
    pub(crate) async_queue: RefCell<VecDeque<Callback>>,
}

/// Single-threaded main loop: runs a payload at the pace of the selected
/// [`Timing`], draining queued blockers first.
///
/// Cloning yields another handle to the same loop. Callbacks handed to the
/// host only hold weak references, so dropping every handle stops the loop.
pub struct MainLoop<H: Host> {
    pub(crate) inner: Rc<Inner<H>>,
}

impl<H: Host> Clone for MainLoop<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: Host + 'static> MainLoop<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, LoopConfig::default())
    }

    pub fn with_config(host: H, config: LoopConfig) -> Self {
        let generation = Generation::new();
        let loop_id = generation.current();
        Self {
            inner: Rc::new(Inner {
                host,
                config,
                state: RefCell::new(LoopState {
                    generation,
                    loop_id,
                    paused_depth: 0,
                    active: false,
                    payload: None,
                    timing: Timing::default(),
                    strategy: None,
                    frame_counter: 0,
                    tick_start: 0.0,
                    blockers: BlockerQueue::new(),
                    progress: Progress::default(),
                }),
                pre_tick: HookSlot::new(),
                post_tick: HookSlot::new(),
                async_allowed: Cell::new(true),
                async_queue: RefCell::new(VecDeque::new()),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// Installs `payload` and arms its first tick.
    pub fn start<F>(&self, timing: Timing, payload: F) -> Result<(), LoopError>
    where
        F: FnMut(&MainLoop<H>) -> Result<Flow, BoxError> + 'static,
    {
        self.install(timing, Box::new(payload), true)?;
        self.schedule_tick();
        Ok(())
    }

    /// Like [`start`](Self::start) with a rate in frames per second; zero or
    /// negative rates follow the display refresh.
    pub fn start_with_fps<F>(&self, fps: f64, payload: F) -> Result<(), LoopError>
    where
        F: FnMut(&MainLoop<H>) -> Result<Flow, BoxError> + 'static,
    {
        self.start(Timing::from_fps(fps), payload)
    }

    /// Installs `payload` without arming it. Nothing ticks until [`resume`](Self::resume).
    pub fn start_unarmed<F>(&self, timing: Timing, payload: F) -> Result<(), LoopError>
    where
        F: FnMut(&MainLoop<H>) -> Result<Flow, BoxError> + 'static,
    {
        self.install(timing, Box::new(payload), false)
    }

    fn install(
        &self,
        timing: Timing,
        payload: Box<dyn FnMut(&MainLoop<H>) -> Result<Flow, BoxError>>,
        armed: bool,
    ) -> Result<(), LoopError> {
        timing.validate()?;
        let mut state = self.inner.state.borrow_mut();
        if state.payload.is_some() {
            tracing::warn!("start rejected: a main loop is already configured");
            return Err(LoopError::AlreadyRunning);
        }
        state.payload = Some(Rc::new(RefCell::new(payload)));
        state.loop_id = state.generation.current();
        state.paused_depth = 0;
        state.timing = timing;
        state.active = armed;
        state.strategy = armed.then(|| Strategy::for_timing(timing));
        tracing::info!(
            mode = ?timing.mode,
            value = timing.value,
            generation = state.loop_id.get(),
            armed,
            "main loop started"
        );
        Ok(())
    }

    /// Stops the loop and forgets its payload. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.pause();
        let mut state = self.inner.state.borrow_mut();
        if state.payload.take().is_some() {
            tracing::info!("main loop cancelled");
        }
        state.paused_depth = 0;
    }

    /// Invalidates every armed tick. The payload, timing and blockers are kept.
    pub fn pause(&self) {
        let mut state = self.inner.state.borrow_mut();
        let generation = state.generation.advance();
        state.paused_depth += 1;
        state.strategy = None;
        state.active = false;
        tracing::debug!(
            generation = generation.get(),
            depth = state.paused_depth,
            "main loop paused"
        );
    }

    /// Re-arms the configured payload once every earlier pause is balanced.
    /// Without a configured payload this does nothing.
    pub fn resume(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.payload.is_none() {
                tracing::debug!("resume ignored: no main loop configured");
                return;
            }
            let generation = state.generation.advance();
            state.paused_depth = state.paused_depth.saturating_sub(1);
            if state.paused_depth > 0 {
                tracing::debug!(
                    generation = generation.get(),
                    depth = state.paused_depth,
                    "main loop still paused"
                );
                return;
            }
            state.loop_id = generation;
            state.strategy = Some(Strategy::for_timing(state.timing));
            state.active = true;
            tracing::debug!(generation = generation.get(), "main loop resumed");
        }
        self.schedule_tick();
    }

    pub fn push_blocker<F>(&self, label: impl Into<String>, task: F)
    where
        F: FnOnce(&MainLoop<H>) -> Result<(), BoxError> + 'static,
    {
        self.enqueue_blocker(label.into(), Box::new(task), true);
    }

    /// Queues a blocker whose cost is unknown; it only nudges progress forward.
    pub fn push_uncounted_blocker<F>(&self, label: impl Into<String>, task: F)
    where
        F: FnOnce(&MainLoop<H>) -> Result<(), BoxError> + 'static,
    {
        self.enqueue_blocker(label.into(), Box::new(task), false);
    }

    fn enqueue_blocker(&self, label: String, task: Task<H>, counted: bool) {
        let status = {
            let mut state = self.inner.state.borrow_mut();
            state.blockers.push(Blocker {
                task,
                label,
                counted,
            });
            status_text(&self.inner.config.status_message, &state.progress)
        };
        self.inner.host.report_status(&status);
    }

    pub fn set_expected_blockers(&self, n: u32) {
        let status = {
            let mut state = self.inner.state.borrow_mut();
            state.progress.set_expected(f64::from(n));
            status_text(&self.inner.config.status_message, &state.progress)
        };
        self.inner.host.report_status(&status);
    }

    /// Switches the timing discipline of the configured loop.
    ///
    /// On a running loop this starts a new generation, so ticks already armed
    /// under the old discipline turn into no-ops, and arms one tick under the
    /// new one. On a paused loop the change takes effect on resume. Invalid
    /// timings are rejected before anything changes.
    pub fn set_timing_mode(&self, timing: Timing) -> Result<(), LoopError> {
        timing.validate()?;
        {
            let mut state = self.inner.state.borrow_mut();
            if state.payload.is_none() {
                tracing::warn!(mode = ?timing.mode, "timing change rejected: no main loop configured");
                return Err(LoopError::NoActiveLoop);
            }
            state.timing = timing;
            tracing::debug!(mode = ?timing.mode, value = timing.value, "main loop timing changed");
            if !state.active {
                return Ok(());
            }
            state.loop_id = state.generation.advance();
            state.strategy = Some(Strategy::for_timing(timing));
        }
        self.schedule_tick();
        Ok(())
    }

    pub fn timing(&self) -> Timing {
        self.inner.state.borrow().timing
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.borrow().active
    }

    pub fn is_configured(&self) -> bool {
        self.inner.state.borrow().payload.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.borrow().generation.current().get()
    }

    pub fn frame_counter(&self) -> u32 {
        self.inner.state.borrow().frame_counter
    }

    pub fn pending_blockers(&self) -> usize {
        self.inner.state.borrow().blockers.len()
    }

    pub fn expected_blockers(&self) -> f64 {
        self.inner.state.borrow().progress.expected
    }

    pub fn remaining_blockers(&self) -> f64 {
        self.inner.state.borrow().progress.remaining
    }

    pub fn status_text(&self) -> String {
        let state = self.inner.state.borrow();
        status_text(&self.inner.config.status_message, &state.progress)
    }

    /// Name of the armed deferral discipline, empty while paused.
    pub fn method(&self) -> &'static str {
        self.inner
            .state
            .borrow()
            .strategy
            .map_or("", |strategy| strategy.method())
    }

    /// Runs before every payload invocation; returning `false` skips that frame.
    pub fn set_pre_tick(&self, hook: impl FnMut() -> bool + 'static) {
        self.inner.pre_tick.set(Box::new(hook));
    }

    /// Runs after every payload invocation that asked to continue.
    pub fn set_post_tick(&self, hook: impl FnMut() + 'static) {
        self.inner.post_tick.set(Box::new(hook));
    }

    pub fn clear_tick_hooks(&self) {
        self.inner.pre_tick.clear();
        self.inner.post_tick.clear();
    }

    fn schedule_tick(&self) {
        let id = self.inner.state.borrow().loop_id;
        self.rearm(id);
    }

    fn tick_callback(&self, id: LoopId) -> Callback {
        let weak: Weak<Inner<H>> = Rc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                MainLoop { inner }.tick(id);
            }
        })
    }

    /// Arms the next tick with the current strategy, unless `id` is stale.
    fn rearm(&self, id: LoopId) {
        let (strategy, tick_start) = {
            let state = self.inner.state.borrow();
            if state.generation.is_stale(id) {
                return;
            }
            (state.strategy, state.tick_start)
        };
        if let Some(strategy) = strategy {
            strategy.arm(&self.inner.host, tick_start, self.tick_callback(id));
        }
    }

    fn tick(&self, id: LoopId) {
        let host = &self.inner.host;
        if host.is_aborted() {
            tracing::trace!("tick dropped: host aborted");
            return;
        }

        let blocker = {
            let mut state = self.inner.state.borrow_mut();
            if state.generation.is_stale(id) {
                tracing::trace!(tick = id.get(), "stale tick ignored");
                return;
            }
            state.blockers.pop()
        };
        if let Some(blocker) = blocker {
            self.drain_blocker(id, blocker);
            return;
        }

        let payload = {
            let mut state = self.inner.state.borrow_mut();
            state.frame_counter = state.frame_counter.wrapping_add(1);
            if state.timing.skips_frame(state.frame_counter) {
                tracing::trace!(frame = state.frame_counter, "frame decimated");
                None
            } else {
                if state.timing.mode == TimingMode::FixedDelay {
                    state.tick_start = host.now();
                }
                state.payload.clone()
            }
        };
        let Some(payload) = payload else {
            self.rearm(id);
            return;
        };

        if !self.run_pre_tick() {
            tracing::trace!("frame skipped by pre-tick hook");
            self.rearm(id);
            return;
        }

        let result = {
            let mut payload = payload.borrow_mut();
            (&mut **payload)(self)
        };
        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => {
                if !self.inner.state.borrow().generation.is_stale(id) {
                    self.cancel();
                }
                return;
            }
            Err(source) => {
                self.halt(id);
                host.report_fault(LoopError::fault("payload", source));
                return;
            }
        }

        self.run_post_tick();
        self.rearm(id);
    }

    fn drain_blocker(&self, id: LoopId, blocker: Blocker<Task<H>>) {
        let host = &self.inner.host;
        let Blocker {
            task,
            label,
            counted,
        } = blocker;

        let started = host.now();
        let result = task(self);
        tracing::debug!(
            blocker = %label,
            elapsed_ms = host.now() - started,
            "main loop blocker finished"
        );

        let status = {
            let mut state = self.inner.state.borrow_mut();
            state.progress.record(counted);
            status_text(&self.inner.config.status_message, &state.progress)
        };
        host.report_status(&status);

        if let Err(source) = result {
            self.halt(id);
            host.report_fault(LoopError::fault(label, source));
            return;
        }

        // The blocker may have paused or resumed the loop itself.
        if self.inner.state.borrow().generation.is_stale(id) {
            return;
        }
        host.defer_fixed_delay(self.inner.config.blocker_delay_ms, self.tick_callback(id));
    }

    /// Leaves the loop inactive after a fault. The payload stays configured.
    fn halt(&self, id: LoopId) {
        let mut state = self.inner.state.borrow_mut();
        if state.generation.is_stale(id) {
            return;
        }
        state.generation.advance();
        state.strategy = None;
        state.active = false;
    }

    fn run_pre_tick(&self) -> bool {
        let Some((mut hook, epoch)) = self.inner.pre_tick.take() else {
            return true;
        };
        let proceed = hook();
        self.inner.pre_tick.restore(hook, epoch);
        proceed
    }

    fn run_post_tick(&self) {
        if let Some((mut hook, epoch)) = self.inner.post_tick.take() {
            hook();
            self.inner.post_tick.restore(hook, epoch);
        }
    }
}
