use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tickloop_scheduler::immediate::IMMEDIATE_MARKER;
use tickloop_scheduler::{
    BoxError, Callback, EmulatedImmediate, Flow, Host, LoopError, MainLoop, MarkerPort, Timing,
    TimingMode,
};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{MessageEvent, Window};

// Platform adapter for Web (WASM/DOM)

struct WindowPort {
    window: Window,
}

impl MarkerPort for WindowPort {
    fn post_marker(&self) {
        if let Err(err) = self
            .window
            .post_message(&JsValue::from_str(IMMEDIATE_MARKER), "*")
        {
            tracing::error!(?err, "failed to post immediate marker");
        }
    }
}

enum Immediate {
    Native(js_sys::Function),
    Emulated {
        queue: Rc<EmulatedImmediate<WindowPort>>,
        _listener: Closure<dyn FnMut(MessageEvent)>,
    },
}

struct WebInner {
    window: Window,
    performance: Option<web_sys::Performance>,
    immediate: Immediate,
    status_sink: RefCell<Option<js_sys::Function>>,
    aborted: Cell<bool>,
}

/// [`Host`] backed by the browser window.
#[derive(Clone)]
pub struct WebHost {
    inner: Rc<WebInner>,
}

impl WebHost {
    pub fn new() -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global `window` exists"))?;
        let performance = window.performance();
        let immediate = Self::immediate_primitive(&window)?;
        Ok(Self {
            inner: Rc::new(WebInner {
                window,
                performance,
                immediate,
                status_sink: RefCell::new(None),
                aborted: Cell::new(false),
            }),
        })
    }

    /// Uses the global `setImmediate` when present, otherwise posts marker
    /// messages to the window and runs one queued callback per marker.
    fn immediate_primitive(window: &Window) -> Result<Immediate, JsValue> {
        let native = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("setImmediate"))?;
        if native.is_function() {
            return Ok(Immediate::Native(native.unchecked_into()));
        }

        let queue = Rc::new(EmulatedImmediate::new(WindowPort {
            window: window.clone(),
        }));
        let handler = queue.clone();
        let listener = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            if let Some(data) = event.data().as_string() {
                if handler.on_message(&data) {
                    event.stop_propagation();
                }
            }
        });
        window.add_event_listener_with_callback_and_bool(
            "message",
            listener.as_ref().unchecked_ref(),
            true,
        )?;
        Ok(Immediate::Emulated {
            queue,
            _listener: listener,
        })
    }

    pub fn uses_emulated_immediate(&self) -> bool {
        matches!(self.inner.immediate, Immediate::Emulated { .. })
    }

    /// Status lines go to `sink(text)` instead of the console.
    pub fn set_status_sink(&self, sink: js_sys::Function) {
        *self.inner.status_sink.borrow_mut() = Some(sink);
    }

    pub fn abort(&self) {
        self.inner.aborted.set(true);
    }
}

impl Host for WebHost {
    fn now(&self) -> f64 {
        match &self.inner.performance {
            Some(performance) => performance.now(),
            None => js_sys::Date::now(),
        }
    }

    fn defer_fixed_delay(&self, delay_ms: f64, callback: Callback) {
        let closure = Closure::once_into_js(move || callback());
        if let Err(err) = self
            .inner
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                closure.unchecked_ref(),
                delay_ms.max(0.0) as i32,
            )
        {
            tracing::error!(?err, "setTimeout failed");
        }
    }

    fn defer_on_display_refresh(&self, callback: Callback) {
        let closure = Closure::once_into_js(move || callback());
        if let Err(err) = self
            .inner
            .window
            .request_animation_frame(closure.unchecked_ref())
        {
            tracing::error!(?err, "requestAnimationFrame failed");
        }
    }

    fn defer_immediate(&self, callback: Callback) {
        match &self.inner.immediate {
            Immediate::Native(set_immediate) => {
                let closure = Closure::once_into_js(move || callback());
                if let Err(err) = set_immediate.call1(&JsValue::NULL, &closure) {
                    tracing::error!(?err, "setImmediate failed");
                }
            }
            Immediate::Emulated { queue, .. } => queue.enqueue(callback),
        }
    }

    fn report_status(&self, text: &str) {
        match self.inner.status_sink.borrow().as_ref() {
            Some(sink) => {
                if let Err(err) = sink.call1(&JsValue::NULL, &JsValue::from_str(text)) {
                    tracing::warn!(?err, "status sink threw");
                }
            }
            None => console_log(text),
        }
    }

    fn is_aborted(&self) -> bool {
        self.inner.aborted.get()
    }

    fn report_fault(&self, error: LoopError) {
        web_sys::console::error_1(&JsValue::from_str(&format!("exception thrown: {}", error)));
    }
}

/// JavaScript-facing main loop driving a JS callback.
#[wasm_bindgen]
pub struct WebMainLoop {
    main_loop: MainLoop<WebHost>,
}

#[wasm_bindgen]
impl WebMainLoop {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WebMainLoop, JsValue> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        Ok(Self {
            main_loop: MainLoop::new(WebHost::new()?),
        })
    }

    /// Calls `callback` every frame. `fps <= 0` follows the display refresh.
    /// The callback returning `false` exits the loop.
    pub fn start(&self, callback: js_sys::Function, fps: f64) -> Result<(), JsValue> {
        self.main_loop
            .start(Timing::from_fps(fps), move |_| {
                match callback.call0(&JsValue::NULL) {
                    Ok(ret) if ret.as_bool() == Some(false) => Ok(Flow::Exit),
                    Ok(_) => Ok(Flow::Continue),
                    Err(err) => Err(format!("{:?}", err).into()),
                }
            })
            .map_err(to_js_error)
    }

    /// Queues `callback` to run to completion before the next frame.
    #[wasm_bindgen(js_name = pushBlocker)]
    pub fn push_blocker(&self, label: String, callback: js_sys::Function, counted: bool) {
        let task = move |_: &MainLoop<WebHost>| -> Result<(), BoxError> {
            callback
                .call0(&JsValue::NULL)
                .map(|_| ())
                .map_err(|err| format!("{:?}", err).into())
        };
        if counted {
            self.main_loop.push_blocker(label, task);
        } else {
            self.main_loop.push_uncounted_blocker(label, task);
        }
    }

    #[wasm_bindgen(js_name = setExpectedBlockers)]
    pub fn set_expected_blockers(&self, n: u32) {
        self.main_loop.set_expected_blockers(n);
    }

    /// `mode` is `"fixed_delay"`, `"display_sync"` or `"immediate"`.
    #[wasm_bindgen(js_name = setTimingMode)]
    pub fn set_timing_mode(&self, mode: &str, value: f64) -> Result<(), JsValue> {
        let mode = parse_mode(mode)?;
        self.main_loop
            .set_timing_mode(Timing { mode, value })
            .map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = getTimingMode)]
    pub fn timing_mode(&self) -> String {
        mode_name(self.main_loop.timing().mode).to_string()
    }

    #[wasm_bindgen(js_name = getTimingValue)]
    pub fn timing_value(&self) -> f64 {
        self.main_loop.timing().value
    }

    /// Name of the armed browser primitive, empty while paused.
    pub fn method(&self) -> String {
        self.main_loop.method().to_string()
    }

    pub fn pause(&self) {
        self.main_loop.pause();
    }

    pub fn resume(&self) {
        self.main_loop.resume();
    }

    pub fn cancel(&self) {
        self.main_loop.cancel();
    }

    #[wasm_bindgen(js_name = isActive)]
    pub fn is_active(&self) -> bool {
        self.main_loop.is_active()
    }

    #[wasm_bindgen(js_name = setStatusSink)]
    pub fn set_status_sink(&self, sink: js_sys::Function) {
        self.main_loop.host().set_status_sink(sink);
    }
}

fn parse_mode(mode: &str) -> Result<TimingMode, JsValue> {
    match mode {
        "fixed_delay" => Ok(TimingMode::FixedDelay),
        "display_sync" => Ok(TimingMode::DisplaySync),
        "immediate" => Ok(TimingMode::Immediate),
        other => Err(JsValue::from_str(&format!("unknown timing mode '{}'", other))),
    }
}

fn mode_name(mode: TimingMode) -> &'static str {
    match mode {
        TimingMode::FixedDelay => "fixed_delay",
        TimingMode::DisplaySync => "display_sync",
        TimingMode::Immediate => "immediate",
    }
}

fn to_js_error(err: LoopError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn console_log(s: &str) {
    web_sys::console::log_1(&JsValue::from_str(s));
}
