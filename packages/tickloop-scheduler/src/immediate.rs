//! "Run on the next turn" for hosts that have no native primitive for it.
//!
//! Callbacks wait in a FIFO. Every enqueue posts one marker message through the
//! host's message channel, and every delivered marker runs exactly one callback,
//! so order is preserved even when markers from other senders interleave.

use crate::Callback;
use std::cell::RefCell;
use std::collections::VecDeque;

/// Message payload identifying an immediate-callback marker.
pub const IMMEDIATE_MARKER: &str = "setimmediate";

/// A cross-context message channel able to post the marker back to ourselves.
pub trait MarkerPort {
    fn post_marker(&self);
}

pub struct EmulatedImmediate<P> {
    pending: RefCell<VecDeque<Callback>>,
    port: P,
}

impl<P: MarkerPort> EmulatedImmediate<P> {
    pub fn new(port: P) -> Self {
        Self {
            pending: RefCell::new(VecDeque::new()),
            port,
        }
    }

    pub fn enqueue(&self, callback: Callback) {
        self.pending.borrow_mut().push_back(callback);
        self.port.post_marker();
    }

    /// Runs the oldest pending callback. Returns `false` if there was none.
    pub fn on_marker(&self) -> bool {
        let next = self.pending.borrow_mut().pop_front();
        match next {
            Some(callback) => {
                callback();
                true
            }
            None => {
                tracing::warn!("immediate marker delivered with no pending callback");
                false
            }
        }
    }

    /// Message-handler entry point. Returns whether the message was ours.
    pub fn on_message(&self, data: &str) -> bool {
        if data != IMMEDIATE_MARKER {
            return false;
        }
        self.on_marker();
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct CountingPort {
        posted: Rc<Cell<usize>>,
    }

    impl MarkerPort for CountingPort {
        fn post_marker(&self) {
            self.posted.set(self.posted.get() + 1);
        }
    }

    #[test]
    fn one_marker_per_enqueue_and_one_callback_per_marker() {
        let port = CountingPort::default();
        let immediate = EmulatedImmediate::new(port.clone());
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            immediate.enqueue(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(port.posted.get(), 3);
        assert_eq!(immediate.pending(), 3);

        assert!(immediate.on_marker());
        assert_eq!(*log.borrow(), vec![0]);

        assert!(immediate.on_message(IMMEDIATE_MARKER));
        assert!(immediate.on_message(IMMEDIATE_MARKER));
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(!immediate.on_marker());
    }

    #[test]
    fn foreign_messages_are_ignored() {
        let immediate = EmulatedImmediate::new(CountingPort::default());
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        immediate.enqueue(Box::new(move || flag.set(true)));

        assert!(!immediate.on_message("resize"));
        assert!(!ran.get());
        assert_eq!(immediate.pending(), 1);
    }

    #[test]
    fn callbacks_may_enqueue_more_work() {
        let immediate = Rc::new(EmulatedImmediate::new(CountingPort::default()));
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let inner = immediate.clone();
            let log = log.clone();
            immediate.enqueue(Box::new(move || {
                log.borrow_mut().push("outer");
                let log = log.clone();
                inner.enqueue(Box::new(move || log.borrow_mut().push("inner")));
            }));
        }

        immediate.on_marker();
        immediate.on_marker();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }
}
