use std::collections::VecDeque;

/// A one-shot task that must finish before the payload runs again.
pub struct Blocker<T> {
    pub task: T,
    pub label: String,
    /// Whether draining this blocker consumes a full unit of progress.
    pub counted: bool,
}

/// FIFO of pending blockers. Entries are never reordered.
pub struct BlockerQueue<T> {
    queue: VecDeque<Blocker<T>>,
}

impl<T> Default for BlockerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockerQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, blocker: Blocker<T>) {
        self.queue.push_back(blocker);
    }

    pub fn pop(&mut self) -> Option<Blocker<T>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Progress accounting, kept apart from the queue length so a producer can
/// announce N units of work regardless of how many entries it pushes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Progress {
    pub expected: f64,
    pub remaining: f64,
}

impl Progress {
    pub fn set_expected(&mut self, n: f64) {
        self.expected = n;
        self.remaining = n;
    }

    /// Accounts for one drained blocker.
    ///
    /// Counted blockers step down to the next whole unit. Uncounted ones only
    /// creep a ninth of the way towards half a unit, so their unknown cost never
    /// eats the progress owed to the counted blocker that follows.
    pub fn record(&mut self, counted: bool) {
        if self.remaining == 0.0 {
            return;
        }
        let remaining = self.remaining;
        let next = if remaining.fract() == 0.0 {
            remaining - 1.0
        } else {
            remaining.floor()
        };
        self.remaining = if counted {
            next
        } else {
            (8.0 * remaining + (next + 0.5)) / 9.0
        };
    }

    pub fn completed(&self) -> f64 {
        self.expected - self.remaining
    }
}
