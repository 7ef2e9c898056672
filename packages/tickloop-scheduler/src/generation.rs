/// Stamp captured by every armed tick. A tick whose stamp is older than the
/// current generation belongs to a superseded loop and must do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(u64);

impl LoopId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Monotonic counter used instead of cancelling callbacks the host already holds.
#[derive(Debug, Default)]
pub struct Generation {
    current: u64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> LoopId {
        LoopId(self.current)
    }

    /// Invalidates every id handed out so far and returns the new one.
    pub fn advance(&mut self) -> LoopId {
        self.current += 1;
        LoopId(self.current)
    }

    pub fn is_stale(&self, id: LoopId) -> bool {
        id.0 < self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_invalidates_older_ids() {
        let mut generation = Generation::new();
        let first = generation.current();
        assert!(!generation.is_stale(first));

        let second = generation.advance();
        assert!(generation.is_stale(first));
        assert!(!generation.is_stale(second));
        assert!(second > first);
    }
}
