//! The process-wide published stolen-tick counter.
//!
//! Single writer (the sampling thread), arbitrary readers. Readers
//! tolerate stale values, so no ordering stronger than `Relaxed` is
//! needed on either side.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative scheduler ticks stolen across all CPUs since accounting
/// started. Monotonically non-decreasing.
#[derive(Debug, Default)]
pub struct StolenTickCounter {
    ticks: AtomicU64,
}

impl StolenTickCounter {
    /// Create a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `ticks` newly accounted stolen ticks.
    #[inline]
    pub fn add(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Current total. May lag the writer by at most one cycle.
    #[inline]
    #[must_use]
    pub fn total(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_total() {
        let counter = StolenTickCounter::new();
        assert_eq!(counter.total(), 0);

        counter.add(2);
        counter.add(0);
        counter.add(5);
        assert_eq!(counter.total(), 7);
    }

    #[test]
    fn test_readable_from_other_threads() {
        let counter = Arc::new(StolenTickCounter::new());
        counter.add(3);

        let reader = Arc::clone(&counter);
        let observed = std::thread::spawn(move || reader.total())
            .join()
            .unwrap();
        assert_eq!(observed, 3);
    }
}
