//! Metrics for the packet pipeline.
//!
//! Counters are relaxed atomics: cheap to bump from worker threads and
//! advisory by contract, so readers may observe slightly stale values.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter shared across threads.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pipeline-level statistics for one dataplane.
#[derive(Debug, Default)]
pub struct DataplaneStats {
    /// Packets handed to the application's process routine.
    pub processed: Counter,
    /// Packets that ended in a drop for any reason.
    pub dropped: Counter,
    /// Packets dropped because a dispatch chain exceeded the depth bound.
    pub pipeline_loops: Counter,
    /// Packets dropped because a process routine returned non-zero status.
    pub app_faults: Counter,
    /// Packets dropped because no buffer was free at receive time.
    pub pool_exhausted: Counter,
}

impl DataplaneStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports all counters as key/value pairs for logging or scraping.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("processed", self.processed.get()),
            ("dropped", self.dropped.get()),
            ("pipeline_loops", self.pipeline_loops.get()),
            ("app_faults", self.app_faults.get()),
            ("pool_exhausted", self.pool_exhausted.get()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.inc();
        c.add(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_export() {
        let stats = DataplaneStats::new();
        stats.processed.add(10);
        stats.pipeline_loops.inc();
        let exported = stats.export();
        assert!(exported.contains(&("processed", 10)));
        assert!(exported.contains(&("pipeline_loops", 1)));
        assert!(exported.contains(&("dropped", 0)));
    }
}
