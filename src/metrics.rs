//! Counters for the watcher loop.
//!
//! The loop owns one [`WatchMetrics`] and publishes a copy after every event,
//! so handles can read it without locking.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::session::ExtractionOutcome;

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchMetrics {
    pub mutation_notices: u64,
    pub inspections: u64,
    pub transitions_started: u64,
    pub transitions_finished: u64,

    pub extraction_passes: u64,
    pub extraction_commits: u64,
    pub extraction_clears: u64,
    pub extraction_skipped: u64,
    pub extraction_unchanged: u64,
    pub extraction_deferred: u64,
    pub extraction_time_us: u64,

    pub renders: u64,
    pub render_failures: u64,
    pub snapshot_failures: u64,

    pub copies: u64,
    pub copy_failures: u64,
}

impl WatchMetrics {
    /// Count one extraction pass and its wall time.
    pub fn record_extraction(&mut self, outcome: &ExtractionOutcome, elapsed: Duration) {
        self.extraction_passes += 1;
        self.extraction_time_us += u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        match outcome {
            ExtractionOutcome::Committed { .. } => self.extraction_commits += 1,
            ExtractionOutcome::Cleared => self.extraction_clears += 1,
            ExtractionOutcome::Skipped => self.extraction_skipped += 1,
            ExtractionOutcome::Unchanged => self.extraction_unchanged += 1,
            ExtractionOutcome::Deferred => self.extraction_deferred += 1,
            ExtractionOutcome::NoUnit => {}
        }
    }

    pub fn record_render(&mut self, ok: bool) {
        if ok {
            self.renders += 1;
        } else {
            self.render_failures += 1;
        }
    }

    pub fn record_copy(&mut self, ok: bool) {
        self.copies += 1;
        if !ok {
            self.copy_failures += 1;
        }
    }
}

/// Start a pass timer using [`Instant::now`].
pub fn start_pass_timer() -> Instant {
    Instant::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn extraction_outcomes_land_in_their_buckets() {
        let mut metrics = WatchMetrics::default();
        metrics.record_extraction(
            &ExtractionOutcome::Committed {
                unit_changed: true,
                items: Arc::from(Vec::new()),
            },
            Duration::from_micros(40),
        );
        metrics.record_extraction(&ExtractionOutcome::Skipped, Duration::from_micros(5));
        metrics.record_extraction(&ExtractionOutcome::Deferred, Duration::ZERO);
        metrics.record_extraction(&ExtractionOutcome::NoUnit, Duration::ZERO);

        assert_eq!(metrics.extraction_passes, 4);
        assert_eq!(metrics.extraction_commits, 1);
        assert_eq!(metrics.extraction_skipped, 1);
        assert_eq!(metrics.extraction_deferred, 1);
        assert_eq!(metrics.extraction_time_us, 45);
    }

    #[test]
    fn render_and_copy_failures_are_counted_separately() {
        let mut metrics = WatchMetrics::default();
        metrics.record_render(true);
        metrics.record_render(false);
        metrics.record_copy(true);
        metrics.record_copy(false);

        assert_eq!(metrics.renders, 1);
        assert_eq!(metrics.render_failures, 1);
        assert_eq!(metrics.copies, 2);
        assert_eq!(metrics.copy_failures, 1);
    }
}
