//! Supervisor bookkeeping

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Running totals across cycles. Ephemeral, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub is_running: bool,
    pub current_cycle: u64,
    pub accounts_count: usize,
    pub total_cycles: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl CycleStats {
    pub fn record(&mut self, summary: &CycleSummary, finished_at: DateTime<Utc>) {
        self.total_cycles += 1;
        self.success_count += summary.succeeded as u64;
        self.fail_count += summary.failed as u64;
        self.last_cycle_at = Some(finished_at);
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.fail_count;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.success_count as f64 / total as f64;
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_counters() {
        let mut stats = CycleStats::default();
        let now = Utc::now();
        let summary = CycleSummary { cycle: 1, dispatched: 3, succeeded: 2, failed: 1, duration: Duration::from_secs(4) };

        stats.record(&summary, now);
        stats.record(&CycleSummary { cycle: 2, ..summary }, now);

        assert_eq!(stats.total_cycles, 2);
        assert_eq!(stats.success_count, 4);
        assert_eq!(stats.fail_count, 2);
        assert_eq!(stats.last_cycle_at, Some(now));
        assert!((stats.success_rate() - 4.0 / 6.0).abs() < f64::EPSILON);
    }
}
