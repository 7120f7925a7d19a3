use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// What one pass of a sweeper did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Rows the pass looked at.
    pub examined: usize,
    /// Rows whose state actually changed.
    pub changed: usize,
    /// Rows that could not be processed. They are picked up again on the next pass.
    pub errors: usize,
}

impl SweepReport {
    pub fn record_change(&mut self, changed: bool) {
        self.examined += 1;
        if changed {
            self.changed += 1;
        }
    }

    pub fn record_error(&mut self) {
        self.examined += 1;
        self.errors += 1;
    }

    pub fn is_idle(&self) -> bool {
        self.examined == 0
    }
}

impl Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} examined, {} changed, {} errors", self.examined, self.changed, self.errors)
    }
}

/// Retry schedule for gateway status polls: `base_delay`, then doubling, for at most `max_attempts` calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay: Duration::ZERO }
    }

    /// The pause before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(RetryPolicy::no_delay(3).delay_for(3), Duration::ZERO);
    }

    #[test]
    fn report_counts() {
        let mut report = SweepReport::default();
        assert!(report.is_idle());
        report.record_change(true);
        report.record_change(false);
        report.record_error();
        assert_eq!(report, SweepReport { examined: 3, changed: 1, errors: 1 });
        assert_eq!(report.to_string(), "3 examined, 1 changed, 1 errors");
    }
}
