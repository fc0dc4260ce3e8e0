use crate::error::PolicyError;
use std::time::Duration;

/// How often to poll and how long to keep trying.
///
/// `max_attempts * interval` must roughly equal `total_budget` (within one
/// interval) so the visible countdown and the attempt budget run out together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    interval: Duration,
    max_attempts: u32,
    total_budget: Duration,
}

impl PollingPolicy {
    pub fn new(
        interval: Duration,
        max_attempts: u32,
        total_budget: Duration,
    ) -> Result<Self, PolicyError> {
        if interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if total_budget.is_zero() {
            return Err(PolicyError::ZeroBudget);
        }

        let planned = interval.saturating_mul(max_attempts);
        let drift = if planned > total_budget {
            planned - total_budget
        } else {
            total_budget - planned
        };
        if drift > interval {
            return Err(PolicyError::Inconsistent {
                interval_ms: interval.as_millis() as u64,
                max_attempts,
                budget_ms: total_budget.as_millis() as u64,
            });
        }

        Ok(Self {
            interval,
            max_attempts,
            total_budget,
        })
    }

    pub fn from_millis(
        interval_ms: u64,
        max_attempts: u32,
        total_budget_ms: u64,
    ) -> Result<Self, PolicyError> {
        Self::new(
            Duration::from_millis(interval_ms),
            max_attempts,
            Duration::from_millis(total_budget_ms),
        )
    }

    /// Quick in-checkout confirmation: one check per second for two minutes.
    pub fn modal() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
            total_budget: Duration::from_secs(120),
        }
    }

    /// Long-lived confirmation page: one check every five seconds for ten minutes.
    pub fn confirmation_page() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            total_budget: Duration::from_secs(600),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn total_budget(&self) -> Duration {
        self.total_budget
    }
}
