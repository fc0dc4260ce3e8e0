//! The reconciliation state machine.
//!
//! `Reconciler` is a plain value with no timers and no I/O. Every force acting on
//! the payment (a poll result arriving on a tick, the budget running out, the
//! user cancelling) goes through one of its methods, which keeps transitions
//! totally ordered and makes them testable without a runtime.

use crate::domain::payment::{PaymentSnapshot, PaymentStatus, TransactionId};
use crate::domain::policy::PollingPolicy;
use crate::error::{EngineError, TransientError};
use std::fmt;
use std::time::Duration;

/// Terminal outcome of a tracked payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl Outcome {
    /// Whether the UI should offer to start a brand-new checkout.
    pub fn is_retryable(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::TimedOut)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed_out",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Counters of an active tracking session.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracking {
    /// Poll attempts consumed so far, transient failures included.
    pub attempts: u32,
    /// Budget left before the engine declares a local timeout.
    pub remaining: Duration,
    pub last_snapshot: Option<PaymentSnapshot>,
}

impl Tracking {
    /// Countdown shown to the user: `ceil(remaining_ms / 1000)`.
    pub fn remaining_seconds(&self) -> u64 {
        self.remaining.as_millis().div_ceil(1000) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ReconciliationState {
    #[default]
    Idle,
    AwaitingCreation,
    Tracking(Tracking),
    Resolved(Outcome),
}

impl ReconciliationState {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ReconciliationState::Resolved(_))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            ReconciliationState::Resolved(outcome) => Some(*outcome),
            _ => None,
        }
    }

    pub fn tracking(&self) -> Option<&Tracking> {
        match self {
            ReconciliationState::Tracking(tracking) => Some(tracking),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReconciliationState::Idle => "idle",
            ReconciliationState::AwaitingCreation => "awaiting_creation",
            ReconciliationState::Tracking(_) => "tracking",
            ReconciliationState::Resolved(_) => "resolved",
        }
    }
}

/// What a call into the [`Reconciler`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed; the trigger arrived too late or was not applicable.
    Ignored,
    /// Still tracking, counters moved.
    Advanced,
    /// Entered `Resolved`. Returned at most once per reconciler.
    Resolved(Outcome),
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    policy: PollingPolicy,
    transaction_id: Option<TransactionId>,
    state: ReconciliationState,
}

impl Reconciler {
    pub fn new(policy: PollingPolicy) -> Self {
        Self {
            policy,
            transaction_id: None,
            state: ReconciliationState::Idle,
        }
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn policy(&self) -> &PollingPolicy {
        &self.policy
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    /// `Idle -> AwaitingCreation`, while the create call is in flight.
    pub fn begin_creation(&mut self) -> Result<(), EngineError> {
        match self.state {
            ReconciliationState::Idle => {
                self.state = ReconciliationState::AwaitingCreation;
                Ok(())
            }
            _ => Err(EngineError::AlreadyStarted),
        }
    }

    /// Creation failed: go back to `Idle` so nothing is tracked.
    pub fn abort_creation(&mut self) -> Transition {
        match self.state {
            ReconciliationState::AwaitingCreation => {
                self.state = ReconciliationState::Idle;
                Transition::Advanced
            }
            _ => Transition::Ignored,
        }
    }

    /// Binds the reconciler to `transaction_id` and enters `Tracking` with a full budget.
    pub fn start(&mut self, transaction_id: TransactionId) -> Result<(), EngineError> {
        match self.state {
            ReconciliationState::Idle | ReconciliationState::AwaitingCreation => {
                self.transaction_id = Some(transaction_id);
                self.state = ReconciliationState::Tracking(Tracking {
                    attempts: 0,
                    remaining: self.policy.total_budget(),
                    last_snapshot: None,
                });
                Ok(())
            }
            _ => Err(EngineError::AlreadyStarted),
        }
    }

    /// One tick of the shared clock, carrying the poll result gathered on it.
    ///
    /// The tick consumes one attempt and one interval of budget whatever the
    /// result. A terminal gateway status wins over budget exhaustion observed on
    /// the same tick.
    pub fn tick(&mut self, poll: Result<PaymentSnapshot, TransientError>) -> Transition {
        let expected_id = self.transaction_id.clone();
        let ReconciliationState::Tracking(tracking) = &mut self.state else {
            return Transition::Ignored;
        };

        tracking.attempts = tracking.attempts.saturating_add(1);
        tracking.remaining = tracking.remaining.saturating_sub(self.policy.interval());

        let snapshot = match poll {
            Ok(snapshot) if Some(&snapshot.transaction_id) == expected_id.as_ref() => Some(snapshot),
            // A snapshot for another transaction carries no information about ours.
            Ok(_) | Err(_) => None,
        };

        if let Some(snapshot) = snapshot {
            let status = snapshot.status;
            tracking.last_snapshot = Some(snapshot);
            match status {
                PaymentStatus::Completed => return self.resolve(Outcome::Completed),
                PaymentStatus::Failed => return self.resolve(Outcome::Failed),
                PaymentStatus::Pending => {}
            }
        }

        if tracking.attempts >= self.policy.max_attempts() || tracking.remaining.is_zero() {
            return self.resolve(Outcome::TimedOut);
        }
        Transition::Advanced
    }

    /// Explicit cancellation by the owner. Never reported upstream.
    pub fn cancel(&mut self) -> Transition {
        if self.state.is_resolved() {
            return Transition::Ignored;
        }
        self.resolve(Outcome::Cancelled)
    }

    fn resolve(&mut self, outcome: Outcome) -> Transition {
        self.state = ReconciliationState::Resolved(outcome);
        Transition::Resolved(outcome)
    }
}

/// Renders a countdown as `m:ss`.
pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
