use super::payment::{CreatedPayment, PaymentMethod, PaymentSnapshot, TransactionId};
use super::reconciliation::{Outcome, ReconciliationState};
use crate::error::{GatewayError, TransientError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The remote payment gateway.
///
/// Implementations hold no per-transaction state, so one instance can serve
/// any number of engines concurrently.
#[async_trait]
pub trait StatusGateway: Send + Sync {
    /// Initiates a payment. Called at most once per user checkout, never retried here.
    async fn create_payment(
        &self,
        plan_ref: &str,
        method: PaymentMethod,
    ) -> Result<CreatedPayment, GatewayError>;

    /// Reads the current remote truth. Safe to call repeatedly.
    async fn check_status(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<PaymentSnapshot, TransientError>;

    /// Best-effort notice that the payment was locally given up on.
    async fn mark_failed(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<(), TransientError>;
}

pub type GatewayRef = Arc<dyn StatusGateway>;

/// A periodic tick stream.
#[async_trait]
pub trait Ticker: Send {
    /// Completes on the next tick. The first tick is one period after creation.
    async fn tick(&mut self);
}

/// Source of tickers, so the engine can run on real timers or a test clock.
pub trait Clock: Send + Sync {
    fn ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

pub type ClockRef = Arc<dyn Clock>;

/// Receives engine transitions.
///
/// Callbacks run while the engine holds its state lock: they must not call
/// back into the engine that invoked them.
pub trait ReconciliationObserver: Send {
    /// Called once, when the engine binds to its transaction and before the
    /// first `Tracking` state is published.
    fn on_tracking_started(&mut self, _transaction_id: &TransactionId) {}

    /// Called on every transition, intermediate tracking updates included.
    fn on_state_change(&mut self, state: &ReconciliationState);

    /// Called exactly once, after the final `on_state_change`.
    fn on_resolved(&mut self, outcome: Outcome);
}

pub type ObserverBox = Box<dyn ReconciliationObserver>;
pub type ObserverFactory = Box<dyn Fn() -> ObserverBox + Send + Sync>;

/// Hook for collaborators that must refresh after a confirmed payment.
pub trait StatsRefresh: Send + Sync {
    fn refresh(&self);
}
