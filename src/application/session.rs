use crate::application::engine::ReconciliationEngine;
use crate::domain::payment::{CreatedPayment, PaymentMethod, TransactionId};
use crate::domain::policy::PollingPolicy;
use crate::domain::ports::{
    ClockRef, GatewayRef, ObserverBox, ObserverFactory, ReconciliationObserver, StatsRefresh,
};
use crate::domain::reconciliation::{Outcome, ReconciliationState};
use crate::error::{EngineError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Forwards engine events to the UI observer and fires the stats hook on success.
struct SessionObserver {
    inner: Option<ObserverBox>,
    stats: Option<Arc<dyn StatsRefresh>>,
}

impl ReconciliationObserver for SessionObserver {
    fn on_tracking_started(&mut self, transaction_id: &TransactionId) {
        if let Some(inner) = self.inner.as_mut() {
            inner.on_tracking_started(transaction_id);
        }
    }

    fn on_state_change(&mut self, state: &ReconciliationState) {
        if let Some(inner) = self.inner.as_mut() {
            inner.on_state_change(state);
        }
    }

    fn on_resolved(&mut self, outcome: Outcome) {
        if let Some(inner) = self.inner.as_mut() {
            inner.on_resolved(outcome);
        }
        if outcome == Outcome::Completed
            && let Some(stats) = &self.stats
        {
            stats.refresh();
        }
    }
}

/// Owns the engine of the transaction currently on screen.
///
/// A session starts at most one engine per transaction, replaces it only with
/// a brand-new transaction on [`retry`](Self::retry), and disposes whatever it
/// owns exactly once when it is disposed or dropped.
pub struct SessionController {
    gateway: GatewayRef,
    clock: ClockRef,
    policy: PollingPolicy,
    stats: Option<Arc<dyn StatsRefresh>>,
    observers: Option<ObserverFactory>,
    engine: Option<ReconciliationEngine>,
    /// Every transaction this session has started an engine for.
    started: HashSet<TransactionId>,
    disposed: bool,
}

impl SessionController {
    pub fn new(gateway: GatewayRef, clock: ClockRef, policy: PollingPolicy) -> Self {
        Self {
            gateway,
            clock,
            policy,
            stats: None,
            observers: None,
            engine: None,
            started: HashSet::new(),
            disposed: false,
        }
    }

    /// Hook invoked once per transaction that resolves as `Completed`.
    pub fn with_stats_refresh(mut self, stats: Arc<dyn StatsRefresh>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Builds a fresh observer for each engine the session starts.
    pub fn with_observer_factory(mut self, observers: ObserverFactory) -> Self {
        self.observers = Some(observers);
        self
    }

    pub fn policy(&self) -> &PollingPolicy {
        &self.policy
    }

    fn new_engine(&self) -> ReconciliationEngine {
        let observer = SessionObserver {
            inner: self.observers.as_ref().map(|factory| factory()),
            stats: self.stats.clone(),
        };
        ReconciliationEngine::new(Arc::clone(&self.gateway), Arc::clone(&self.clock), self.policy)
            .with_observer(Box::new(observer))
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        match &self.engine {
            Some(engine) if !engine.state().is_resolved() => Err(EngineError::AlreadyStarted),
            _ => Ok(()),
        }
    }

    /// Creates a payment and starts tracking it.
    ///
    /// A creation failure is returned as-is and leaves the session without an
    /// engine; nothing is retried.
    pub async fn checkout(&mut self, plan_ref: &str, method: PaymentMethod) -> Result<CreatedPayment> {
        self.ensure_idle()?;
        self.release_engine();

        let mut engine = self.new_engine();
        engine.begin_creation()?;

        match self.gateway.create_payment(plan_ref, method).await {
            Ok(created) => {
                if self.started.contains(&created.transaction_id) {
                    warn!(transaction_id = %created.transaction_id, "gateway reused a transaction id");
                    engine.dispose();
                    return Err(EngineError::AlreadyStarted.into());
                }
                engine.start(created.transaction_id.clone())?;
                self.started.insert(created.transaction_id.clone());
                self.engine = Some(engine);
                Ok(created)
            }
            Err(error) => {
                warn!(plan = plan_ref, %method, %error, "payment creation failed");
                engine.abort_creation();
                engine.dispose();
                Err(error.into())
            }
        }
    }

    /// Starts tracking a transaction created elsewhere.
    ///
    /// A transaction is tracked at most once per session, even after another
    /// one was tracked in between.
    pub fn track(&mut self, transaction_id: TransactionId) -> Result<()> {
        self.ensure_idle()?;
        if self.started.contains(&transaction_id) {
            return Err(EngineError::AlreadyStarted.into());
        }
        self.release_engine();

        let mut engine = self.new_engine();
        engine.start(transaction_id.clone())?;
        self.started.insert(transaction_id);
        self.engine = Some(engine);
        Ok(())
    }

    /// Starts over with a brand-new transaction after `Failed` or `TimedOut`.
    ///
    /// The previous engine is disposed, never resumed.
    pub async fn retry(&mut self, plan_ref: &str, method: PaymentMethod) -> Result<CreatedPayment> {
        match self.state() {
            ReconciliationState::Resolved(outcome) if outcome.is_retryable() => {
                info!(previous = ?self.transaction_id(), %outcome, "retrying with a new payment");
                self.checkout(plan_ref, method).await
            }
            ReconciliationState::Resolved(_) | ReconciliationState::Idle => {
                self.checkout(plan_ref, method).await
            }
            _ => Err(EngineError::AlreadyStarted.into()),
        }
    }

    /// User cancelled: resolves the current engine as `Cancelled`.
    pub fn cancel(&self) {
        if let Some(engine) = &self.engine {
            engine.cancel();
        }
    }

    /// Tears the session down. No observer or stats callback runs after this
    /// returns. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.release_engine();
    }

    /// Like [`dispose`](Self::dispose), but also waits for the engine's task
    /// so a pending timeout notice reaches the gateway.
    pub async fn shutdown(mut self) {
        self.disposed = true;
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
    }

    fn release_engine(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn state(&self) -> ReconciliationState {
        self.engine
            .as_ref()
            .map(ReconciliationEngine::state)
            .unwrap_or_default()
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.engine.as_ref().and_then(ReconciliationEngine::transaction_id)
    }

    /// Waits for the current transaction to resolve.
    ///
    /// `None` when nothing is being tracked or the engine was disposed first.
    pub async fn wait_resolved(&self) -> Option<Outcome> {
        match &self.engine {
            Some(engine) => engine.wait_resolved().await,
            None => None,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.dispose();
    }
}
