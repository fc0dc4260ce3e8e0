use crate::domain::payment::TransactionId;
use crate::domain::policy::PollingPolicy;
use crate::domain::ports::{ClockRef, GatewayRef, ObserverBox, StatusGateway, Ticker};
use crate::domain::reconciliation::{Outcome, ReconciliationState, Reconciler, Transition};
use crate::error::EngineError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared between the engine handle and its polling task.
///
/// Every transition is applied and published while holding this lock, which
/// gives one total order per engine and lets `dispose` cut off callbacks.
struct Shared {
    reconciler: Reconciler,
    observer: Option<ObserverBox>,
    disposed: bool,
    state_tx: watch::Sender<ReconciliationState>,
}

impl Shared {
    fn publish(&mut self, transition: Transition) {
        if transition == Transition::Ignored || self.disposed {
            return;
        }
        let state = self.reconciler.state().clone();
        self.state_tx.send_replace(state.clone());
        if let Some(observer) = self.observer.as_mut() {
            observer.on_state_change(&state);
            if let Transition::Resolved(outcome) = transition {
                observer.on_resolved(outcome);
            }
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks one transaction until it resolves.
///
/// `ReconciliationEngine` polls the gateway on a single ticker; each tick feeds
/// one status check into the [`Reconciler`], so the countdown and the attempt
/// budget can never drift apart. It finalizes exactly once, on a terminal
/// gateway status, on budget exhaustion, or on [`cancel`](Self::cancel).
///
/// After [`dispose`](Self::dispose) returns no observer callback runs again,
/// even if a status check was still in flight. Dropping the engine disposes it.
pub struct ReconciliationEngine {
    gateway: GatewayRef,
    clock: ClockRef,
    shared: Arc<Mutex<Shared>>,
    state_rx: watch::Receiver<ReconciliationState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReconciliationEngine {
    pub fn new(gateway: GatewayRef, clock: ClockRef, policy: PollingPolicy) -> Self {
        let (state_tx, state_rx) = watch::channel(ReconciliationState::Idle);
        Self {
            gateway,
            clock,
            shared: Arc::new(Mutex::new(Shared {
                reconciler: Reconciler::new(policy),
                observer: None,
                disposed: false,
                state_tx,
            })),
            state_rx,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn with_observer(self, observer: ObserverBox) -> Self {
        lock(&self.shared).observer = Some(observer);
        self
    }

    /// Marks the engine as waiting for the gateway to create the payment.
    pub fn begin_creation(&self) -> Result<(), EngineError> {
        let mut shared = lock(&self.shared);
        if shared.disposed {
            return Err(EngineError::Disposed);
        }
        shared.reconciler.begin_creation()?;
        shared.publish(Transition::Advanced);
        Ok(())
    }

    /// Creation failed: back to `Idle`, nothing gets tracked.
    pub fn abort_creation(&self) {
        let mut shared = lock(&self.shared);
        let transition = shared.reconciler.abort_creation();
        shared.publish(transition);
    }

    /// Binds the engine to `transaction_id` and starts polling.
    ///
    /// Must be called from within a Tokio runtime. The first status check
    /// happens one poll interval after this call.
    pub fn start(&mut self, transaction_id: TransactionId) -> Result<(), EngineError> {
        let policy = {
            let mut shared = lock(&self.shared);
            if shared.disposed {
                return Err(EngineError::Disposed);
            }
            shared.reconciler.start(transaction_id.clone())?;
            if let Some(observer) = shared.observer.as_mut() {
                observer.on_tracking_started(&transaction_id);
            }
            shared.publish(Transition::Advanced);
            *shared.reconciler.policy()
        };

        info!(
            %transaction_id,
            interval_ms = policy.interval().as_millis() as u64,
            max_attempts = policy.max_attempts(),
            budget_ms = policy.total_budget().as_millis() as u64,
            "tracking payment"
        );

        // Created before spawning so no tick is lost to task scheduling.
        let ticker = self.clock.ticker(policy.interval());
        self.task = Some(tokio::spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(&self.gateway),
            ticker,
            self.cancel.clone(),
            transaction_id,
            policy,
        )));
        Ok(())
    }

    /// Resolves as `Cancelled` unless already resolved. The gateway is not told.
    pub fn cancel(&self) {
        {
            let mut shared = lock(&self.shared);
            let transition = shared.reconciler.cancel();
            if transition != Transition::Ignored {
                info!(transaction_id = ?shared.reconciler.transaction_id(), "tracking cancelled");
            }
            shared.publish(transition);
        }
        self.cancel.cancel();
    }

    /// Stops all timers and detaches the observer. Idempotent.
    pub fn dispose(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            shared.observer = None;
            debug!(transaction_id = ?shared.reconciler.transaction_id(), "engine disposed");
        }
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared).disposed
    }

    /// Whether the polling task is still alive.
    pub fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn state(&self) -> ReconciliationState {
        self.state_rx.borrow().clone()
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        lock(&self.shared).reconciler.transaction_id().cloned()
    }

    /// Watches every published state.
    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState> {
        self.state_rx.clone()
    }

    /// Waits for the terminal outcome. `None` if the engine is disposed first.
    pub async fn wait_resolved(&self) -> Option<Outcome> {
        let mut rx = self.state_rx.clone();
        tokio::select! {
            biased;
            resolved = rx.wait_for(ReconciliationState::is_resolved) => {
                resolved.ok().and_then(|state| state.outcome())
            }
            _ = self.cancel.cancelled() => self.state().outcome(),
        }
    }

    /// Disposes the engine and waits for its task, including a pending
    /// timeout notice, to finish.
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            warn!(%error, "polling task ended abnormally");
        }
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(
    shared: Arc<Mutex<Shared>>,
    gateway: GatewayRef,
    mut ticker: Box<dyn Ticker>,
    cancel: CancellationToken,
    transaction_id: TransactionId,
    policy: PollingPolicy,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let poll = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%transaction_id, "status check abandoned");
                break;
            }
            result = gateway.check_status(&transaction_id) => result,
        };
        if let Err(error) = &poll {
            warn!(%transaction_id, %error, "status check failed, will retry on next tick");
        }

        let transition = {
            let mut shared = lock(&shared);
            if shared.disposed {
                debug!(%transaction_id, "discarding status received after dispose");
                break;
            }
            let transition = shared.reconciler.tick(poll);
            if let Some(tracking) = shared.reconciler.state().tracking() {
                debug!(
                    %transaction_id,
                    attempt = tracking.attempts,
                    max_attempts = policy.max_attempts(),
                    remaining_secs = tracking.remaining_seconds(),
                    "payment still pending"
                );
            }
            shared.publish(transition);
            transition
        };

        match transition {
            Transition::Advanced => continue,
            Transition::Ignored => {
                debug!(%transaction_id, "discarding status received after resolution");
                break;
            }
            Transition::Resolved(outcome) => {
                info!(%transaction_id, %outcome, "payment resolved");
                if outcome == Outcome::TimedOut {
                    report_timeout(gateway.as_ref(), &transaction_id, &policy).await;
                }
                break;
            }
        }
    }
}

/// Tells the gateway we gave up. Runs after `TimedOut` is already published and
/// outside the cancellation select, so neither the outcome nor `dispose` waits
/// on it; a failure here is only logged.
async fn report_timeout(
    gateway: &dyn StatusGateway,
    transaction_id: &TransactionId,
    policy: &PollingPolicy,
) {
    let reason = format!(
        "payment not confirmed within {}s",
        policy.total_budget().as_secs()
    );
    match gateway.mark_failed(transaction_id, &reason).await {
        Ok(()) => debug!(%transaction_id, "gateway notified of timeout"),
        Err(error) => warn!(%transaction_id, %error, "could not notify gateway of timeout"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;
    use crate::domain::ports::ReconciliationObserver;
    use crate::infrastructure::clock::{ManualClock, TokioClock};
    use crate::infrastructure::in_memory::{ScriptStep, ScriptedGateway};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl ReconciliationObserver for Calls {
        fn on_tracking_started(&mut self, transaction_id: &TransactionId) {
            self.0.lock().unwrap().push(format!("started:{transaction_id}"));
        }

        fn on_state_change(&mut self, state: &ReconciliationState) {
            self.0.lock().unwrap().push(state.name().to_string());
        }

        fn on_resolved(&mut self, outcome: Outcome) {
            self.0.lock().unwrap().push(format!("resolved:{outcome}"));
        }
    }

    fn policy() -> PollingPolicy {
        PollingPolicy::from_millis(1000, 5, 5000).unwrap()
    }

    fn tx() -> TransactionId {
        TransactionId::new("PAY-1").unwrap()
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut engine = ReconciliationEngine::new(gateway, Arc::new(ManualClock::new()), policy());
        engine.start(tx()).unwrap();
        assert_eq!(engine.start(tx()), Err(EngineError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_manual_clock_drives_attempts() {
        let clock = ManualClock::new();
        let gateway = Arc::new(ScriptedGateway::default());
        let mut engine = ReconciliationEngine::new(gateway.clone(), Arc::new(clock.clone()), policy());
        let mut rx = engine.subscribe();
        engine.start(tx()).unwrap();

        clock.advance(2);
        let state = rx
            .wait_for(|s| s.tracking().is_some_and(|t| t.attempts == 2))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.tracking().unwrap().remaining_seconds(), 3);
        assert_eq!(gateway.check_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_transition_once() {
        let calls = Calls::default();
        let gateway = Arc::new(ScriptedGateway::new([
            ScriptStep::Status(PaymentStatus::Pending),
            ScriptStep::Status(PaymentStatus::Completed),
        ]));
        let mut engine = ReconciliationEngine::new(gateway, Arc::new(TokioClock), policy())
            .with_observer(Box::new(calls.clone()));
        engine.start(tx()).unwrap();

        assert_eq!(engine.wait_resolved().await, Some(Outcome::Completed));
        assert_eq!(
            *calls.0.lock().unwrap(),
            vec![
                "started:PAY-1",
                "tracking",
                "tracking",
                "resolved",
                "resolved:completed"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_once_and_stops_polling() {
        let calls = Calls::default();
        let gateway = Arc::new(ScriptedGateway::default());
        let mut engine = ReconciliationEngine::new(gateway.clone(), Arc::new(TokioClock), policy())
            .with_observer(Box::new(calls.clone()));
        engine.start(tx()).unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        engine.cancel();
        engine.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!engine.is_polling());
        assert_eq!(engine.state(), ReconciliationState::Resolved(Outcome::Cancelled));
        assert_eq!(gateway.check_count().await, 1);
        let resolved: Vec<_> = calls
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("resolved:"))
            .cloned()
            .collect();
        assert_eq!(resolved, vec!["resolved:cancelled"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_timeout_notice() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut engine = ReconciliationEngine::new(gateway.clone(), Arc::new(TokioClock), policy());
        engine.start(tx()).unwrap();

        assert_eq!(engine.wait_resolved().await, Some(Outcome::TimedOut));
        engine.shutdown().await;
        assert_eq!(
            gateway.mark_failed_calls().await,
            vec![(tx(), "payment not confirmed within 5s".to_string())]
        );
    }

    #[tokio::test]
    async fn test_start_after_dispose_rejected() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut engine = ReconciliationEngine::new(gateway, Arc::new(ManualClock::new()), policy());
        engine.dispose();
        engine.dispose();
        assert!(engine.is_disposed());
        assert_eq!(engine.start(tx()), Err(EngineError::Disposed));
        assert_eq!(engine.wait_resolved().await, None);
    }
}
