use crate::domain::payment::{
    CreatedPayment, PaymentMethod, PaymentSnapshot, PaymentStatus, TransactionId,
};
use crate::domain::ports::{StatsRefresh, StatusGateway};
use crate::error::{GatewayError, TransientError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// One scripted answer to a status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Status(PaymentStatus),
    Transient,
}

impl FromStr for ScriptStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ScriptStep::Status(PaymentStatus::Pending)),
            "completed" => Ok(ScriptStep::Status(PaymentStatus::Completed)),
            "failed" => Ok(ScriptStep::Status(PaymentStatus::Failed)),
            "transient" | "error" => Ok(ScriptStep::Transient),
            other => Err(format!("unknown script step '{other}'")),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    created: u64,
    checks: u64,
    mark_failed_calls: Vec<(TransactionId, String)>,
}

/// An in-memory gateway that answers status checks from a script.
///
/// Once the script runs out every further check answers `fallback`
/// (`pending` by default). Clones share the same script and call log.
#[derive(Debug, Clone)]
pub struct ScriptedGateway {
    state: Arc<RwLock<ScriptState>>,
    fallback: ScriptStep,
    latency: Duration,
    mark_failed_latency: Duration,
    creation_error: Option<GatewayError>,
    mark_failed_error: Option<TransientError>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedGateway {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ScriptState {
                steps: steps.into_iter().collect(),
                ..Default::default()
            })),
            fallback: ScriptStep::Status(PaymentStatus::Pending),
            latency: Duration::ZERO,
            mark_failed_latency: Duration::ZERO,
            creation_error: None,
            mark_failed_error: None,
        }
    }

    /// Answer used after the script is exhausted.
    pub fn with_fallback(mut self, fallback: ScriptStep) -> Self {
        self.fallback = fallback;
        self
    }

    /// Delay applied to every status check.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay applied to every `mark_failed` call, before it is recorded.
    pub fn with_mark_failed_latency(mut self, latency: Duration) -> Self {
        self.mark_failed_latency = latency;
        self
    }

    /// Makes every `create_payment` call fail with `error`.
    pub fn failing_creation(mut self, error: GatewayError) -> Self {
        self.creation_error = Some(error);
        self
    }

    /// Makes every `mark_failed` call fail with `error` (after recording it).
    pub fn failing_mark_failed(mut self, error: TransientError) -> Self {
        self.mark_failed_error = Some(error);
        self
    }

    pub async fn check_count(&self) -> u64 {
        self.state.read().await.checks
    }

    pub async fn created_count(&self) -> u64 {
        self.state.read().await.created
    }

    pub async fn mark_failed_calls(&self) -> Vec<(TransactionId, String)> {
        self.state.read().await.mark_failed_calls.clone()
    }
}

#[async_trait]
impl StatusGateway for ScriptedGateway {
    async fn create_payment(
        &self,
        plan_ref: &str,
        method: PaymentMethod,
    ) -> Result<CreatedPayment, GatewayError> {
        if let Some(error) = &self.creation_error {
            return Err(error.clone());
        }
        let mut state = self.state.write().await;
        state.created += 1;
        let transaction_id = TransactionId::new(format!("SIM-{}", state.created))
            .map_err(|_| GatewayError::MissingTransactionId)?;
        Ok(CreatedPayment {
            checkout_url: Some(format!("https://checkout.invalid/{transaction_id}")),
            transaction_id,
            metadata: serde_json::json!({ "plan_slug": plan_ref, "payment_method": method }),
        })
    }

    async fn check_status(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<PaymentSnapshot, TransientError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let step = {
            let mut state = self.state.write().await;
            state.checks += 1;
            state.steps.pop_front().unwrap_or(self.fallback)
        };
        match step {
            ScriptStep::Status(status) => {
                let mut snapshot = PaymentSnapshot::with_status(transaction_id.clone(), status);
                if status == PaymentStatus::Failed {
                    snapshot.error_message = Some("payment rejected".to_string());
                }
                Ok(snapshot)
            }
            ScriptStep::Transient => Err(TransientError::Network("scripted failure".to_string())),
        }
    }

    async fn mark_failed(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<(), TransientError> {
        if !self.mark_failed_latency.is_zero() {
            tokio::time::sleep(self.mark_failed_latency).await;
        }
        self.state
            .write()
            .await
            .mark_failed_calls
            .push((transaction_id.clone(), reason.to_string()));
        match &self.mark_failed_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Stats hook that only counts how many times it fired.
#[derive(Debug, Default)]
pub struct RefreshCounter {
    count: AtomicU64,
}

impl RefreshCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl StatsRefresh for RefreshCounter {
    fn refresh(&self) {
        let previous = self.count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(from = previous, to = previous + 1, "stats refresh triggered");
    }
}
