use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use paytrack::application::session::SessionController;
use paytrack::config::{GatewayConfig, PolicyOverrides, PolicyProfile};
use paytrack::domain::payment::{PaymentMethod, TransactionId};
use paytrack::domain::ports::{GatewayRef, ObserverBox};
use paytrack::domain::reconciliation::Outcome;
use paytrack::infrastructure::clock::TokioClock;
use paytrack::infrastructure::http::HttpGateway;
use paytrack::infrastructure::in_memory::{RefreshCounter, ScriptStep, ScriptedGateway};
use paytrack::interfaces::csv::event_writer::EventWriter;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the payment backend
    #[arg(long, env = "PAYTRACK_BASE_URL", global = true)]
    base_url: Option<Url>,

    /// Bearer token sent with every request
    #[arg(long, env = "PAYTRACK_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Upper bound on a single gateway request, in milliseconds
    #[arg(long, global = true)]
    request_timeout_ms: Option<u64>,

    /// Polling profile (defaults to `modal`, or `confirmation-page` for `track`)
    #[arg(long, value_enum, global = true)]
    profile: Option<PolicyProfile>,

    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    #[arg(long, global = true)]
    budget_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a payment and track it until it resolves
    Checkout {
        #[arg(long)]
        plan: String,
        #[arg(long, default_value = "mpesa")]
        method: PaymentMethod,
    },
    /// Track an existing transaction
    Track { transaction_id: String },
    /// Run against a scripted gateway, without network
    Simulate {
        /// Status check answers, in order (pending, completed, failed, transient)
        #[arg(long, value_delimiter = ',')]
        script: Vec<ScriptStep>,
        /// Answer once the script is exhausted
        #[arg(long, default_value = "pending")]
        fallback: ScriptStep,
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
        #[arg(long, default_value = "premium")]
        plan: String,
        #[arg(long, default_value = "mpesa")]
        method: PaymentMethod,
    },
}

impl Cli {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            interval_ms: self.interval_ms,
            max_attempts: self.max_attempts,
            budget_ms: self.budget_ms,
        }
    }

    fn default_profile(&self) -> PolicyProfile {
        match self.command {
            Command::Track { .. } => PolicyProfile::ConfirmationPage,
            _ => PolicyProfile::Modal,
        }
    }

    fn http_gateway(&self) -> Result<GatewayRef> {
        let base_url = self
            .base_url
            .clone()
            .ok_or_else(|| miette!("--base-url (or PAYTRACK_BASE_URL) is required"))?;
        let mut config = GatewayConfig::new(base_url);
        if let Some(token) = &self.token {
            config = config.with_bearer_token(token.clone());
        }
        if let Some(timeout) = self.request_timeout_ms {
            config = config.with_request_timeout(Duration::from_millis(timeout));
        }
        Ok(Arc::new(HttpGateway::new(config).into_diagnostic()?))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paytrack=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let profile = cli.profile.unwrap_or_else(|| cli.default_profile());
    let policy = cli.overrides().apply(profile).into_diagnostic()?;

    let gateway: GatewayRef = match &cli.command {
        Command::Simulate {
            script,
            fallback,
            latency_ms,
            ..
        } => Arc::new(
            ScriptedGateway::new(script.iter().copied())
                .with_fallback(*fallback)
                .with_latency(Duration::from_millis(*latency_ms)),
        ),
        _ => cli.http_gateway()?,
    };

    let stats = Arc::new(RefreshCounter::new());
    let mut session = SessionController::new(gateway, Arc::new(TokioClock), policy)
        .with_stats_refresh(stats)
        .with_observer_factory(Box::new(|| {
            Box::new(EventWriter::new(io::stdout())) as ObserverBox
        }));

    match &cli.command {
        Command::Checkout { plan, method } | Command::Simulate { plan, method, .. } => {
            let created = session.checkout(plan, *method).await.into_diagnostic()?;
            match &created.checkout_url {
                Some(url) => eprintln!("Complete the payment at: {url}"),
                None => eprintln!("Confirm the payment on your phone."),
            }
        }
        Command::Track { transaction_id } => {
            let transaction_id = TransactionId::new(transaction_id.as_str()).into_diagnostic()?;
            session.track(transaction_id).into_diagnostic()?;
        }
    }

    let outcome = tokio::select! {
        outcome = session.wait_resolved() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling");
            session.cancel();
            session.state().outcome()
        }
    };
    let transaction_id = session.transaction_id();
    session.shutdown().await;

    let Some(outcome) = outcome else {
        return Err(miette!("tracking ended without an outcome"));
    };
    info!(transaction_id = ?transaction_id, %outcome, "done");

    Ok(match outcome {
        Outcome::Completed | Outcome::Cancelled => ExitCode::SUCCESS,
        Outcome::Failed => {
            eprintln!("Payment failed. Run checkout again to retry with a new payment.");
            ExitCode::from(2)
        }
        Outcome::TimedOut => {
            eprintln!(
                "Payment was not confirmed in time. Run checkout again to retry with a new payment."
            );
            ExitCode::from(3)
        }
    })
}
