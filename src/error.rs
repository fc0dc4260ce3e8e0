use thiserror::Error;

/// Failure to initiate a payment. Surfaced to the caller, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rejected payment creation ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("creation response carried no transaction id")]
    MissingTransactionId,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode creation response: {0}")]
    Decode(String),
}

/// A recoverable failure to reach the gateway.
///
/// The engine treats this as "no new information": it consumes one attempt of the
/// budget and says nothing about the payment itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("gateway answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
    #[error("max attempts must be greater than zero")]
    ZeroAttempts,
    #[error("total budget must be greater than zero")]
    ZeroBudget,
    #[error(
        "{max_attempts} attempts every {interval_ms}ms does not fit a {budget_ms}ms budget"
    )]
    Inconsistent {
        interval_ms: u64,
        max_attempts: u32,
        budget_ms: u64,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine already started")]
    AlreadyStarted,
    #[error("engine has been disposed")]
    Disposed,
    #[error("transaction id must not be empty")]
    InvalidTransactionId,
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Creation(#[from] GatewayError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
