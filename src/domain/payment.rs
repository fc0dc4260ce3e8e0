use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier assigned by the gateway when a payment is created.
///
/// It is the only correlation key for every later status check, so an empty
/// id is refused at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(value: impl Into<String>) -> Result<Self, EngineError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EngineError::InvalidTransactionId)
        } else {
            Ok(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote payment status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    /// `refunded` is folded in here: a refunded payment never grants access.
    #[serde(alias = "refunded")]
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mobile-money rail the payer confirms on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Mpesa,
    Emola,
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "mpesa" => Ok(PaymentMethod::Mpesa),
            "emola" => Ok(PaymentMethod::Emola),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Mpesa => f.write_str("mpesa"),
            PaymentMethod::Emola => f.write_str("emola"),
        }
    }
}

/// Non-negative monetary amount as charged by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, String> {
        if value.is_sign_negative() && !value.is_zero() {
            Err("Amount must not be negative".to_string())
        } else {
            Ok(Self(value))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = String;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// One immutable read of the remote payment status.
///
/// A later poll produces a new snapshot; snapshots are never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSnapshot {
    pub transaction_id: TransactionId,
    pub status: PaymentStatus,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub checkout_url: Option<String>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl PaymentSnapshot {
    /// A bare snapshot carrying only a status, handy for gateways that report nothing else.
    pub fn with_status(transaction_id: TransactionId, status: PaymentStatus) -> Self {
        Self {
            transaction_id,
            status,
            amount: Amount::ZERO,
            method: PaymentMethod::default(),
            checkout_url: None,
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Result of a successful `create_payment` call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPayment {
    pub transaction_id: TransactionId,
    pub checkout_url: Option<String>,
    pub metadata: serde_json::Value,
}
