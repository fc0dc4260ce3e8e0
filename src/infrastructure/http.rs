use crate::config::GatewayConfig;
use crate::domain::payment::{
    Amount, CreatedPayment, PaymentMethod, PaymentSnapshot, PaymentStatus, TransactionId,
};
use crate::domain::ports::StatusGateway;
use crate::error::{GatewayError, TransientError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Serialize)]
struct CreateRequest<'a> {
    plan_slug: &'a str,
    payment_method: PaymentMethod,
}

#[derive(Serialize)]
struct MarkFailedRequest<'a> {
    reason: &'a str,
}

/// Payment record as embedded in gateway responses. Every field is optional:
/// the gateway is not consistent about which ones it fills in.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PaymentBody {
    transaction_id: Option<String>,
    checkout_url: Option<String>,
    amount: Option<Amount>,
    payment_method: Option<String>,
    error_message: Option<String>,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    payment: Option<PaymentBody>,
    #[serde(default)]
    checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    status: PaymentStatus,
    #[serde(flatten)]
    top: PaymentBody,
    #[serde(default)]
    payment: Option<PaymentBody>,
}

/// `StatusGateway` over the backend's REST endpoints.
///
/// Holds only a connection pool and configuration, so clones are cheap and can
/// be shared between engines.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| format!("{} cannot be used as a base URL", self.config.base_url))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn transient(error: reqwest::Error) -> TransientError {
    if error.is_timeout() {
        TransientError::Timeout
    } else {
        TransientError::Network(error.to_string())
    }
}

/// Pulls a human readable message out of an error body (`error`, then `message`).
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            ["error", "message"]
                .iter()
                .find_map(|key| json.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body.trim().to_string()
            }
        })
}

fn checkout_url(response: &CreateResponse) -> Option<String> {
    let payment = response.payment.as_ref();
    let metadata = payment.and_then(|p| p.metadata.as_ref());
    metadata
        .and_then(|m| m.get("checkout_url"))
        .or_else(|| metadata.and_then(|m| m.pointer("/paysuite_response/data/checkout_url")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| payment.and_then(|p| p.checkout_url.clone()))
        .or_else(|| response.checkout_url.clone())
        .filter(|url| !url.is_empty())
}

#[async_trait]
impl StatusGateway for HttpGateway {
    async fn create_payment(
        &self,
        plan_ref: &str,
        method: PaymentMethod,
    ) -> Result<CreatedPayment, GatewayError> {
        let url = self
            .endpoint(&["subscriptions", "payments", "create"])
            .map_err(GatewayError::Transport)?;
        let request = self.client.post(url).json(&CreateRequest {
            plan_slug: plan_ref,
            payment_method: method,
        });
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: CreateResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        let checkout_url = checkout_url(&parsed);
        if checkout_url.is_none() {
            tracing::warn!("creation response carried no checkout URL");
        }

        let payment = parsed.payment.unwrap_or_default();
        let transaction_id = payment
            .transaction_id
            .and_then(|id| TransactionId::new(id).ok())
            .ok_or(GatewayError::MissingTransactionId)?;

        tracing::info!(%transaction_id, %method, plan = plan_ref, "payment created");
        Ok(CreatedPayment {
            transaction_id,
            checkout_url,
            metadata: payment.metadata.unwrap_or(Value::Null),
        })
    }

    async fn check_status(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<PaymentSnapshot, TransientError> {
        let url = self
            .endpoint(&["subscriptions", "payments", "check", transaction_id.as_str()])
            .map_err(TransientError::Malformed)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        let body = response.text().await.map_err(transient)?;
        if !status.is_success() {
            return Err(TransientError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let parsed: CheckResponse =
            serde_json::from_str(&body).map_err(|e| TransientError::Malformed(e.to_string()))?;
        let nested = parsed.payment.unwrap_or_default();
        let top = parsed.top;

        Ok(PaymentSnapshot {
            transaction_id: transaction_id.clone(),
            status: parsed.status,
            amount: top.amount.or(nested.amount).unwrap_or(Amount::ZERO),
            method: top
                .payment_method
                .or(nested.payment_method)
                .and_then(|m| m.parse().ok())
                .unwrap_or_default(),
            checkout_url: top.checkout_url.or(nested.checkout_url),
            error_message: top.error_message.or(nested.error_message),
            metadata: nested.metadata.or(top.metadata).unwrap_or(Value::Null),
        })
    }

    async fn mark_failed(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<(), TransientError> {
        let url = self
            .endpoint(&["subscriptions", "payments", transaction_id.as_str(), "mark-failed"])
            .map_err(TransientError::Malformed)?;
        let request = self.client.post(url).json(&MarkFailedRequest { reason });
        let response = self.authorize(request).send().await.map_err(transient)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TransientError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let config = GatewayConfig::new(Url::parse("http://localhost:8000/api").unwrap());
        let gateway = HttpGateway::new(config).unwrap();
        let url = gateway
            .endpoint(&["subscriptions", "payments", "check", "a b/c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/subscriptions/payments/check/a%20b%2Fc/"
        );
    }

    #[test]
    fn test_checkout_url_lookup_order() {
        let response: CreateResponse = serde_json::from_str(
            r#"{
                "checkout_url": "https://top",
                "payment": {
                    "transaction_id": "PAY-1",
                    "checkout_url": "https://payment",
                    "metadata": {"paysuite_response": {"data": {"checkout_url": "https://paysuite"}}}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(checkout_url(&response).as_deref(), Some("https://paysuite"));

        let response: CreateResponse =
            serde_json::from_str(r#"{"checkout_url": "https://top", "payment": {}}"#).unwrap();
        assert_eq!(checkout_url(&response).as_deref(), Some("https://top"));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error": "plan not found"}"#),
            "plan not found"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"message": "try again"}"#),
            "try again"
        );
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
    }
}
