//! Runtime configuration: where the gateway lives and which polling policy to use.

use crate::domain::policy::PollingPolicy;
use crate::error::PolicyError;
use clap::ValueEnum;
use std::time::Duration;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the HTTP gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: Url,
    /// Sent as `Authorization: Bearer <token>` on every request.
    pub bearer_token: Option<String>,
    /// Upper bound on one request; exceeding it is a transient error.
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(mut base_url: Url) -> Self {
        // Relative endpoint joins need a directory-like base.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            bearer_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Named polling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyProfile {
    /// 1s interval, 120 attempts, 2 minute budget.
    Modal,
    /// 5s interval, 120 attempts, 10 minute budget.
    ConfirmationPage,
}

impl PolicyProfile {
    pub fn policy(self) -> PollingPolicy {
        match self {
            PolicyProfile::Modal => PollingPolicy::modal(),
            PolicyProfile::ConfirmationPage => PollingPolicy::confirmation_page(),
        }
    }
}

/// Overrides on top of a profile. Any field left `None` keeps the profile's value;
/// the combined result is validated as a whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyOverrides {
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub budget_ms: Option<u64>,
}

impl PolicyOverrides {
    pub fn apply(self, profile: PolicyProfile) -> Result<PollingPolicy, PolicyError> {
        let base = profile.policy();
        if self.interval_ms.is_none() && self.max_attempts.is_none() && self.budget_ms.is_none() {
            return Ok(base);
        }
        PollingPolicy::from_millis(
            self.interval_ms
                .unwrap_or(base.interval().as_millis() as u64),
            self.max_attempts.unwrap_or(base.max_attempts()),
            self.budget_ms
                .unwrap_or(base.total_budget().as_millis() as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = GatewayConfig::new(Url::parse("http://localhost:8000/api").unwrap());
        assert_eq!(config.base_url.as_str(), "http://localhost:8000/api/");
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_overrides_are_validated_together() {
        let none = PolicyOverrides::default();
        assert_eq!(none.apply(PolicyProfile::Modal), Ok(PollingPolicy::modal()));

        let fast = PolicyOverrides {
            interval_ms: Some(10),
            max_attempts: Some(5),
            budget_ms: Some(50),
        };
        let policy = fast.apply(PolicyProfile::Modal).unwrap();
        assert_eq!(policy.max_attempts(), 5);

        // Changing only the interval breaks the 120s budget
        let broken = PolicyOverrides {
            interval_ms: Some(5000),
            ..Default::default()
        };
        assert!(broken.apply(PolicyProfile::Modal).is_err());
    }
}
