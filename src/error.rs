//! Atelier error types

use std::time::Duration;

/// Atelier error types
#[derive(Debug, thiserror::Error)]
pub enum AtelierError {
    // Policy rejections (client-class, never retried)
    #[error("{stage}: {reason}")]
    PolicyViolation { stage: &'static str, reason: String },

    #[error("budget exceeded: {reason}")]
    BudgetExceeded { reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} is disabled")]
    FeatureDisabled(String),

    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("provider {provider} failed ({status:?}): {message}")]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Attempt aborted by the per-attempt deadline.
    #[error("provider {provider} timed out on {endpoint} after {after:?}")]
    Timeout {
        provider: String,
        endpoint: String,
        after: Duration,
    },

    /// Attempt rejected by the circuit breaker without reaching the provider.
    #[error("circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("{0}")]
    NoProvider(String),

    #[error("empty response from provider")]
    EmptyResponse,

    // Post-call screening
    #[error("{stage}: {reason}")]
    QualityCheck { stage: &'static str, reason: String },

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AtelierError {
    /// Upstream HTTP status, when the failure came from a provider response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AtelierError::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// Stable failure category used by retry classification.
    pub fn category(&self) -> &'static str {
        match self {
            AtelierError::PolicyViolation { .. } => "policy",
            AtelierError::BudgetExceeded { .. } => "budget",
            AtelierError::InvalidInput(_) => "invalid_input",
            AtelierError::FeatureDisabled(_) => "feature_disabled",
            AtelierError::Http(_) => "http",
            AtelierError::Connect(_) => "connect",
            AtelierError::Provider { .. } => "provider",
            AtelierError::Timeout { .. } => "timeout",
            AtelierError::CircuitOpen { .. } => "circuit_open",
            AtelierError::NoProvider(_) => "no_provider",
            AtelierError::EmptyResponse => "empty_response",
            AtelierError::QualityCheck { .. } => "quality",
            AtelierError::Json(_) => "json",
            AtelierError::Configuration(_) => "configuration",
        }
    }

    /// Whether the failure was raised by screening or budget rules rather
    /// than by a provider. These are surfaced to the caller as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AtelierError::PolicyViolation { .. }
                | AtelierError::BudgetExceeded { .. }
                | AtelierError::InvalidInput(_)
                | AtelierError::FeatureDisabled(_)
        )
    }

    /// Pipeline stage responsible for a rejection, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            AtelierError::PolicyViolation { stage, .. }
            | AtelierError::QualityCheck { stage, .. } => Some(*stage),
            AtelierError::BudgetExceeded { .. } => Some("budget"),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AtelierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            AtelierError::Connect(err.to_string())
        } else if err.is_timeout() {
            // reqwest's own client timeout; the executor deadline is separate
            AtelierError::Connect(format!("request timed out: {err}"))
        } else {
            AtelierError::Http(err.to_string())
        }
    }
}

/// Result type alias for Atelier operations
pub type Result<T> = std::result::Result<T, AtelierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_status_is_exposed() {
        let err = AtelierError::Provider {
            provider: "openai".into(),
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.category(), "provider");
        assert!(!err.is_client_error());
    }

    #[test]
    fn policy_violation_carries_stage() {
        let err = AtelierError::PolicyViolation {
            stage: "content_filter",
            reason: "Content contains blocked keyword: forbidden".into(),
        };
        assert!(err.is_client_error());
        assert_eq!(err.stage(), Some("content_filter"));
        assert_eq!(
            err.to_string(),
            "content_filter: Content contains blocked keyword: forbidden"
        );
    }

    #[test]
    fn timeout_is_its_own_category() {
        let err = AtelierError::Timeout {
            provider: "runway".into(),
            endpoint: "/v1/videos/generate".into(),
            after: Duration::from_secs(120),
        };
        assert_eq!(err.category(), "timeout");
        assert_eq!(err.status_code(), None);
    }
}
