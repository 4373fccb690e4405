//! HTTP mapping for gateway errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use crate::AtelierError;

/// Handler error: an [`AtelierError`] rendered as `{error, message, stage?}`.
#[derive(Debug)]
pub struct ApiError(pub AtelierError);

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AtelierError::PolicyViolation { .. } | AtelierError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            AtelierError::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AtelierError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
            AtelierError::NoProvider(_) => StatusCode::SERVICE_UNAVAILABLE,
            AtelierError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AtelierError::Provider { .. }
            | AtelierError::CircuitOpen { .. }
            | AtelierError::Connect(_)
            | AtelierError::Http(_)
            | AtelierError::EmptyResponse => StatusCode::BAD_GATEWAY,
            AtelierError::QualityCheck { .. }
            | AtelierError::Configuration(_)
            | AtelierError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AtelierError> for ApiError {
    fn from(err: AtelierError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), category = self.0.category(), error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), category = self.0.category(), error = %self.0, "request rejected");
        }
        let body = Json(ErrorBody {
            error: self.0.category(),
            message: self.0.to_string(),
            stage: self.0.stage(),
        });
        (status, body).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ApiError {}
