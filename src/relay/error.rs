use crate::provider::MintError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Relay error types. All of them surface as `500` with a structured body.
#[derive(Debug)]
pub enum RelayError {
    /// The long-lived provider secret is not configured
    NotConfigured,

    /// Minting the session credential upstream failed
    Upstream(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured | Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        "server_error"
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotConfigured => "Relay secret is not configured".to_string(),
            Self::Upstream(msg) => format!("Failed to generate token: {}", msg),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "message": self.message(),
                "type": self.error_type(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<MintError> for RelayError {
    fn from(err: MintError) -> Self {
        tracing::error!("Token minting failed: {}", err);
        Self::Upstream(err.to_string())
    }
}
