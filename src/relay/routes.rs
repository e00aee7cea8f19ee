use super::{RelayError, RelayState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// GET /health
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            service: "realtime-console-relay".to_string(),
        }),
    )
}

/// GET /token - mint an ephemeral session credential
///
/// The provider's response is returned verbatim; the server-held secret
/// never leaves this process.
pub async fn token(State(state): State<Arc<RelayState>>) -> Result<Json<Value>, RelayError> {
    let secret = state.secret.as_deref().ok_or(RelayError::NotConfigured)?;

    let session = state.provider.mint_session(secret).await?;
    tracing::info!(model = state.provider.model(), "Minted ephemeral session credential");

    Ok(Json(session))
}
