use super::{MintError, ProbeOutcome};
use crate::config::ProviderConfig;
use crate::session::SessionError;
use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP client for the realtime provider's REST endpoints
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    voice: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("realtime-console/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            voice: config.voice.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Read-only `GET /models` used to check a credential
    pub async fn probe(&self, credential: &str) -> ProbeOutcome {
        let url = format!("{}/models", self.base_url);

        match self.http.get(&url).bearer_auth(credential).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Valid,
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!(status, "Credential probe rejected");
                ProbeOutcome::Rejected(status)
            }
            Err(e) => {
                tracing::warn!("Credential probe failed: {}", e);
                ProbeOutcome::Unreachable(e.to_string())
            }
        }
    }

    /// Submit the SDP offer and return the provider's SDP answer
    pub async fn negotiate(&self, credential: &str, offer_sdp: String) -> Result<String, SessionError> {
        let url = format!("{}/realtime", self.base_url);

        let response = self
            .http
            .post(&url)
            .query(&[("model", self.model.as_str())])
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp)
            .send()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        if !status.is_success() {
            return Err(SessionError::Handshake {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    /// Mint a short-lived session credential with the server-held secret.
    /// The provider's JSON is returned unchanged.
    pub async fn mint_session(&self, secret: &str) -> Result<Value, MintError> {
        let url = format!("{}/realtime/sessions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(secret)
            .json(&json!({
                "model": self.model,
                "voice": self.voice,
            }))
            .send()
            .await
            .map_err(|e| MintError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MintError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| MintError::Decode(e.to_string()))
    }
}
