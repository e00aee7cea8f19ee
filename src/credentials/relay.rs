use super::CredentialSource;
use crate::session::SessionError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Fetches an ephemeral credential from the token relay's `GET /token`
pub struct RelayCredentials {
    http: reqwest::Client,
    relay_url: String,
}

impl RelayCredentials {
    pub fn new(relay_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            relay_url: relay_url.trim_end_matches('/').to_string(),
        })
    }
}

/// `{"error":{"message":...}}` as produced by the relay
fn relay_error_message(body: &Value) -> Option<&str> {
    body.get("error")?.get("message")?.as_str()
}

#[async_trait]
impl CredentialSource for RelayCredentials {
    async fn acquire(&self) -> Result<String, SessionError> {
        let url = format!("{}/token", self.relay_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::CredentialUnavailable(format!("relay unreachable: {}", e)))?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            SessionError::CredentialUnavailable(format!("invalid relay response: {}", e))
        })?;

        if !status.is_success() {
            let message = relay_error_message(&body).unwrap_or("relay error");
            return Err(SessionError::CredentialUnavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }

        body.get("client_secret")
            .and_then(|secret| secret.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SessionError::CredentialUnavailable("relay response has no client_secret".into())
            })
    }
}
