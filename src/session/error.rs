/// Errors that abort `SessionManager::start`.
///
/// Runtime failures on an established session (sending on a closed channel,
/// malformed inbound frames) are not represented here: those are logged and
/// recorded as diagnostics instead of being returned.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No credential configured. Set one with `realtime-console credential set`.")]
    MissingCredential,

    #[error("Invalid credential: the provider rejected it")]
    InvalidCredential,

    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("Microphone unavailable: {0}")]
    Media(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake request failed: {0}")]
    Negotiation(String),

    #[error("Handshake failed (HTTP {status}): {body}")]
    Handshake { status: u16, body: String },
}

impl From<webrtc::Error> for SessionError {
    fn from(e: webrtc::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl SessionError {
    /// Whether the failure happened before any transport resources existed
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::InvalidCredential
                | Self::ProviderUnreachable(_)
                | Self::CredentialUnavailable(_)
        )
    }
}
