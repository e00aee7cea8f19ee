mod client;

pub use client::ProviderClient;

/// Result of probing the provider with a candidate credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The provider accepted the credential
    Valid,
    /// The provider answered with a non-success status
    Rejected(u16),
    /// No answer: DNS, TLS, timeout or connection failure
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Failure to mint an ephemeral session credential
#[derive(Debug, thiserror::Error)]
pub enum MintError {
    #[error("provider returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("invalid provider response: {0}")]
    Decode(String),
}
