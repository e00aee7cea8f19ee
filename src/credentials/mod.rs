//! Bearer credentials used to talk to the provider.
//!
//! A session can get its credential from the local [`CredentialStore`]
//! (a user-supplied key, validated against the provider) or from the token
//! relay via [`RelayCredentials`] (a short-lived key minted server-side).
//! The stored key is never sent to the relay.

mod relay;
mod store;

pub use relay::RelayCredentials;
pub use store::{FileStore, KeyValueStore, MemoryStore};

use crate::config::Config;
use crate::provider::{ProbeOutcome, ProviderClient};
use crate::session::SessionError;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Storage key for the user-supplied credential
pub const CREDENTIAL_KEY: &str = "provider_api_key";

/// Where a session's bearer credential comes from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn acquire(&self) -> Result<String, SessionError>;
}

/// What is known about the stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Unknown,
    Valid,
    Invalid,
}

pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    provider: ProviderClient,
    validity: Mutex<Validity>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>, provider: ProviderClient) -> Self {
        Self {
            store,
            provider,
            validity: Mutex::new(Validity::Unknown),
        }
    }

    /// Open the file-backed store named in the config
    pub fn open(config: &Config, provider: ProviderClient) -> Self {
        Self::new(Arc::new(FileStore::new(&config.credentials.path)), provider)
    }

    pub fn credential(&self) -> Option<String> {
        match self.store.get(CREDENTIAL_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to read stored credential: {:#}", e);
                None
            }
        }
    }

    /// Store and persist a credential. Its validity becomes unknown.
    pub fn set_credential(&self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            anyhow::bail!("Credential must not be empty");
        }

        self.store.set(CREDENTIAL_KEY, value)?;
        *self.validity.lock().unwrap() = Validity::Unknown;
        tracing::info!("Credential updated");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(CREDENTIAL_KEY)?;
        *self.validity.lock().unwrap() = Validity::Unknown;
        Ok(())
    }

    pub fn validity(&self) -> Validity {
        *self.validity.lock().unwrap()
    }

    /// Probe the provider with `value`. The cached validity is updated when
    /// `value` is the stored credential and the provider actually answered.
    pub async fn probe(&self, value: &str) -> ProbeOutcome {
        let outcome = self.provider.probe(value).await;

        if self.credential().as_deref() == Some(value) {
            let mut validity = self.validity.lock().unwrap();
            match outcome {
                ProbeOutcome::Valid => *validity = Validity::Valid,
                ProbeOutcome::Rejected(_) => *validity = Validity::Invalid,
                ProbeOutcome::Unreachable(_) => {}
            }
        }

        outcome
    }

    /// True iff the provider accepts `value`. Unreachable counts as invalid.
    pub async fn validate(&self, value: &str) -> bool {
        self.probe(value).await.is_valid()
    }
}

#[async_trait]
impl CredentialSource for CredentialStore {
    async fn acquire(&self) -> Result<String, SessionError> {
        let credential = self.credential().ok_or(SessionError::MissingCredential)?;

        match self.validity() {
            Validity::Valid => Ok(credential),
            Validity::Invalid => Err(SessionError::InvalidCredential),
            Validity::Unknown => match self.probe(&credential).await {
                ProbeOutcome::Valid => Ok(credential),
                ProbeOutcome::Rejected(_) => Err(SessionError::InvalidCredential),
                ProbeOutcome::Unreachable(reason) => Err(SessionError::ProviderUnreachable(reason)),
            },
        }
    }
}
