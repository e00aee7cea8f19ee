pub mod audio;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod provider;
pub mod relay;
pub mod session;

pub use config::Config;
pub use session::{Event, SessionError, SessionManager, SessionState};

use anyhow::Result;
use config::CredentialSourceKind;
use credentials::{CredentialSource, CredentialStore, RelayCredentials};
use provider::ProviderClient;
use std::sync::Arc;

/// Pick the credential source named in the config
pub fn credential_source(
    config: &Config,
    provider: ProviderClient,
) -> Result<Arc<dyn CredentialSource>> {
    match config.credentials.source {
        CredentialSourceKind::Stored => {
            tracing::info!("Using stored credential from {}", config.credentials.path);
            Ok(Arc::new(CredentialStore::open(config, provider)))
        }
        CredentialSourceKind::Relay => {
            tracing::info!("Using ephemeral credentials from {}", config.credentials.relay_url);
            Ok(Arc::new(RelayCredentials::new(&config.credentials.relay_url)?))
        }
    }
}

/// Wire a session manager to WebRTC and the local audio devices
pub fn build_session_manager(config: &Config) -> Result<SessionManager> {
    let provider = ProviderClient::new(&config.provider)?;
    let credentials = credential_source(config, provider.clone())?;
    let transports = Arc::new(session::WebRtcTransportFactory::from_config(&config.session));
    let devices = audio::default_devices();

    Ok(SessionManager::new(
        credentials,
        provider,
        transports,
        devices,
        config.session.history_limit,
    ))
}

/// Run the token relay until the server exits
pub async fn run_relay(config: Config) -> Result<()> {
    tracing::info!("Starting token relay...");

    let server = relay::RelayServer::from_config(&config)?;
    server.start().await
}
