use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::provider::{ProbeOutcome, ProviderClient};
use anyhow::{anyhow, Result};

/// Enum for credential management subcommands
pub enum CredentialCmd {
    Set { value: Option<String>, skip_validation: bool },
    Show,
    Validate,
    Clear,
}

pub async fn handle_credential_command(cmd: CredentialCmd, config: Config) -> Result<()> {
    let provider = ProviderClient::new(&config.provider)?;
    let store = CredentialStore::open(&config, provider);

    match cmd {
        CredentialCmd::Set {
            value,
            skip_validation,
        } => set_credential(&store, value, skip_validation).await,
        CredentialCmd::Show => show_credential(&store, &config),
        CredentialCmd::Validate => validate_credential(&store).await,
        CredentialCmd::Clear => {
            store.clear()?;
            println!("✓ Credential removed");
            Ok(())
        }
    }
}

async fn set_credential(
    store: &CredentialStore,
    value: Option<String>,
    skip_validation: bool,
) -> Result<()> {
    let value = match value {
        Some(v) => v,
        None => rpassword::prompt_password("API key: ")?,
    };

    store.set_credential(&value)?;
    println!("✓ Credential saved");

    if !skip_validation {
        report_probe(store.probe(value.trim()).await);
    }

    Ok(())
}

fn show_credential(store: &CredentialStore, config: &Config) -> Result<()> {
    match store.credential() {
        Some(credential) => {
            println!("Credential: {}", mask(&credential));
            println!("Stored in:  {}", config.credentials.path);
        }
        None => println!("No credential stored."),
    }
    Ok(())
}

async fn validate_credential(store: &CredentialStore) -> Result<()> {
    let credential = store
        .credential()
        .ok_or_else(|| anyhow!("No credential stored. Use `credential set` first."))?;

    match store.probe(&credential).await {
        ProbeOutcome::Valid => {
            report_probe(ProbeOutcome::Valid);
            Ok(())
        }
        other => {
            report_probe(other);
            Err(anyhow!("Credential validation failed"))
        }
    }
}

fn report_probe(outcome: ProbeOutcome) {
    match outcome {
        ProbeOutcome::Valid => println!("✓ Provider accepted the credential"),
        ProbeOutcome::Rejected(status) => {
            println!("✗ Provider rejected the credential (HTTP {})", status)
        }
        ProbeOutcome::Unreachable(reason) => {
            println!("? Could not reach the provider: {}", reason)
        }
    }
}

/// Keep the prefix and the last four characters
fn mask(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
