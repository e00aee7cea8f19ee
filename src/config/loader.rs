use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Perform environment variable substitution
    let config = substitute_env_vars(config);

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

/// Resolve a `${VAR}` placeholder. Plain values pass through untouched.
fn resolve_placeholder(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else {
        Some(value.to_string())
    }
}

fn substitute_env_vars(mut config: Config) -> Config {
    // Relay secret
    if let Some(key) = &config.relay.api_key {
        config.relay.api_key = resolve_placeholder(key);
    }

    config
}

pub(crate) fn validate_config(config: &Config) -> Result<()> {
    if config.provider.model.trim().is_empty() {
        anyhow::bail!("Provider model must be specified");
    }

    if !config.provider.base_url.starts_with("http://")
        && !config.provider.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "Provider base_url must be an http(s) URL: {}",
            config.provider.base_url
        );
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid logging format: {}", config.logging.format);
    }

    Ok(())
}
