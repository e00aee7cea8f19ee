use anyhow::Result;
use clap::{Parser, Subcommand};
use realtime_console::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "realtime-console")]
#[command(about = "Talk to a realtime speech model over WebRTC", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive realtime session (default)
    Console,

    /// Run the token relay server
    Serve,

    /// Manage the locally stored API key
    #[command(subcommand)]
    Credential(CredentialCommands),
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store an API key (prompted if not given)
    Set {
        /// API key value
        #[arg(long)]
        value: Option<String>,

        /// Do not check the key against the provider
        #[arg(long)]
        skip_validation: bool,
    },

    /// Show the stored key (masked)
    Show,

    /// Check the stored key against the provider
    Validate,

    /// Remove the stored key
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match cli.config {
        Some(path) => Config::load(&path)?,
        None => {
            let default_path = Config::default_path();
            if default_path.exists() {
                Config::load(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format)?;

    tracing::debug!("Configuration loaded");

    match cli.command {
        Some(Commands::Console) | None => {
            realtime_console::cli::console::run_console(config).await?;
        }
        Some(Commands::Serve) => {
            realtime_console::run_relay(config).await?;
        }
        Some(Commands::Credential(credential_cmd)) => {
            let cmd = match credential_cmd {
                CredentialCommands::Set {
                    value,
                    skip_validation,
                } => realtime_console::cli::credential::CredentialCmd::Set {
                    value,
                    skip_validation,
                },
                CredentialCommands::Show => realtime_console::cli::credential::CredentialCmd::Show,
                CredentialCommands::Validate => {
                    realtime_console::cli::credential::CredentialCmd::Validate
                }
                CredentialCommands::Clear => realtime_console::cli::credential::CredentialCmd::Clear,
            };
            realtime_console::cli::credential::handle_credential_command(cmd, config).await?;
        }
    }

    Ok(())
}

// Logs go to stderr so they do not interleave with console output on stdout
fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            // Default to pretty
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
