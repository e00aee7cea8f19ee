mod loader;
mod schema;

pub use loader::load_config;
pub use schema::*;

use anyhow::Result;
use std::path::Path;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        loader::load_config(path)
    }

    /// Validate a config built in code (files are validated on load)
    pub fn validate(&self) -> Result<()> {
        loader::validate_config(self)
    }

    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".realtime-console")
            .join("config.yaml")
    }
}
