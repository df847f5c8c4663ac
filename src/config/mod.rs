pub mod schema;

pub use schema::{BackendKind, BridgeConfig};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::BridgeError;

/// Default toolbridge home directory (~/.toolbridge).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".toolbridge"))
        .unwrap_or_else(|| PathBuf::from(".toolbridge"))
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    default_home_dir().join("config.toml")
}

/// Expand `~` in a user-supplied path.
pub fn resolve_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read toolbridge config file")?;
        let config: BridgeConfig =
            toml::from_str(&contents).context("Failed to parse toolbridge config (TOML)")?;
        Ok(config)
    } else {
        Ok(BridgeConfig::default())
    }
}

/// Read the API key for `backend` from the environment.
///
/// A `.env` file in the working directory is loaded first when present.
pub fn api_key(backend: BackendKind) -> Result<String, BridgeError> {
    // A missing .env file is fine; keys may come from the real environment.
    let _ = dotenvy::dotenv();
    read_api_key(backend, |name| std::env::var(name).ok())
}

fn read_api_key(
    backend: BackendKind,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, BridgeError> {
    let var = backend.api_key_env();
    match lookup(var) {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(BridgeError::Config(format!(
            "{var} is not set; export it or add it to .env"
        ))),
    }
}
