//! Relay configuration loading.
//!
//! Reads `config.toml` from the data directory. A missing, unreadable or
//! invalid file falls back to defaults with a warning. The upstream API key
//! may come from the file (`[upstream] api_key`) or the `GEMINI_API_KEY`
//! environment variable, with the environment taking precedence.

use std::path::{Path, PathBuf};

use plugforge_types::config::RelayConfig;
use secrecy::SecretString;
use serde::Deserialize;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PLUGFORGE_DATA_DIR";

/// Environment variable carrying the upstream API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory (`$PLUGFORGE_DATA_DIR`, else `~/.plugforge`).
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".plugforge");
    }

    // Last resort: current directory
    PathBuf::from(".plugforge")
}

/// The only secret the file may carry. Parsed separately so the key never
/// lands in a serializable struct.
#[derive(Debug, Default, Deserialize)]
struct RawSecrets {
    #[serde(default)]
    upstream: RawUpstreamSecrets,
}

#[derive(Debug, Default, Deserialize)]
struct RawUpstreamSecrets {
    api_key: Option<String>,
}

/// Load relay configuration from `{data_dir}/config.toml`.
pub async fn load_relay_config(data_dir: &Path) -> RelayConfig {
    let env_key = std::env::var(API_KEY_ENV).ok();
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return with_api_key(RelayConfig::default(), None, env_key);
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return with_api_key(RelayConfig::default(), None, env_key);
        }
    };

    parse_relay_config(&content, &config_path, env_key)
}

fn parse_relay_config(content: &str, config_path: &Path, env_key: Option<String>) -> RelayConfig {
    let config = match toml::from_str::<RelayConfig>(content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return with_api_key(RelayConfig::default(), None, env_key);
        }
    };

    if let Err(err) = config.validate() {
        tracing::warn!(
            "Invalid configuration in {}: {err}, using defaults",
            config_path.display()
        );
        return with_api_key(RelayConfig::default(), None, env_key);
    }

    let file_key = toml::from_str::<RawSecrets>(content)
        .ok()
        .and_then(|raw| raw.upstream.api_key);
    with_api_key(config, file_key, env_key)
}

/// Apply the API key: environment first, then file. Blank values count as
/// absent.
fn with_api_key(
    mut config: RelayConfig,
    file_key: Option<String>,
    env_key: Option<String>,
) -> RelayConfig {
    let key = env_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| file_key.filter(|k| !k.trim().is_empty()));

    if key.is_none() {
        tracing::warn!("No upstream API key configured (set {API_KEY_ENV} or [upstream] api_key)");
    }
    config.upstream.api_key = key.map(|k| SecretString::from(k.trim().to_string()));
    config
}
