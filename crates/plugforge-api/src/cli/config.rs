//! `config show`: print the resolved configuration.

use anyhow::Result;
use console::style;

use plugforge_infra::config::CONFIG_FILE;
use plugforge_types::config::RelayConfig;

use crate::state::AppState;

const REDACTED: &str = "<redacted>";

/// Resolved configuration as JSON, with the API key replaced by a marker
/// (or `null` when none is configured).
pub fn redacted_json(config: &RelayConfig, has_api_key: bool) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(upstream) = value.get_mut("upstream").and_then(|u| u.as_object_mut()) {
        let key = if has_api_key {
            serde_json::Value::String(REDACTED.to_string())
        } else {
            serde_json::Value::Null
        };
        upstream.insert("api_key".to_string(), key);
    }
    Ok(value)
}

pub fn show_config(state: &AppState, json: bool) -> Result<()> {
    let has_api_key = state.connector.has_api_key();

    if json {
        let value = redacted_json(&state.relay_config, has_api_key)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Config file:").bold(),
        state.data_dir.join(CONFIG_FILE).display()
    );
    println!(
        "  {} {}",
        style("Upstream API key:").bold(),
        if has_api_key {
            style(REDACTED).green()
        } else {
            style("not set").red()
        }
    );
    println!();
    println!("{}", toml::to_string_pretty(&*state.relay_config)?);

    Ok(())
}
