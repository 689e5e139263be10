//! Relay configuration.
//!
//! Parsed from the `config.toml` file in the data directory. Every section
//! and every field has a default, so an empty file (or no file) yields a
//! working configuration apart from the upstream API key, which is injected
//! by the loader from the file or the `GEMINI_API_KEY` environment variable.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default Live API endpoint (without the `key` query parameter).
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default upstream model id.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Prefix marking a completed turn as the final plugin.
pub const DEFAULT_TERMINAL_MARKER: &str = "FINAL_PLUGIN:";

/// Default system instruction sent in the setup frame.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"
You are a WooCommerce Plugin Generator, an AI assistant that creates single-file WooCommerce plugins based on merchant requests. Follow these guidelines:
1. Generate plugins as single PHP files with proper WordPress plugin headers (e.g., Plugin Name, Description, Version).
2. Use WordPress/WooCommerce functions and hooks (e.g., add_action, add_filter, wp_mail) to implement functionality.
3. Ensure the code is secure: sanitize inputs, escape outputs, and follow WordPress coding standards.
4. If the request is unclear, ask the merchant clarifying questions (e.g., "What color would you like the button to be?").
5. Format the response as a PHP code block that can be directly saved as a .php file.
6. Do not include explanations or additional text outside the PHP code block unless asking a clarifying question.
7. When the user indicates the plugin is complete (e.g., by saying "Looks good" or "Finalize"), prefix your response with "FINAL_PLUGIN:" to indicate the final plugin code.

Example Request: "Change the color of my add to cart button to blue."
Example Output:
<?php
/**
 * Plugin Name: WooCommerce Add to Cart Button Color
 * Description: Changes the add to cart button color to blue
 * Version: 1.0.0
 */
if (!defined('ABSPATH')) exit;
add_action('wp_head', 'change_add_to_cart_button_color');
function change_add_to_cart_button_color() {
    echo '<style>.single_add_to_cart_button { background-color: blue !important; color: white !important; }</style>';
}
"#;

/// Prefix of the priming request when prior history exists. The JSON array
/// of prior turns is appended directly after it.
pub const DEFAULT_HISTORY_PREAMBLE: &str = "This is the previous chat context, and if you don't tell user you know their history just keep it in mind and it will help you generating next response:\n";

/// Priming request when the conversation has no history.
pub const DEFAULT_GREETING_PROMPT: &str = "Introduce yourself as a WooCommerce Plugin Generator and ask what functionality the user would like to add.";

/// Sent upstream after the validator rejects a final plugin.
pub const DEFAULT_REVISION_PROMPT: &str = "The generated plugin code is invalid or unsafe. Please revise it following WordPress coding standards and security best practices.";

/// Top-level relay configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub artifact: ArtifactConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Upstream model connection settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Filled in by the loader; never written back out.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
    /// Upper bound on socket establishment. `None` waits indefinitely.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            connect_timeout_secs: None,
        }
    }
}

/// Texts the relay sends upstream on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_history_preamble")]
    pub history_preamble: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_revision")]
    pub revision: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            history_preamble: default_history_preamble(),
            greeting: default_greeting(),
            revision: default_revision(),
        }
    }
}

/// Final-plugin detection and validation rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_terminal_marker")]
    pub terminal_marker: String,
    #[serde(default = "default_header_marker")]
    pub header_marker: String,
    #[serde(default = "default_language_marker")]
    pub language_marker: String,
    #[serde(default = "default_deny_list")]
    pub deny_list: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            terminal_marker: default_terminal_marker(),
            header_marker: default_header_marker(),
            language_marker: default_language_marker(),
            deny_list: default_deny_list(),
        }
    }
}

/// Per-session limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum queued client messages while the gate is closed.
    /// `None` leaves the queue unbounded.
    #[serde(default)]
    pub max_pending_messages: Option<usize>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_history_preamble() -> String {
    DEFAULT_HISTORY_PREAMBLE.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING_PROMPT.to_string()
}

fn default_revision() -> String {
    DEFAULT_REVISION_PROMPT.to_string()
}

fn default_terminal_marker() -> String {
    DEFAULT_TERMINAL_MARKER.to_string()
}

fn default_header_marker() -> String {
    "Plugin Name:".to_string()
}

fn default_language_marker() -> String {
    "<?php".to_string()
}

fn default_deny_list() -> Vec<String> {
    vec!["eval(".to_string(), "exec(".to_string()]
}

impl RelayConfig {
    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.upstream.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::Missing("upstream.endpoint"));
        }
        if !(endpoint.starts_with("wss://") || endpoint.starts_with("ws://")) {
            return Err(ConfigError::Invalid {
                field: "upstream.endpoint",
                reason: format!("expected a ws:// or wss:// URL, got '{endpoint}'"),
            });
        }
        if self.upstream.model.trim().is_empty() {
            return Err(ConfigError::Missing("upstream.model"));
        }
        if self.upstream.connect_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "upstream.connect_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.artifact.terminal_marker.is_empty() {
            return Err(ConfigError::Missing("artifact.terminal_marker"));
        }
        if self.artifact.deny_list.iter().any(|d| d.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "artifact.deny_list",
                reason: "entries must not be empty".to_string(),
            });
        }
        if self.session.max_pending_messages == Some(0) {
            return Err(ConfigError::Invalid {
                field: "session.max_pending_messages",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
