//! Chat turn and conversation record types.
//!
//! A conversation is identified by `(owner, plugin_id)` and holds the ordered
//! turns exchanged between the user and the plugin generator, plus the final
//! plugin code once one has been accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::identity::PrincipalId;

/// Who produced a chat turn.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (sender IN ('user', 'plugin_generator'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The human on the client connection.
    User,
    /// The upstream model.
    PluginGenerator,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::PluginGenerator => write!(f, "plugin_generator"),
        }
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "plugin_generator" => Ok(Sender::PluginGenerator),
            other => Err(format!(
                "invalid sender: '{other}' (expected \"user\" or \"plugin_generator\")"
            )),
        }
    }
}

/// One persisted message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    /// A turn authored by the user, stamped now.
    pub fn from_user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::User,
            timestamp: Utc::now(),
        }
    }

    /// A turn authored by the plugin generator, stamped now.
    pub fn from_generator(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::PluginGenerator,
            timestamp: Utc::now(),
        }
    }
}

/// A full conversation as stored by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub owner: PrincipalId,
    pub plugin_id: String,
    pub plugin_name: String,
    pub chat: Vec<ChatTurn>,
    /// Final plugin code accepted by the validator, if any.
    pub generated_plugin: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing row for a principal's conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub plugin_id: String,
    pub plugin_name: String,
    /// True once a final plugin has been stored.
    pub is_final: bool,
}

/// Chat history returned to HTTP clients, with the latest code extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryView {
    pub chat: Vec<ChatTurn>,
    pub last_code: Option<String>,
}
