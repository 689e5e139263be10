//! Conversation service used by the HTTP surface.
//!
//! Wraps a [`ConversationRepository`] with id generation for new
//! conversations and extraction of the most recent plugin code from a chat.

use std::sync::Arc;

use chrono::Utc;
use plugforge_types::chat::{ChatHistoryView, ChatTurn, ConversationSummary, Sender};
use plugforge_types::error::RepositoryError;
use plugforge_types::identity::PrincipalId;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::repository::ConversationRepository;

/// Public id prefix for conversations.
pub const PLUGIN_ID_PREFIX: &str = "plg_";

/// Generate a fresh, time-sortable plugin id.
pub fn generate_plugin_id() -> String {
    format!("{PLUGIN_ID_PREFIX}{}", Uuid::now_v7().simple())
}

/// Content of the most recent turn that looks like PHP code, with markdown
/// fences and escaped newlines cleaned up.
pub fn extract_last_code(chat: &[ChatTurn]) -> Option<String> {
    let turn = chat
        .iter()
        .rev()
        .find(|t| t.content.contains("<?php") || t.content.starts_with("```php"))?;

    let cleaned = turn
        .content
        .replace("```php\n", "")
        .replace("```", "")
        .replace("\\n", "\n");

    Some(cleaned.trim().to_string())
}

/// Conversation operations keyed by the authenticated owner.
pub struct ConversationService<R: ConversationRepository> {
    repo: Arc<R>,
}

impl<R: ConversationRepository> ConversationService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Create a conversation and return its new plugin id.
    pub async fn create(
        &self,
        owner: &PrincipalId,
        plugin_name: &str,
    ) -> Result<String, RepositoryError> {
        let plugin_id = generate_plugin_id();
        let record = self
            .repo
            .create_conversation(owner, &plugin_id, plugin_name)
            .await?;
        info!(owner = %owner, plugin_id = %record.plugin_id, "Conversation created");
        Ok(record.plugin_id)
    }

    /// Chat history plus the latest extracted code. Unknown conversations
    /// yield an empty history.
    pub async fn chat_history(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> Result<ChatHistoryView, RepositoryError> {
        let chat = self.repo.fetch_history(owner, plugin_id).await?;
        let last_code = extract_last_code(&chat);
        debug!(plugin_id, turns = chat.len(), has_code = last_code.is_some(), "Chat history loaded");
        Ok(ChatHistoryView { chat, last_code })
    }

    /// Append a message stamped now.
    pub async fn append_message(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        content: &str,
        sender: Sender,
    ) -> Result<(), RepositoryError> {
        let turn = ChatTurn {
            content: content.to_string(),
            sender,
            timestamp: Utc::now(),
        };
        self.repo.append_turn(owner, plugin_id, &turn).await
    }

    /// Store a final plugin for an existing conversation.
    pub async fn save_plugin(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        code: &str,
    ) -> Result<(), RepositoryError> {
        if self.repo.get_conversation(owner, plugin_id).await?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        self.repo.set_final_artifact(owner, plugin_id, code).await?;
        info!(owner = %owner, plugin_id, "Final plugin saved");
        Ok(())
    }

    /// Summaries of every conversation the owner has.
    pub async fn list(&self, owner: &PrincipalId) -> Result<Vec<ConversationSummary>, RepositoryError> {
        self.repo.list_conversations(owner).await
    }
}
