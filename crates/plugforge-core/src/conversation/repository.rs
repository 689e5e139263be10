//! ConversationRepository trait definition.
//!
//! Conversations are keyed by `(owner, plugin_id)`. Appending a turn and
//! setting the final plugin are upserts: a missing record is created on the
//! fly with an empty plugin name.

use plugforge_types::chat::{ChatTurn, ConversationRecord, ConversationSummary};
use plugforge_types::error::RepositoryError;
use plugforge_types::identity::PrincipalId;

/// Repository trait for conversation persistence.
///
/// Implementations live in plugforge-infra (e.g., `SqliteConversationRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationRepository: Send + Sync {
    /// Append one turn to the end of a conversation.
    fn append_turn(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        turn: &ChatTurn,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All turns of a conversation in insertion order. Empty when the
    /// conversation does not exist.
    fn fetch_history(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatTurn>, RepositoryError>> + Send;

    /// Store the accepted final plugin, replacing any previous one.
    fn set_final_artifact(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        code: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Create an empty conversation. Fails with `Conflict` if the key is taken.
    fn create_conversation(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        plugin_name: &str,
    ) -> impl std::future::Future<Output = Result<ConversationRecord, RepositoryError>> + Send;

    /// Load a conversation with its turns.
    fn get_conversation(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ConversationRecord>, RepositoryError>> + Send;

    /// List an owner's conversations, oldest first.
    fn list_conversations(
        &self,
        owner: &PrincipalId,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, RepositoryError>> + Send;
}
