//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `plugforge-core` with raw sqlx
//! queries, private Row structs and split reader/writer pool usage. Appends
//! and final-plugin writes upsert the parent conversation row.

use chrono::Utc;
use plugforge_core::conversation::repository::ConversationRepository;
use plugforge_types::chat::{ChatTurn, ConversationRecord, ConversationSummary, Sender};
use plugforge_types::error::RepositoryError;
use plugforge_types::identity::PrincipalId;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, is_unique_violation, parse_datetime};

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    owner_pid: String,
    plugin_id: String,
    plugin_name: String,
    generated_plugin: Option<String>,
    created_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_pid: row.try_get("owner_pid")?,
            plugin_id: row.try_get("plugin_id")?,
            plugin_name: row.try_get("plugin_name")?,
            generated_plugin: row.try_get("generated_plugin")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_record(self, chat: Vec<ChatTurn>) -> Result<ConversationRecord, RepositoryError> {
        Ok(ConversationRecord {
            owner: PrincipalId::new(self.owner_pid),
            plugin_id: self.plugin_id,
            plugin_name: self.plugin_name,
            chat,
            generated_plugin: self.generated_plugin,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct ChatTurnRow {
    sender: String,
    content: String,
    created_at: String,
}

impl ChatTurnRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            sender: row.try_get("sender")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_turn(self) -> Result<ChatTurn, RepositoryError> {
        let sender: Sender = self
            .sender
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(ChatTurn {
            content: self.content,
            sender,
            timestamp: parse_datetime(&self.created_at)?,
        })
    }
}

fn map_turn_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ChatTurn>, RepositoryError> {
    let mut turns = Vec::with_capacity(rows.len());
    for row in rows {
        let turn_row =
            ChatTurnRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        turns.push(turn_row.into_turn()?);
    }
    Ok(turns)
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn append_turn(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        turn: &ChatTurn,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let conversation_id: String = sqlx::query(
            r#"INSERT INTO conversations (id, owner_pid, plugin_id, plugin_name, generated_plugin, created_at, updated_at)
               VALUES (?, ?, ?, '', NULL, ?, ?)
               ON CONFLICT(owner_pid, plugin_id) DO UPDATE SET updated_at = excluded.updated_at
               RETURNING id"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(owner.as_str())
        .bind(plugin_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .try_get("id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO chat_turns (id, conversation_id, seq, sender, content, created_at)
               SELECT ?, ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?
               FROM chat_turns WHERE conversation_id = ?"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(&conversation_id)
        .bind(turn.sender.to_string())
        .bind(&turn.content)
        .bind(format_datetime(&turn.timestamp))
        .bind(&conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        debug!(plugin_id, sender = %turn.sender, "Chat turn appended");
        Ok(())
    }

    async fn fetch_history(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT t.sender, t.content, t.created_at
               FROM chat_turns t
               JOIN conversations c ON c.id = t.conversation_id
               WHERE c.owner_pid = ? AND c.plugin_id = ?
               ORDER BY t.seq ASC"#,
        )
        .bind(owner.as_str())
        .bind(plugin_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_turn_rows(&rows)
    }

    async fn set_final_artifact(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        code: &str,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        sqlx::query(
            r#"INSERT INTO conversations (id, owner_pid, plugin_id, plugin_name, generated_plugin, created_at, updated_at)
               VALUES (?, ?, ?, '', ?, ?, ?)
               ON CONFLICT(owner_pid, plugin_id) DO UPDATE
               SET generated_plugin = excluded.generated_plugin, updated_at = excluded.updated_at"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(owner.as_str())
        .bind(plugin_id)
        .bind(code)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn create_conversation(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        plugin_name: &str,
    ) -> Result<ConversationRecord, RepositoryError> {
        let created_at = Utc::now();
        let now = format_datetime(&created_at);
        sqlx::query(
            r#"INSERT INTO conversations (id, owner_pid, plugin_id, plugin_name, generated_plugin, created_at, updated_at)
               VALUES (?, ?, ?, ?, NULL, ?, ?)"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(owner.as_str())
        .bind(plugin_id)
        .bind(plugin_name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!(
                    "conversation '{plugin_id}' already exists for {owner}"
                ))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(ConversationRecord {
            owner: owner.clone(),
            plugin_id: plugin_id.to_string(),
            plugin_name: plugin_name.to_string(),
            chat: Vec::new(),
            generated_plugin: None,
            created_at,
        })
    }

    async fn get_conversation(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE owner_pid = ? AND plugin_id = ?")
            .bind(owner.as_str())
            .bind(plugin_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let conversation =
            ConversationRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;

        let turn_rows = sqlx::query(
            "SELECT sender, content, created_at FROM chat_turns WHERE conversation_id = ? ORDER BY seq ASC",
        )
        .bind(&conversation.id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let chat = map_turn_rows(&turn_rows)?;
        Ok(Some(conversation.into_record(chat)?))
    }

    async fn list_conversations(
        &self,
        owner: &PrincipalId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT plugin_id, plugin_name, generated_plugin IS NOT NULL AS is_final
               FROM conversations
               WHERE owner_pid = ?
               ORDER BY created_at ASC, rowid ASC"#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let is_final: i64 = row
                .try_get("is_final")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            summaries.push(ConversationSummary {
                plugin_id: row
                    .try_get("plugin_id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                plugin_name: row
                    .try_get("plugin_name")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                is_final: is_final != 0,
            });
        }
        Ok(summaries)
    }
}
