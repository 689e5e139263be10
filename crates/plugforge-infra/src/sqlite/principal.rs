//! SQLite principal store.
//!
//! API keys are never stored in plaintext: only their lowercase hex SHA-256
//! digest is persisted, and lookups hash the presented credential first.

use chrono::Utc;
use plugforge_core::identity::{IssuedPrincipal, PrincipalRepository, PrincipalResolver};
use plugforge_types::error::RepositoryError;
use plugforge_types::identity::{Principal, PrincipalId};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, is_unique_violation, parse_datetime};

/// Prefix of every issued API key.
pub const API_KEY_PREFIX: &str = "pfg_";

/// Prefix of every principal id.
pub const PRINCIPAL_ID_PREFIX: &str = "usr_";

/// Compute SHA-256 hash of an API key (lowercase hex).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

fn generate_api_key() -> String {
    format!(
        "{API_KEY_PREFIX}{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// SQLite-backed principal resolution and management.
pub struct SqlitePrincipalStore {
    pool: DatabasePool,
}

impl SqlitePrincipalStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct PrincipalRow {
    pid: String,
    name: String,
    created_at: String,
}

impl PrincipalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            pid: row.try_get("pid")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_principal(self) -> Result<Principal, RepositoryError> {
        Ok(Principal {
            pid: PrincipalId::new(self.pid),
            name: self.name,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl PrincipalResolver for SqlitePrincipalStore {
    async fn resolve_principal(
        &self,
        credential: &str,
    ) -> Result<Option<PrincipalId>, RepositoryError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query("SELECT id, pid FROM principals WHERE api_key_hash = ?")
            .bind(hash_api_key(credential))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row
            .try_get("id")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let pid: String = row
            .try_get("pid")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Best effort: a failed timestamp update never rejects the credential.
        let _ = sqlx::query("UPDATE principals SET last_used_at = ? WHERE id = ?")
            .bind(format_datetime(&Utc::now()))
            .bind(&id)
            .execute(&self.pool.writer)
            .await;

        debug!(pid = %pid, "Credential resolved");
        Ok(Some(PrincipalId::new(pid)))
    }
}

impl PrincipalRepository for SqlitePrincipalStore {
    async fn create_principal(&self, name: &str) -> Result<IssuedPrincipal, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::Query(
                "principal name must not be empty".to_string(),
            ));
        }

        let created_at = Utc::now();
        let pid = PrincipalId::new(format!("{PRINCIPAL_ID_PREFIX}{}", Uuid::now_v7().simple()));
        let api_key = generate_api_key();

        sqlx::query(
            "INSERT INTO principals (id, pid, name, api_key_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(pid.as_str())
        .bind(name)
        .bind(hash_api_key(&api_key))
        .bind(format_datetime(&created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("principal '{pid}' already exists"))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        info!(pid = %pid, name, "Principal created");
        Ok(IssuedPrincipal {
            principal: Principal {
                pid,
                name: name.to_string(),
                created_at,
            },
            api_key,
        })
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT pid, name, created_at FROM principals ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                PrincipalRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_principal()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;

    async fn test_store() -> (SqlitePrincipalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        (SqlitePrincipalStore::new(pool), dir)
    }

    #[test]
    fn test_hash_api_key_is_hex_sha256() {
        let hash = hash_api_key("secret");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, hash_api_key("secret"));
        assert_ne!(hash, hash_api_key("secret2"));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with(API_KEY_PREFIX));
        assert_eq!(a.len(), API_KEY_PREFIX.len() + 64);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_create_then_resolve() {
        let (store, _dir) = test_store().await;
        let issued = store.create_principal("alice").await.unwrap();
        assert!(issued.principal.pid.as_str().starts_with(PRINCIPAL_ID_PREFIX));

        let resolved = store.resolve_principal(&issued.api_key).await.unwrap();
        assert_eq!(resolved, Some(issued.principal.pid.clone()));

        // Only the hash is stored.
        let stored: (String,) = sqlx::query_as("SELECT api_key_hash FROM principals")
            .fetch_one(&store.pool.reader)
            .await
            .unwrap();
        assert_eq!(stored.0, hash_api_key(&issued.api_key));
        assert_ne!(stored.0, issued.api_key);
    }

    #[tokio::test]
    async fn test_resolve_unknown_or_empty() {
        let (store, _dir) = test_store().await;
        store.create_principal("alice").await.unwrap();
        assert!(store.resolve_principal("pfg_nope").await.unwrap().is_none());
        assert!(store.resolve_principal("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_updates_last_used() {
        let (store, _dir) = test_store().await;
        let issued = store.create_principal("alice").await.unwrap();
        store.resolve_principal(&issued.api_key).await.unwrap();

        let row: (Option<String>,) = sqlx::query_as("SELECT last_used_at FROM principals")
            .fetch_one(&store.pool.reader)
            .await
            .unwrap();
        assert!(row.0.is_some());
    }

    #[tokio::test]
    async fn test_list_principals() {
        let (store, _dir) = test_store().await;
        store.create_principal("alice").await.unwrap();
        store.create_principal("bob").await.unwrap();

        let names: Vec<String> = store
            .list_principals()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let (store, _dir) = test_store().await;
        assert!(store.create_principal("  ").await.is_err());
    }
}
