//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and the
//! server. Core services are generic over the port traits; AppState pins
//! them to the infra implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use plugforge_core::conversation::service::ConversationService;
use plugforge_infra::config::{load_relay_config, resolve_data_dir};
use plugforge_infra::sqlite::conversation::SqliteConversationRepository;
use plugforge_infra::sqlite::pool::{DatabasePool, database_url};
use plugforge_infra::sqlite::principal::SqlitePrincipalStore;
use plugforge_infra::upstream::GeminiLiveConnector;
use plugforge_types::config::RelayConfig;
use tokio_util::sync::CancellationToken;

pub type ConcreteConversationService = ConversationService<SqliteConversationRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConcreteConversationService>,
    pub conversation_repo: Arc<SqliteConversationRepository>,
    pub principals: Arc<SqlitePrincipalStore>,
    pub connector: Arc<GeminiLiveConnector>,
    /// Relay configuration with the API key already moved into `connector`.
    pub relay_config: Arc<RelayConfig>,
    pub data_dir: PathBuf,
    /// Cancelled on server shutdown; every relay session watches it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Initialize the application state: data dir, DB, config, services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let relay_config = load_relay_config(&data_dir).await;

        Ok(Self::build(data_dir, db_pool, relay_config))
    }

    /// Wire services from already-opened resources.
    pub fn build(data_dir: PathBuf, db_pool: DatabasePool, mut relay_config: RelayConfig) -> Self {
        let connector = GeminiLiveConnector::new(
            relay_config.upstream.endpoint.clone(),
            relay_config.upstream.api_key.take(),
            relay_config
                .upstream
                .connect_timeout_secs
                .map(Duration::from_secs),
        );

        let conversation_repo = Arc::new(SqliteConversationRepository::new(db_pool.clone()));

        Self {
            conversations: Arc::new(ConversationService::new(Arc::clone(&conversation_repo))),
            conversation_repo,
            principals: Arc::new(SqlitePrincipalStore::new(db_pool)),
            connector: Arc::new(connector),
            relay_config: Arc::new(relay_config),
            data_dir,
            shutdown: CancellationToken::new(),
        }
    }
}
