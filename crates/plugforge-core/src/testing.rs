//! In-memory fakes of the ports for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use plugforge_types::chat::{ChatTurn, ConversationRecord, ConversationSummary};
use plugforge_types::error::{RepositoryError, TransportError};
use plugforge_types::identity::PrincipalId;
use plugforge_types::protocol::UpstreamRequest;
use tokio::sync::mpsc;

use crate::conversation::repository::ConversationRepository;
use crate::upstream::{UpstreamChannel, UpstreamCommand, UpstreamConnector, UpstreamSignal};

/// `Mutex<Vec>`-backed conversation store.
#[derive(Default)]
pub struct InMemoryRepository {
    records: Mutex<Vec<ConversationRecord>>,
    fail_history: AtomicBool,
    fail_final: AtomicBool,
}

impl InMemoryRepository {
    pub fn fail_history(&self) {
        self.fail_history.store(true, Ordering::SeqCst);
    }

    pub fn fail_final(&self) {
        self.fail_final.store(true, Ordering::SeqCst);
    }

    /// Pre-populate the conversation `plugin_id` owned by `usr_1`.
    pub fn seed(&self, plugin_id: &str, turns: Vec<ChatTurn>) {
        let owner = PrincipalId::new("usr_1");
        self.with_record(&owner, plugin_id, |r| r.chat.extend(turns));
    }

    /// Turns stored for `plugin_id`, any owner.
    pub fn turns(&self, plugin_id: &str) -> Vec<ChatTurn> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .filter(|r| r.plugin_id == plugin_id)
            .flat_map(|r| r.chat.clone())
            .collect()
    }

    pub fn final_artifact(&self, plugin_id: &str) -> Option<String> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| r.plugin_id == plugin_id)
            .and_then(|r| r.generated_plugin.clone())
    }

    fn with_record<T>(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        f: impl FnOnce(&mut ConversationRecord) -> T,
    ) -> T {
        let mut records = self.records.lock().unwrap();
        let idx = match records
            .iter()
            .position(|r| &r.owner == owner && r.plugin_id == plugin_id)
        {
            Some(idx) => idx,
            None => {
                records.push(ConversationRecord {
                    owner: owner.clone(),
                    plugin_id: plugin_id.to_string(),
                    plugin_name: String::new(),
                    chat: Vec::new(),
                    generated_plugin: None,
                    created_at: Utc::now(),
                });
                records.len() - 1
            }
        };
        f(&mut records[idx])
    }
}

impl ConversationRepository for InMemoryRepository {
    async fn append_turn(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        turn: &ChatTurn,
    ) -> Result<(), RepositoryError> {
        self.with_record(owner, plugin_id, |r| r.chat.push(turn.clone()));
        Ok(())
    }

    async fn fetch_history(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("history unavailable".to_string()));
        }
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| &r.owner == owner && r.plugin_id == plugin_id)
            .map(|r| r.chat.clone())
            .unwrap_or_default())
    }

    async fn set_final_artifact(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        code: &str,
    ) -> Result<(), RepositoryError> {
        if self.fail_final.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("disk full".to_string()));
        }
        self.with_record(owner, plugin_id, |r| {
            r.generated_plugin = Some(code.to_string())
        });
        Ok(())
    }

    async fn create_conversation(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
        plugin_name: &str,
    ) -> Result<ConversationRecord, RepositoryError> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| &r.owner == owner && r.plugin_id == plugin_id)
        {
            return Err(RepositoryError::Conflict(plugin_id.to_string()));
        }
        let record = ConversationRecord {
            owner: owner.clone(),
            plugin_id: plugin_id.to_string(),
            plugin_name: plugin_name.to_string(),
            chat: Vec::new(),
            generated_plugin: None,
            created_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn get_conversation(
        &self,
        owner: &PrincipalId,
        plugin_id: &str,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| &r.owner == owner && r.plugin_id == plugin_id)
            .cloned())
    }

    async fn list_conversations(
        &self,
        owner: &PrincipalId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| &r.owner == owner)
            .map(|r| ConversationSummary {
                plugin_id: r.plugin_id.clone(),
                plugin_name: r.plugin_name.clone(),
                is_final: r.generated_plugin.is_some(),
            })
            .collect())
    }
}

/// Test-side ends of one fake upstream connection.
pub struct FakeUpstream {
    pub commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    pub signals: mpsc::UnboundedSender<UpstreamSignal>,
}

impl FakeUpstream {
    /// Next command the session sent, if any is waiting.
    pub fn next_command(&mut self) -> Option<UpstreamCommand> {
        self.commands.try_recv().ok()
    }

    /// Text of the next `clientContent` turn, skipping nothing.
    pub fn next_turn_text(&mut self) -> Option<String> {
        match self.next_command()? {
            UpstreamCommand::Send(UpstreamRequest::Turn(turn)) => Some(turn.text()),
            _ => None,
        }
    }
}

/// A connected channel plus its test-side ends.
pub fn upstream_pair() -> (UpstreamChannel, FakeUpstream) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        UpstreamChannel::new(out_tx, in_rx),
        FakeUpstream {
            commands: out_rx,
            signals: in_tx,
        },
    )
}

/// Hands out pre-arranged connection results in order.
#[derive(Default)]
pub struct FakeConnector {
    results: Mutex<VecDeque<Result<UpstreamChannel, TransportError>>>,
    connects: AtomicUsize,
    hang: AtomicBool,
}

impl FakeConnector {
    /// A connector whose connects never resolve, like a stalled handshake.
    pub fn hanging() -> Self {
        let connector = Self::default();
        connector.hang.store(true, Ordering::SeqCst);
        connector
    }

    pub fn push(&self, result: Result<UpstreamChannel, TransportError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl UpstreamConnector for FakeConnector {
    async fn connect(&self) -> Result<UpstreamChannel, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("no connection arranged".to_string())))
    }
}
