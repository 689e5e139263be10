//! Relay session state machine.
//!
//! One [`RelaySession`] bridges one client connection to (at most) one
//! upstream model connection at a time. All state lives here and is only
//! mutated from the session task (see `driver.rs`), so the buffer, the
//! queue and the readiness flags need no locking.
//!
//! ```text
//! AwaitingUpstream --first message--> Handshaking --setupComplete--> PrimingHistory
//!        ^                                                               |
//!        |                                                   priming turn completes
//!   (next message                                                        v
//!    reconnects)   <--upstream close/error-- ClosedWithError <------- Ready
//! ```

use std::fmt;
use std::sync::Arc;

use plugforge_types::chat::ChatTurn;
use plugforge_types::config::RelayConfig;
use plugforge_types::error::TransportError;
use plugforge_types::identity::PrincipalId;
use plugforge_types::protocol::{
    ClientContentMessage, ServerMessage, SetupMessage, UpstreamEvent, UpstreamRequest,
    parse_client_message,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::conversation::repository::ConversationRepository;
use crate::relay::accumulator::TurnAccumulator;
use crate::relay::gate::{PendingQueue, ReadinessGate};
use crate::relay::validator::{ArtifactValidator, split_terminal};
use crate::upstream::{UpstreamChannel, UpstreamConnector, UpstreamSignal};

/// Error shown to the client when the validator rejects a final plugin.
pub const REJECTED_ARTIFACT_ERROR: &str = "Generated plugin code is invalid or unsafe";

/// Error shown to the client when a turn cannot be sent upstream.
pub const NOT_CONNECTED_ERROR: &str = "Upstream socket is not connected or setup not complete";

/// Error shown to the client for an undecodable upstream frame.
pub const MALFORMED_UPSTREAM_ERROR: &str = "Error processing upstream response";

/// Lifecycle of a relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No upstream connection has been requested yet.
    AwaitingUpstream,
    /// Upstream socket open, setup sent, waiting for acknowledgement.
    Handshaking,
    /// Setup acknowledged, priming request sent, waiting for its reply.
    PrimingHistory,
    /// Client messages are forwarded immediately.
    Ready,
    /// The client went away. Terminal.
    Closed,
    /// The upstream failed. The next client message reconnects.
    ClosedWithError(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitingUpstream => write!(f, "awaiting_upstream"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::PrimingHistory => write!(f, "priming_history"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::ClosedWithError(_) => write!(f, "closed_with_error"),
        }
    }
}

/// Outcome of routing one client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Forwarded, queued or rejected. Nothing left for the caller to do.
    Handled,
    /// Queued behind a new upstream connection. The caller opens it with
    /// the session's connector and reports back through
    /// [`RelaySession::finish_connect`].
    Connect,
}

/// One client connection's bridge to the upstream model.
pub struct RelaySession<R, C> {
    session_key: String,
    owner: PrincipalId,
    config: Arc<RelayConfig>,
    repo: Arc<R>,
    connector: Arc<C>,
    validator: ArtifactValidator,
    client: mpsc::UnboundedSender<ServerMessage>,
    state: SessionState,
    gate: ReadinessGate,
    queue: PendingQueue,
    accumulator: TurnAccumulator,
    /// Queue length before the message that triggered the in-flight
    /// connect. A failed connect truncates back to it.
    connect_rollback: Option<usize>,
    pub(crate) upstream: Option<UpstreamChannel>,
}

impl<R, C> RelaySession<R, C>
where
    R: ConversationRepository,
    C: UpstreamConnector,
{
    /// Create a session for an authorized client connection. No upstream
    /// connection is opened until the first client message arrives.
    pub fn new(
        session_key: impl Into<String>,
        owner: PrincipalId,
        config: Arc<RelayConfig>,
        repo: Arc<R>,
        connector: Arc<C>,
        client: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let validator = ArtifactValidator::new(&config.artifact);
        let queue = PendingQueue::new(config.session.max_pending_messages);
        Self {
            session_key: session_key.into(),
            owner,
            config,
            repo,
            connector,
            validator,
            client,
            state: SessionState::AwaitingUpstream,
            gate: ReadinessGate::new(),
            queue,
            accumulator: TurnAccumulator::new(),
            connect_rollback: None,
            upstream: None,
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn owner(&self) -> &PrincipalId {
        &self.owner
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn gate(&self) -> ReadinessGate {
        self.gate
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Shared handle on the connector, for opening the upstream off the
    /// session borrow.
    pub fn connector(&self) -> Arc<C> {
        Arc::clone(&self.connector)
    }

    fn notify(&self, message: ServerMessage) {
        if self.client.send(message).is_err() {
            debug!("Client outbound channel closed, dropping message");
        }
    }

    fn upstream_open(&self) -> bool {
        self.upstream.as_ref().is_some_and(UpstreamChannel::is_open)
    }

    fn send_upstream(&self, request: UpstreamRequest) -> Result<(), TransportError> {
        match &self.upstream {
            Some(channel) => channel.send(request),
            None => Err(TransportError::NotOpen),
        }
    }

    fn send_upstream_text(&self, text: &str) -> Result<(), TransportError> {
        self.send_upstream(UpstreamRequest::Turn(ClientContentMessage::user_text(text)))
    }

    // --- Client side ---

    /// Handle one raw text frame from the client.
    pub async fn handle_client_text(&mut self, raw: &str) -> Routed {
        match parse_client_message(raw) {
            Ok(text) => {
                debug!(len = text.len(), "Client message accepted");
                self.submit(text).await
            }
            Err(e) => {
                warn!(error = %e, "Rejected client frame");
                self.notify(ServerMessage::error(format!("Invalid message format: {e}")));
                Routed::Handled
            }
        }
    }

    /// Route a validated client message according to the current state.
    ///
    /// With no live upstream the message is queued and [`Routed::Connect`]
    /// is returned. The session is `Handshaking` from then on, so messages
    /// arriving before the connect resolves queue behind it.
    pub async fn submit(&mut self, text: String) -> Routed {
        let state = self.state.clone();
        match state {
            SessionState::AwaitingUpstream | SessionState::ClosedWithError(_) => {
                let retained = self.queue.len();
                if !self.enqueue(text) {
                    return Routed::Handled;
                }
                self.begin_connect(retained);
                Routed::Connect
            }
            SessionState::Handshaking | SessionState::PrimingHistory => {
                self.enqueue(text);
                Routed::Handled
            }
            SessionState::Ready => {
                self.forward_user_turn(text).await;
                Routed::Handled
            }
            SessionState::Closed => {
                debug!("Session closed, ignoring client message");
                Routed::Handled
            }
        }
    }

    fn enqueue(&mut self, text: String) -> bool {
        match self.queue.enqueue(text) {
            Ok(()) => {
                debug!(pending = self.queue.len(), state = %self.state, "Message queued");
                true
            }
            Err(e) => {
                warn!(error = %e, "Pending queue full, rejecting message");
                self.notify(ServerMessage::error(format!("Too many pending messages: {e}")));
                false
            }
        }
    }

    /// Forward a user turn that bypasses the queue, then persist it.
    async fn forward_user_turn(&mut self, text: String) {
        if let Err(e) = self.send_upstream_text(&text) {
            warn!(error = %e, "Cannot forward message upstream");
            self.notify(ServerMessage::error(NOT_CONNECTED_ERROR));
            return;
        }
        self.persist_turn(ChatTurn::from_user(text), "user message").await;
    }

    /// Client went away: close upstream, drop everything in flight.
    pub fn close(&mut self) {
        if let Some(channel) = self.upstream.take() {
            channel.close();
        }
        let discarded = self.queue.len();
        self.queue.clear();
        self.connect_rollback = None;
        self.accumulator.clear();
        self.gate.reset();
        self.state = SessionState::Closed;
        info!(discarded_pending = discarded, "Relay session closed");
    }

    // --- Upstream side ---

    fn begin_connect(&mut self, retained: usize) {
        self.gate.reset();
        self.accumulator.clear();
        self.connect_rollback = Some(retained);
        self.state = SessionState::Handshaking;
        info!(model = %self.config.upstream.model, "Opening upstream connection");
    }

    /// Complete a connect started by [`Routed::Connect`].
    ///
    /// On failure the message that triggered the connect, and any queued
    /// behind it while connecting, are dropped. Messages retained from an
    /// earlier connection stay queued.
    pub fn finish_connect(&mut self, result: Result<UpstreamChannel, TransportError>) {
        let rollback = self.connect_rollback.take();
        if self.state != SessionState::Handshaking || self.upstream.is_some() {
            debug!("No connect in flight, dropping result");
            if let Ok(channel) = result {
                channel.close();
            }
            return;
        }

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "Upstream connection failed");
                if let Some(retained) = rollback {
                    self.queue.truncate(retained);
                }
                self.state = SessionState::ClosedWithError(e.to_string());
                self.notify(ServerMessage::error(format!(
                    "Failed to connect to upstream model: {e}"
                )));
                return;
            }
        };

        self.upstream = Some(channel);
        self.notify(ServerMessage::connected());

        let setup = SetupMessage::text_only(
            self.config.upstream.model.clone(),
            self.config.prompts.system.clone(),
        );
        if let Err(e) = self.send_upstream(UpstreamRequest::Setup(setup)) {
            self.upstream_lost(format!("Failed to connect to upstream model: {e}"));
            return;
        }
        debug!("Setup frame sent");
    }

    /// Handle the next inbound signal. `None` means the transport vanished
    /// without reporting why.
    pub async fn handle_upstream_signal(&mut self, signal: Option<UpstreamSignal>) {
        match signal {
            Some(UpstreamSignal::Event(event)) => self.handle_event(event).await,
            Some(UpstreamSignal::Malformed(reason)) => {
                warn!(reason = %reason, "Undecodable upstream frame");
                self.notify(ServerMessage::error(MALFORMED_UPSTREAM_ERROR));
            }
            Some(UpstreamSignal::Closed { code, reason }) => {
                info!(code, reason = %reason, "Upstream connection closed");
                self.upstream_lost(format!(
                    "Upstream connection closed with code {code}, reason: {reason}"
                ));
            }
            Some(UpstreamSignal::Error(e)) => {
                error!(error = %e, "Upstream connection error");
                self.upstream_lost(format!("Upstream connection error: {e}"));
            }
            None => {
                warn!("Upstream transport ended without a close frame");
                self.upstream_lost(
                    "Upstream connection closed with code 1006, reason: ".to_string(),
                );
            }
        }
    }

    /// Reset the connection-scoped state. The pending queue survives so its
    /// messages are replayed after the next priming.
    fn upstream_lost(&mut self, message: String) {
        self.upstream = None;
        self.gate.reset();
        self.accumulator.clear();
        self.state = SessionState::ClosedWithError(message.clone());
        self.notify(ServerMessage::error(message));
    }

    async fn handle_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::SetupComplete => self.on_setup_complete().await,
            UpstreamEvent::ModelTurn {
                parts,
                turn_complete,
                interrupted,
            } => {
                if interrupted {
                    debug!(turn_complete, "Upstream reported interruption");
                }
                if let Some(text) = self.accumulator.apply(&parts, turn_complete) {
                    self.on_turn_complete(text).await;
                }
            }
            UpstreamEvent::Unrecognized(value) => {
                debug!(frame = %value, "Ignoring unrecognized upstream frame");
            }
        }
    }

    async fn on_setup_complete(&mut self) {
        if !self.gate.mark_handshake() {
            warn!("Duplicate setupComplete ignored");
            return;
        }
        self.state = SessionState::PrimingHistory;
        self.notify(ServerMessage::setup_complete());
        info!("Upstream setup acknowledged");
        self.prime().await;
    }

    /// Send the single priming request for this connection: prior history
    /// when there is some, the greeting instruction otherwise. Neither is
    /// persisted.
    async fn prime(&mut self) {
        let prompts = &self.config.prompts;
        let prompt = match self
            .repo
            .fetch_history(&self.owner, &self.session_key)
            .await
        {
            Ok(history) if !history.is_empty() => match serde_json::to_string(&history) {
                Ok(json) => {
                    info!(turns = history.len(), "Priming with chat history");
                    format!("{}{}", prompts.history_preamble, json)
                }
                Err(e) => {
                    error!(error = %e, "Failed to encode chat history, sending greeting");
                    prompts.greeting.clone()
                }
            },
            Ok(_) => {
                info!("No chat history, priming with greeting");
                prompts.greeting.clone()
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch chat history");
                self.notify(ServerMessage::error(format!(
                    "Failed to fetch chat history: {e}"
                )));
                prompts.greeting.clone()
            }
        };

        if let Err(e) = self.send_upstream_text(&prompt) {
            warn!(error = %e, "Cannot send priming request");
            self.notify(ServerMessage::error(NOT_CONNECTED_ERROR));
        }
    }

    async fn on_turn_complete(&mut self, text: String) {
        let priming_reply = !self.gate.priming_complete();
        debug!(len = text.len(), priming_reply, "Upstream turn complete");

        match split_terminal(&text, &self.config.artifact.terminal_marker) {
            Some(code) => self.on_final_artifact(code.to_string()).await,
            None => {
                self.notify(ServerMessage::response(text.clone()));
                self.persist_turn(ChatTurn::from_generator(text), "plugin generator message")
                    .await;
            }
        }

        if priming_reply && self.gate.mark_primed() {
            self.state = SessionState::Ready;
            info!(pending = self.queue.len(), "Priming complete, draining queue");
            self.drain().await;
        }
    }

    async fn on_final_artifact(&mut self, code: String) {
        if let Err(reason) = self.validator.check(&code) {
            warn!(reason = %reason, "Final plugin rejected");
            self.notify(ServerMessage::error(REJECTED_ARTIFACT_ERROR));
            if let Err(e) = self.send_upstream_text(&self.config.prompts.revision) {
                warn!(error = %e, "Cannot request revision");
                self.notify(ServerMessage::error(NOT_CONNECTED_ERROR));
            }
            return;
        }

        match self
            .repo
            .set_final_artifact(&self.owner, &self.session_key, &code)
            .await
        {
            Ok(()) => {
                info!(len = code.len(), "Final plugin saved");
                self.notify(ServerMessage::final_artifact(code));
            }
            Err(e) => {
                error!(error = %e, "Failed to save final plugin");
                self.notify(ServerMessage::error(format!(
                    "Failed to save final plugin code: {e}"
                )));
            }
        }
    }

    /// Forward queued messages in order. Stops, keeping the remainder, as
    /// soon as the upstream is not open.
    async fn drain(&mut self) {
        while let Some(text) = self.queue.pop_front() {
            if !self.upstream_open() || self.send_upstream_text(&text).is_err() {
                self.queue.restore_front(text);
                warn!(remaining = self.queue.len(), "Upstream not open, drain stopped");
                break;
            }
            self.persist_turn(ChatTurn::from_user(text), "user message").await;
        }
    }

    /// Best-effort persistence: failures are logged and reported to the
    /// client, never retried.
    async fn persist_turn(&self, turn: ChatTurn, what: &str) {
        if let Err(e) = self
            .repo
            .append_turn(&self.owner, &self.session_key, &turn)
            .await
        {
            error!(error = %e, sender = %turn.sender, "Failed to persist turn");
            self.notify(ServerMessage::error(format!("Failed to save {what}: {e}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeUpstream, InMemoryRepository, upstream_pair};
    use crate::upstream::UpstreamCommand;
    use plugforge_types::chat::Sender;
    use plugforge_types::protocol::Part;

    const KEY: &str = "plg_test";

    struct Harness {
        session: RelaySession<InMemoryRepository, FakeConnector>,
        repo: Arc<InMemoryRepository>,
        connector: Arc<FakeConnector>,
        client: mpsc::UnboundedReceiver<ServerMessage>,
    }

    fn harness_with(config: RelayConfig, repo: InMemoryRepository) -> Harness {
        let repo = Arc::new(repo);
        let connector = Arc::new(FakeConnector::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = RelaySession::new(
            KEY,
            PrincipalId::new("usr_1"),
            Arc::new(config),
            Arc::clone(&repo),
            Arc::clone(&connector),
            tx,
        );
        Harness {
            session,
            repo,
            connector,
            client: rx,
        }
    }

    impl Harness {
        /// Deliver a client frame, completing any connect it starts.
        async fn send(&mut self, raw: &str) {
            if self.session.handle_client_text(raw).await == Routed::Connect {
                let result = self.connector.connect().await;
                self.session.finish_connect(result);
            }
        }
    }

    fn harness() -> Harness {
        harness_with(RelayConfig::default(), InMemoryRepository::default())
    }

    fn drain_client(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn msg(text: &str) -> String {
        serde_json::json!({ "message": text }).to_string()
    }

    fn turn(text: &str) -> UpstreamSignal {
        UpstreamSignal::Event(UpstreamEvent::ModelTurn {
            parts: vec![Part::text(text)],
            turn_complete: true,
            interrupted: false,
        })
    }

    fn setup_complete() -> UpstreamSignal {
        UpstreamSignal::Event(UpstreamEvent::SetupComplete)
    }

    /// Connect, acknowledge setup and answer the priming request.
    async fn bring_to_ready(h: &mut Harness, first: &str) -> FakeUpstream {
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg(first)).await;
        assert!(matches!(
            upstream.next_command(),
            Some(UpstreamCommand::Send(UpstreamRequest::Setup(_)))
        ));
        h.session.handle_upstream_signal(Some(setup_complete())).await;
        upstream.next_turn_text().expect("priming request");
        h.session.handle_upstream_signal(Some(turn("Hi, what would you like?"))).await;
        upstream
    }

    #[tokio::test]
    async fn test_invalid_client_frame_reports_error_and_stays_idle() {
        let mut h = harness();
        h.send(r#"{"message":"   "}"#).await;
        let out = drain_client(&mut h.client);
        assert_eq!(
            out,
            vec![ServerMessage::error(
                "Invalid message format: Message field cannot be empty"
            )]
        );
        assert_eq!(h.session.state(), &SessionState::AwaitingUpstream);
        assert_eq!(h.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_first_message_opens_upstream_and_queues() {
        let mut h = harness();
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        h.send(&msg("blue button")).await;

        assert_eq!(h.session.state(), &SessionState::Handshaking);
        assert_eq!(h.session.pending_len(), 1);
        assert_eq!(drain_client(&mut h.client), vec![ServerMessage::connected()]);
        match upstream.next_command() {
            Some(UpstreamCommand::Send(UpstreamRequest::Setup(setup))) => {
                assert_eq!(setup.setup.model, "models/gemini-2.0-flash-exp");
                assert_eq!(setup.setup.generation_config.response_modalities, "text");
            }
            other => panic!("expected setup, got {other:?}"),
        }
        assert!(upstream.next_command().is_none());
    }

    #[tokio::test]
    async fn test_messages_while_handshaking_do_not_reconnect() {
        let mut h = harness();
        let (channel, _upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        h.send(&msg("one")).await;
        h.send(&msg("two")).await;

        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.session.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_end_to_end_empty_history() {
        let mut h = harness();
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        h.send(&msg("hello")).await;
        upstream.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;
        assert_eq!(h.session.state(), &SessionState::PrimingHistory);

        let priming = upstream.next_turn_text().unwrap();
        assert_eq!(priming, RelayConfig::default().prompts.greeting);
        // Queued message must not overtake the priming request.
        assert!(upstream.next_command().is_none());

        h.session
            .handle_upstream_signal(Some(turn("Hi, what would you like?")))
            .await;
        assert_eq!(h.session.state(), &SessionState::Ready);
        assert_eq!(upstream.next_turn_text().as_deref(), Some("hello"));

        h.send(&msg("blue button")).await;
        assert_eq!(upstream.next_turn_text().as_deref(), Some("blue button"));

        let out = drain_client(&mut h.client);
        assert_eq!(
            out,
            vec![
                ServerMessage::connected(),
                ServerMessage::setup_complete(),
                ServerMessage::response("Hi, what would you like?"),
            ]
        );

        let stored = h.repo.turns(KEY);
        let pairs: Vec<(Sender, &str)> =
            stored.iter().map(|t| (t.sender, t.content.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                (Sender::PluginGenerator, "Hi, what would you like?"),
                (Sender::User, "hello"),
                (Sender::User, "blue button"),
            ]
        );
    }

    #[tokio::test]
    async fn test_priming_with_history_sends_preamble_and_json() {
        let repo = InMemoryRepository::default();
        repo.seed(KEY, vec![ChatTurn::from_user("earlier")]);
        let mut h = harness_with(RelayConfig::default(), repo);
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        h.send(&msg("next")).await;
        upstream.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;

        let priming = upstream.next_turn_text().unwrap();
        let preamble = &RelayConfig::default().prompts.history_preamble;
        assert!(priming.starts_with(preamble.as_str()));
        let history: Vec<ChatTurn> = serde_json::from_str(&priming[preamble.len()..]).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "earlier");

        // The priming request itself is never stored.
        assert_eq!(h.repo.turns(KEY).len(), 1);
    }

    #[tokio::test]
    async fn test_queued_messages_drain_in_order_before_late_message() {
        let mut h = harness();
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        for i in 1..=4 {
            h.send(&msg(&format!("m{i}"))).await;
        }
        upstream.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;
        h.send(&msg("m5")).await;
        upstream.next_turn_text().unwrap();
        h.session.handle_upstream_signal(Some(turn("Hi"))).await;
        h.send(&msg("m6")).await;

        let sent: Vec<String> = std::iter::from_fn(|| upstream.next_turn_text()).collect();
        assert_eq!(sent, vec!["m1", "m2", "m3", "m4", "m5", "m6"]);
        assert_eq!(h.session.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_fragments_assemble_into_one_response() {
        let mut h = harness();
        let _upstream = bring_to_ready(&mut h, "x").await;
        drain_client(&mut h.client);

        for (text, done) in [("Wha", false), ("t col", false), ("or?", true)] {
            h.session
                .handle_upstream_signal(Some(UpstreamSignal::Event(UpstreamEvent::ModelTurn {
                    parts: vec![Part::text(text)],
                    turn_complete: done,
                    interrupted: false,
                })))
                .await;
        }

        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::response("What color?")]
        );
    }

    #[tokio::test]
    async fn test_final_artifact_is_stripped_validated_and_stored() {
        let mut h = harness();
        let _upstream = bring_to_ready(&mut h, "x").await;
        drain_client(&mut h.client);

        let code = "<?php\n/**\n * Plugin Name: Blue\n */";
        h.session
            .handle_upstream_signal(Some(turn(&format!("FINAL_PLUGIN:\n{code}\n"))))
            .await;

        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::final_artifact(code)]
        );
        assert_eq!(h.repo.final_artifact(KEY).as_deref(), Some(code));
        assert!(h
            .repo
            .turns(KEY)
            .iter()
            .all(|t| !t.content.contains("FINAL_PLUGIN:")));
    }

    #[tokio::test]
    async fn test_rejected_artifact_requests_revision() {
        let mut h = harness();
        let mut upstream = bring_to_ready(&mut h, "x").await;
        upstream.next_turn_text();
        drain_client(&mut h.client);

        h.session
            .handle_upstream_signal(Some(turn(
                "FINAL_PLUGIN: <?php /* Plugin Name: X */ eval($x);",
            )))
            .await;

        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::error(REJECTED_ARTIFACT_ERROR)]
        );
        assert_eq!(
            upstream.next_turn_text(),
            Some(RelayConfig::default().prompts.revision)
        );
        assert!(h.repo.final_artifact(KEY).is_none());
        assert_eq!(h.session.state(), &SessionState::Ready);
    }

    #[tokio::test]
    async fn test_final_artifact_save_failure_reports_error() {
        let repo = InMemoryRepository::default();
        repo.fail_final();
        let mut h = harness_with(RelayConfig::default(), repo);
        let _upstream = bring_to_ready(&mut h, "x").await;
        drain_client(&mut h.client);

        h.session
            .handle_upstream_signal(Some(turn("FINAL_PLUGIN: <?php // Plugin Name: X")))
            .await;

        let out = drain_client(&mut h.client);
        assert_eq!(out.len(), 1);
        match &out[0] {
            ServerMessage::Error { error } => {
                assert!(error.starts_with("Failed to save final plugin code:"))
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_fetch_failure_still_primes() {
        let repo = InMemoryRepository::default();
        repo.fail_history();
        let mut h = harness_with(RelayConfig::default(), repo);
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        h.send(&msg("x")).await;
        upstream.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;

        assert_eq!(
            upstream.next_turn_text(),
            Some(RelayConfig::default().prompts.greeting)
        );
        let out = drain_client(&mut h.client);
        assert!(out.iter().any(|m| matches!(
            m,
            ServerMessage::Error { error } if error.starts_with("Failed to fetch chat history:")
        )));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_and_does_not_queue() {
        let mut h = harness();
        h.connector
            .push(Err(TransportError::Connect("refused".to_string())));

        h.send(&msg("x")).await;

        assert!(matches!(h.session.state(), SessionState::ClosedWithError(_)));
        assert_eq!(h.session.pending_len(), 0);
        let out = drain_client(&mut h.client);
        assert_eq!(
            out,
            vec![ServerMessage::error(
                "Failed to connect to upstream model: failed to connect: refused"
            )]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_drops_only_its_own_messages() {
        let mut h = harness();
        let (channel, mut first) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg("kept")).await;
        first.next_command();
        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Error("reset".to_string())))
            .await;
        assert_eq!(h.session.pending_len(), 1);

        // A connect is in flight while "late" arrives, then it fails.
        assert_eq!(h.session.handle_client_text(&msg("trigger")).await, Routed::Connect);
        assert_eq!(h.session.handle_client_text(&msg("late")).await, Routed::Handled);
        assert_eq!(h.session.pending_len(), 3);
        h.session
            .finish_connect(Err(TransportError::Connect("refused".to_string())));

        assert!(matches!(h.session.state(), SessionState::ClosedWithError(_)));
        assert_eq!(h.session.pending_len(), 1);

        let (channel, mut second) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg("retry")).await;
        second.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;
        second.next_turn_text().expect("priming request");
        h.session.handle_upstream_signal(Some(turn("Hi"))).await;

        let sent: Vec<String> = std::iter::from_fn(|| second.next_turn_text()).collect();
        assert_eq!(sent, vec!["kept", "retry"]);
    }

    #[tokio::test]
    async fn test_interrupted_without_turn_complete_is_a_no_op() {
        let mut h = harness();
        let _upstream = bring_to_ready(&mut h, "x").await;
        drain_client(&mut h.client);
        let stored = h.repo.turns(KEY).len();

        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Event(UpstreamEvent::ModelTurn {
                parts: vec![Part::text("par")],
                turn_complete: false,
                interrupted: false,
            })))
            .await;
        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Event(UpstreamEvent::ModelTurn {
                parts: vec![],
                turn_complete: false,
                interrupted: true,
            })))
            .await;

        assert!(drain_client(&mut h.client).is_empty());
        assert_eq!(h.repo.turns(KEY).len(), stored);
        assert_eq!(h.session.state(), &SessionState::Ready);

        h.session.handle_upstream_signal(Some(turn("tial"))).await;
        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::response("partial")]
        );
    }

    #[tokio::test]
    async fn test_repeated_setup_complete_primes_once() {
        let mut h = harness();
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg("hello")).await;
        upstream.next_command();

        h.session.handle_upstream_signal(Some(setup_complete())).await;
        h.session.handle_upstream_signal(Some(setup_complete())).await;

        assert!(upstream.next_turn_text().is_some());
        assert!(upstream.next_command().is_none());
        assert_eq!(h.session.state(), &SessionState::PrimingHistory);
        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::connected(), ServerMessage::setup_complete()]
        );
    }

    #[tokio::test]
    async fn test_drain_stops_when_upstream_not_open() {
        let mut h = harness();
        let (channel, upstream) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg("a")).await;
        h.send(&msg("b")).await;
        h.session.handle_upstream_signal(Some(setup_complete())).await;

        // The transport's writer goes away before the priming reply lands.
        let FakeUpstream { commands, signals: _signals } = upstream;
        drop(commands);
        h.session.handle_upstream_signal(Some(turn("Hi"))).await;

        assert_eq!(h.session.pending_len(), 2);
        let senders: Vec<Sender> = h.repo.turns(KEY).iter().map(|t| t.sender).collect();
        assert_eq!(senders, vec![Sender::PluginGenerator]);
    }

    #[tokio::test]
    async fn test_upstream_close_resets_and_next_message_reconnects() {
        let mut h = harness();
        let _first = bring_to_ready(&mut h, "x").await;
        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Event(UpstreamEvent::ModelTurn {
                parts: vec![Part::text("partial")],
                turn_complete: false,
                interrupted: false,
            })))
            .await;
        drain_client(&mut h.client);

        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Closed {
                code: 1011,
                reason: "internal".to_string(),
            }))
            .await;
        assert!(matches!(h.session.state(), SessionState::ClosedWithError(_)));
        assert!(!h.session.gate().handshake_complete());
        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::error(
                "Upstream connection closed with code 1011, reason: internal"
            )]
        );

        let (channel, mut second) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg("again")).await;
        assert_eq!(h.connector.connect_count(), 2);
        assert_eq!(h.session.state(), &SessionState::Handshaking);

        second.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;
        second.next_turn_text();
        // The partial fragment from the old connection is gone.
        h.session.handle_upstream_signal(Some(turn("Welcome back"))).await;
        let out = drain_client(&mut h.client);
        assert!(out.contains(&ServerMessage::response("Welcome back")));
        assert_eq!(second.next_turn_text().as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn test_client_close_discards_state_without_persisting() {
        let mut h = harness();
        let (channel, mut upstream) = upstream_pair();
        h.connector.push(Ok(channel));
        h.send(&msg("queued")).await;
        upstream.next_command();
        h.session.handle_upstream_signal(Some(setup_complete())).await;
        upstream.next_turn_text();
        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Event(UpstreamEvent::ModelTurn {
                parts: vec![Part::text("half a repl")],
                turn_complete: false,
                interrupted: false,
            })))
            .await;

        h.session.close();

        assert_eq!(h.session.state(), &SessionState::Closed);
        assert_eq!(h.session.pending_len(), 0);
        assert_eq!(upstream.next_command(), Some(UpstreamCommand::Close));
        assert!(h.repo.turns(KEY).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_upstream_frame_keeps_session() {
        let mut h = harness();
        let _upstream = bring_to_ready(&mut h, "x").await;
        drain_client(&mut h.client);

        h.session
            .handle_upstream_signal(Some(UpstreamSignal::Malformed("bad json".to_string())))
            .await;

        assert_eq!(
            drain_client(&mut h.client),
            vec![ServerMessage::error(MALFORMED_UPSTREAM_ERROR)]
        );
        assert_eq!(h.session.state(), &SessionState::Ready);
    }

    #[tokio::test]
    async fn test_bounded_queue_rejects_overflow() {
        let mut config = RelayConfig::default();
        config.session.max_pending_messages = Some(1);
        let mut h = harness_with(config, InMemoryRepository::default());
        let (channel, _upstream) = upstream_pair();
        h.connector.push(Ok(channel));

        h.send(&msg("a")).await;
        h.send(&msg("b")).await;

        assert_eq!(h.session.pending_len(), 1);
        let out = drain_client(&mut h.client);
        assert!(out.last().is_some_and(ServerMessage::is_error));
    }
}
