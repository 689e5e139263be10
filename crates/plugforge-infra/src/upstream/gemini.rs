//! Gemini Live transport over `tokio-tungstenite`.
//!
//! Each `connect` opens one socket and spawns a bridge task that owns it.
//! The relay talks to the bridge only through the [`UpstreamChannel`]
//! command/signal pair, so the socket is never shared.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use plugforge_core::upstream::{
    UpstreamChannel, UpstreamCommand, UpstreamConnector, UpstreamSignal,
};
use plugforge_types::error::TransportError;
use plugforge_types::protocol::UpstreamEvent;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Opens Gemini Live sessions.
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: Option<SecretString>,
    connect_timeout: Option<Duration>,
}

impl GeminiLiveConnector {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            connect_timeout,
        }
    }

    /// Endpoint without credentials, safe to log.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    fn authenticated_url(&self) -> Result<String, TransportError> {
        let key = self
            .api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .filter(|k| !k.is_empty())
            .ok_or(TransportError::MissingApiKey)?;
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{separator}key={key}", self.endpoint))
    }
}

impl UpstreamConnector for GeminiLiveConnector {
    async fn connect(&self) -> Result<UpstreamChannel, TransportError> {
        let url = self.authenticated_url()?;
        let _ = rustls::crypto::ring::default_provider().install_default();

        debug!(endpoint = %self.endpoint, "Opening upstream socket");
        let attempt = connect_async(url);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| TransportError::Timeout(limit.as_secs()))?,
            None => attempt.await,
        };
        // Connection errors may echo the request URL; never surface the key.
        let (ws, _) = result.map_err(|e| TransportError::Connect(redact_key(&e.to_string())))?;

        info!(endpoint = %self.endpoint, "Upstream socket open");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(bridge_loop(ws, cmd_rx, signal_tx));

        Ok(UpstreamChannel::new(cmd_tx, signal_rx))
    }
}

/// Mask the value of any `key=` query parameter.
fn redact_key(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find("key=") {
        let (head, tail) = rest.split_at(idx + "key=".len());
        out.push_str(head);
        out.push_str("***");
        let end = tail
            .find(|c: char| c == '&' || c == ' ' || c == '"' || c == '\'')
            .unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

/// Translate one inbound websocket message. `None` for control frames the
/// relay does not care about.
fn signal_from_message(message: Message) -> Option<UpstreamSignal> {
    let text = match message {
        Message::Text(text) => text.as_str().to_owned(),
        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_owned(),
            Err(e) => {
                return Some(UpstreamSignal::Malformed(format!(
                    "binary frame is not UTF-8: {e}"
                )));
            }
        },
        Message::Close(frame) => {
            return Some(match frame {
                Some(frame) => UpstreamSignal::Closed {
                    code: u16::from(frame.code),
                    reason: frame.reason.as_str().to_owned(),
                },
                None => UpstreamSignal::Closed {
                    code: NO_STATUS_RECEIVED,
                    reason: String::new(),
                },
            });
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
    };

    Some(match UpstreamEvent::decode(&text) {
        Ok(event) => UpstreamSignal::Event(event),
        Err(e) => UpstreamSignal::Malformed(e.to_string()),
    })
}

/// Owns the socket: writes commands, reads frames, and ends after the first
/// terminal signal or a close command.
async fn bridge_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<UpstreamCommand>,
    signal_tx: mpsc::UnboundedSender<UpstreamSignal>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(UpstreamCommand::Send(request)) => {
                    let json = match request.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode upstream frame");
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                        let _ = signal_tx.send(UpstreamSignal::Error(e.to_string()));
                        break;
                    }
                }
                Some(UpstreamCommand::Close) | None => {
                    debug!("Closing upstream socket");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = ws_rx.next() => match msg {
                Some(Ok(message)) => {
                    let Some(signal) = signal_from_message(message) else { continue };
                    let terminal = matches!(signal, UpstreamSignal::Closed { .. });
                    if signal_tx.send(signal).is_err() || terminal {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = signal_tx.send(UpstreamSignal::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = signal_tx.send(UpstreamSignal::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    break;
                }
            },
        }
    }
}
