//! Relay WebSocket: `/plugin_generator?plugin_id=<id>[&token=<key>]`.
//!
//! The connection is authenticated once, from the `Authorization` /
//! `X-API-Key` headers or the `token` query parameter (browsers cannot set
//! headers on a WebSocket handshake). Rejected connections are upgraded and
//! then closed with code 1000 and a reason, so clients always see a close
//! frame rather than an HTTP error.
//!
//! Accepted connections are split: a writer task serializes outbound
//! [`ServerMessage`]s, and the reader half is mapped into [`ClientFrame`]s
//! that drive a [`RelaySession`] on this task.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt, future};
use serde::Deserialize;
use tokio::sync::mpsc;

use plugforge_core::identity::PrincipalResolver;
use plugforge_core::relay::{ClientFrame, RelaySession};
use plugforge_types::identity::PrincipalId;
use plugforge_types::protocol::ServerMessage;

use crate::http::extractors::auth::extract_api_key;
use crate::state::AppState;

pub const MISSING_PLUGIN_ID: &str = "Missing plugin_id";
pub const UNAUTHORIZED: &str = "Unauthorized";
pub const INVALID_PATH: &str = "Invalid WebSocket path";

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    pub plugin_id: Option<String>,
    pub token: Option<String>,
}

/// GET /plugin_generator - Upgrade to the relay WebSocket.
pub async fn relay_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<RelayQuery>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();

    let owner = match authorize(&state, &headers, query.token.as_deref()).await {
        Some(owner) => owner,
        None => {
            tracing::warn!("Rejected relay connection: unauthorized");
            return reject(ws, UNAUTHORIZED);
        }
    };

    let plugin_id = match query.plugin_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            tracing::warn!(owner = %owner, "Missing plugin_id in relay query");
            return reject(ws, MISSING_PLUGIN_ID);
        }
    };

    tracing::info!(owner = %owner, plugin_id = %plugin_id, "Relay connection authorized");
    ws.on_upgrade(move |socket| handle_relay_ws(socket, plugin_id, owner, state))
        .into_response()
}

/// Fallback for WebSocket handshakes on any other path.
pub async fn invalid_path_handler(ws: WebSocketUpgrade) -> Response {
    tracing::warn!("No WebSocket handler for requested path");
    reject(ws, INVALID_PATH)
}

/// Resolve the connection's principal. Header credentials take precedence
/// over the `token` query parameter. Storage failures count as rejection.
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    token: Option<&str>,
) -> Option<PrincipalId> {
    let credential = match extract_api_key(headers) {
        Ok(Some(key)) => key,
        Ok(None) => token.map(str::to_string)?,
        Err(_) => return None,
    };

    match state.principals.resolve_principal(&credential).await {
        Ok(owner) => owner,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve relay credential");
            None
        }
    }
}

/// Accept the upgrade only to close it immediately with `reason`.
fn reject(ws: WebSocketUpgrade, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
    })
    .into_response()
}

/// Map a raw socket message to a relay frame. `None` for frames the relay
/// ignores (pings and pongs are answered by axum).
fn client_frame(message: Result<Message, axum::Error>) -> Option<ClientFrame> {
    match message {
        Ok(Message::Text(text)) => Some(ClientFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(ClientFrame::Text(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Ok(Message::Close(_)) => Some(ClientFrame::Close),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Err(err) => {
            tracing::debug!("Relay WebSocket receive error: {err}");
            Some(ClientFrame::Close)
        }
    }
}

async fn handle_relay_ws(socket: WebSocket, plugin_id: String, owner: PrincipalId, state: AppState) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = client_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::warn!("Failed to serialize relay message: {err}"),
            }
        }
        let _ = ws_sender.close().await;
    });

    let frames = Box::pin(ws_receiver.filter_map(|message| future::ready(client_frame(message))));

    let session = RelaySession::new(
        plugin_id,
        owner,
        state.relay_config.clone(),
        state.conversation_repo.clone(),
        state.connector.clone(),
        client_tx,
    );
    session.run(frames, state.shutdown.clone()).await;

    // The session dropped its sender; the writer drains what is left and exits.
    let _ = writer.await;
    tracing::debug!("Relay WebSocket connection closed");
}
