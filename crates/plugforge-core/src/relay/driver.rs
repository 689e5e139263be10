//! Session task: the single loop that owns a [`RelaySession`].
//!
//! Client frames, upstream signals, an in-flight upstream connect and
//! server shutdown are multiplexed with `tokio::select!`, so every state
//! mutation happens on this one task. The connect is a branch of its own:
//! a client close or shutdown abandons it instead of waiting it out.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use plugforge_types::error::TransportError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::conversation::repository::ConversationRepository;
use crate::relay::session::{RelaySession, Routed};
use crate::upstream::{UpstreamChannel, UpstreamConnector, UpstreamSignal};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<UpstreamChannel, TransportError>> + Send>>;

/// A frame from the client connection, already stripped of transport
/// details (pings, binary vs. text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Close,
}

/// Wait for the next signal on the current upstream connection, or forever
/// when there is none.
async fn next_upstream_signal(upstream: &mut Option<UpstreamChannel>) -> Option<UpstreamSignal> {
    match upstream {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait for the in-flight connect, or forever when there is none.
async fn connect_result(
    connecting: &mut Option<ConnectFuture>,
) -> Result<UpstreamChannel, TransportError> {
    match connecting {
        Some(connect) => connect.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<R, C> RelaySession<R, C>
where
    R: ConversationRepository,
    C: UpstreamConnector + 'static,
{
    /// Drive the session until the client disconnects or `shutdown` fires.
    /// Either way the upstream is closed and in-flight state discarded.
    pub async fn run<S>(mut self, mut frames: S, shutdown: CancellationToken)
    where
        S: Stream<Item = ClientFrame> + Unpin + Send,
    {
        let span = info_span!(
            "relay_session",
            session_key = %self.session_key(),
            owner = %self.owner(),
        );

        async move {
            info!("Relay session started");
            let mut connecting: Option<ConnectFuture> = None;
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!(
                            connecting = connecting.is_some(),
                            "Server shutting down, closing relay session"
                        );
                        self.close();
                        break;
                    }

                    frame = frames.next() => match frame {
                        Some(ClientFrame::Text(raw)) => {
                            if self.handle_client_text(&raw).await == Routed::Connect {
                                let connector = self.connector();
                                let connect: ConnectFuture =
                                    Box::pin(async move { connector.connect().await });
                                connecting = Some(connect);
                            }
                        }
                        Some(ClientFrame::Close) | None => {
                            debug!(connecting = connecting.is_some(), "Client disconnected");
                            self.close();
                            break;
                        }
                    },

                    result = connect_result(&mut connecting) => {
                        connecting = None;
                        self.finish_connect(result);
                    }

                    signal = next_upstream_signal(&mut self.upstream) => {
                        self.handle_upstream_signal(signal).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
