//! Upstream model transport port.
//!
//! A connector opens one duplex connection to the model and hands back an
//! [`UpstreamChannel`]: an outbound command sender and an inbound signal
//! receiver. The transport owns the socket in its own tasks; inbound frames
//! are decoded into [`UpstreamEvent`] before they reach the relay.

use plugforge_types::error::TransportError;
use plugforge_types::protocol::{UpstreamEvent, UpstreamRequest};
use tokio::sync::mpsc;

/// Instruction for the transport's writer side.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    Send(UpstreamRequest),
    /// Close the socket with a normal closure.
    Close,
}

/// Something that happened on the upstream socket.
///
/// `Closed` and `Error` are terminal: the transport emits at most one of
/// them and then drops its sender.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamSignal {
    Event(UpstreamEvent),
    /// A frame that could not be decoded. The socket stays open.
    Malformed(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// The relay's handle on one upstream connection.
#[derive(Debug)]
pub struct UpstreamChannel {
    outbound: mpsc::UnboundedSender<UpstreamCommand>,
    inbound: mpsc::UnboundedReceiver<UpstreamSignal>,
}

impl UpstreamChannel {
    pub fn new(
        outbound: mpsc::UnboundedSender<UpstreamCommand>,
        inbound: mpsc::UnboundedReceiver<UpstreamSignal>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Whether the writer side is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn send(&self, request: UpstreamRequest) -> Result<(), TransportError> {
        self.outbound
            .send(UpstreamCommand::Send(request))
            .map_err(|_| TransportError::NotOpen)
    }

    /// Next inbound signal; `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<UpstreamSignal> {
        self.inbound.recv().await
    }

    /// Ask the transport to close the socket. Consumes the handle.
    pub fn close(self) {
        let _ = self.outbound.send(UpstreamCommand::Close);
    }
}

/// Opens upstream model connections.
///
/// Implementations live in plugforge-infra (e.g., `GeminiLiveConnector`).
pub trait UpstreamConnector: Send + Sync {
    /// Resolve once the socket is open, or fail with the reason it did not.
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<UpstreamChannel, TransportError>> + Send;
}
