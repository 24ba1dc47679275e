//! Transport abstraction.
//!
//! A [`SignalingTransport`] handles the two networking concerns of a session:
//! registering with the rendezvous relay, and producing [`DirectChannel`]s
//! to peers. The session never touches sockets itself, so it runs the same
//! against the in-memory relay in [`crate::memory`] and the WebSocket/TCP
//! transport in [`crate::net`].

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::fmt;
use tandem_types::{PeerId, Role};
use tokio::sync::mpsc;

/// Events a transport reports after `open()`.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer dialed us and the channel is ready.
    IncomingConnection(DirectChannel),
    /// The relay link dropped. Open direct channels are unaffected.
    RelayClosed { reason: String },
    /// Unrecoverable transport failure.
    Error(SyncError),
}

/// Stream of [`TransportEvent`]s. Ends when the transport is closed.
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Relay registration plus direct dialing.
#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Reaches the relay and registers `local`. A headless peer also starts
    /// accepting direct channels.
    async fn open(&self, local: &PeerId, role: Role) -> SyncResult<TransportEvents>;

    /// Establishes a direct channel to `remote` via the relay.
    /// Only valid for a transport opened as a controller.
    async fn dial(&self, remote: &PeerId) -> SyncResult<DirectChannel>;

    /// Leaves the relay. Direct channels already handed out stay open until
    /// their owners drop them. Idempotent.
    async fn close(&self);

    /// Whether the relay link is registered.
    fn is_open(&self) -> bool;
}

/// Sending half of a [`DirectChannel`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    remote: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSender {
    /// Queues `payload` for the peer.
    pub fn send(&self, payload: Vec<u8>) -> SyncResult<()> {
        self.tx.send(payload).map_err(|_| SyncError::ChannelClosed)
    }

    /// The peer at the other end.
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// Whether the outbound side has been torn down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A bidirectional, message-oriented channel to one peer.
///
/// Delivery is best effort: a payload sent while the channel is dying is
/// lost. `recv()` returning `None` means the channel closed.
pub struct DirectChannel {
    remote: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl DirectChannel {
    /// Wraps the two halves a transport pumps bytes through.
    pub fn new(
        remote: PeerId,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self { remote, tx, rx }
    }

    /// The peer at the other end.
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// Queues `payload` for the peer.
    pub fn send(&self, payload: Vec<u8>) -> SyncResult<()> {
        self.tx.send(payload).map_err(|_| SyncError::ChannelClosed)
    }

    /// Next payload from the peer, or `None` once the channel closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Splits into an owned sender and the inbound stream.
    pub fn split(self) -> (ChannelSender, mpsc::UnboundedReceiver<Vec<u8>>) {
        (
            ChannelSender {
                remote: self.remote,
                tx: self.tx,
            },
            self.rx,
        )
    }
}

impl fmt::Debug for DirectChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectChannel")
            .field("remote", &self.remote)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
