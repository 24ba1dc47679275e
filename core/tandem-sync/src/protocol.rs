//! Signaling protocol spoken between peers and the relay.
//!
//! The relay never sees document data. It only keeps a registry of connected
//! peer ids and forwards connection offers between them:
//! 1. A peer registers its id and receives `Open`
//! 2. A controller sends `Offer` for the headless peer it wants
//! 3. The headless peer replies with `Answer` carrying its direct address
//!    (or `Reject`)
//! 4. The controller connects directly and opens with a [`ChannelHello`]
//!
//! Messages are JSON text frames tagged by `type`.

use serde::{Deserialize, Serialize};
use tandem_types::PeerId;

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Why the relay refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Another live peer already holds the id.
    IdTaken,
    /// The id is not a valid peer id.
    InvalidId,
    /// Protocol versions differ.
    Version,
    /// The message was not understood.
    BadMessage,
}

/// A signaling message.
///
/// `src` is filled in by the relay when it forwards a message; clients leave
/// it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Client -> relay: claim an id.
    Register { peer_id: PeerId, version: u32 },

    /// Relay -> client: the id is ours.
    Open { peer_id: PeerId },

    /// Controller -> headless: please accept a direct channel.
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
        connection_id: String,
    },

    /// Headless -> controller: connect to this address.
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
        connection_id: String,
        /// Filled in by the relay from the headless peer's remote address
        /// when the headless peer does not advertise one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        port: u16,
    },

    /// Headless -> controller: the offer is refused.
    Reject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PeerId>,
        dst: PeerId,
        connection_id: String,
        reason: String,
    },

    /// Relay -> controller: the offered peer is not registered.
    Expire { dst: PeerId, connection_id: String },

    /// Client -> relay keepalive.
    Heartbeat,

    /// Client -> relay: release our id.
    Leave,

    /// Relay -> client: request refused.
    Error { code: ErrorCode, message: String },
}

impl SignalMessage {
    /// Creates a registration for `peer_id` at the current protocol version.
    pub fn register(peer_id: PeerId) -> Self {
        SignalMessage::Register {
            peer_id,
            version: PROTOCOL_VERSION,
        }
    }

    /// Serializes to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a JSON text frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Register { .. } => "register",
            SignalMessage::Open { .. } => "open",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Reject { .. } => "reject",
            SignalMessage::Expire { .. } => "expire",
            SignalMessage::Heartbeat => "heartbeat",
            SignalMessage::Leave => "leave",
            SignalMessage::Error { .. } => "error",
        }
    }
}

/// First frame a dialer writes on a fresh direct connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHello {
    /// Protocol version.
    pub version: u32,
    /// Connection id from the answered offer.
    pub connection_id: String,
    /// The dialer's peer id.
    pub peer_id: PeerId,
}

impl ChannelHello {
    /// Creates a hello for an answered offer.
    pub fn new(connection_id: impl Into<String>, peer_id: PeerId) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            connection_id: connection_id.into(),
            peer_id,
        }
    }
}
