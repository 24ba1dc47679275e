//! Error types for the sync layer.

use tandem_types::PeerId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The relay could not be reached or refused our registration.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// The direct connection to a peer was rejected or timed out.
    #[error("dial to {peer} failed: {reason}")]
    DialFailed { peer: PeerId, reason: String },

    /// An established direct channel dropped.
    #[error("channel closed")]
    ChannelClosed,

    /// An inbound payload could not be decoded as a change.
    #[error("merge decode error: {0}")]
    MergeDecode(#[from] tandem_crdt::CrdtError),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Protocol error (invalid message format or sequence).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Invalid configuration or API misuse.
    #[error("configuration error: {0}")]
    Config(String),

    /// A peer id failed validation.
    #[error(transparent)]
    InvalidPeerId(#[from] tandem_types::Error),

    /// The operation was abandoned by a `disconnect()`.
    #[error("operation cancelled")]
    Cancelled,

    /// The session actor has shut down.
    #[error("session closed")]
    SessionClosed,
}

impl SyncError {
    /// Shorthand for a dial failure.
    pub fn dial_failed(peer: &PeerId, reason: impl Into<String>) -> Self {
        SyncError::DialFailed {
            peer: peer.clone(),
            reason: reason.into(),
        }
    }
}
