//! Error types for the replication layer.

use thiserror::Error;

/// Result type for replication operations.
pub type CrdtResult<T> = Result<T, CrdtError>;

/// Errors produced while decoding remote changes.
///
/// Local writes never fail; only inbound bytes can be rejected.
#[derive(Debug, Error)]
pub enum CrdtError {
    /// The payload is not a valid change envelope.
    #[error("malformed change: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope decoded but its contents are unusable.
    #[error("invalid change: {0}")]
    Invalid(&'static str),
}
