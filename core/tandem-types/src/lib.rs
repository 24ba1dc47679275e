//! Core type definitions for Tandem.
//!
//! This crate defines the identity types shared by every layer of the
//! peer sync stack:
//! - Peer identifiers (opaque strings, dialable through the relay)
//! - Session roles (controller or headless)
//! - The identity resolver that decides which id a process uses

mod ids;
mod role;

pub use ids::{MAX_PEER_ID_LEN, PeerId};
pub use role::{PeerIdentity, Role};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid peer id {id:?}: {reason}")]
    InvalidPeerId { id: String, reason: &'static str },

    #[error("unknown role: {0}")]
    UnknownRole(String),
}
