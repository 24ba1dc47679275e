//! Connection state of a sync session.
//!
//! The session owns exactly one [`ConnectionState`]. Transport events move
//! it along the edges allowed by [`ConnectionState::can_transition_to`];
//! `disconnect()` can return to `Disconnected` from anywhere.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No relay, no channel.
    Disconnected,
    /// Reaching the relay and registering our id.
    ConnectingToRelay,
    /// Registered with the relay, no direct channel.
    RelayConnected,
    /// Dialing the headless peer.
    PeerConnecting,
    /// A direct channel is open.
    PeerConnected,
    /// A transport failure; only `disconnect()` leaves this state.
    Errored,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal edge.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Disconnected {
            return self != Disconnected;
        }
        if next == Errored {
            return !matches!(self, Disconnected | Errored);
        }

        matches!(
            (self, next),
            (Disconnected, ConnectingToRelay)
                | (ConnectingToRelay, RelayConnected)
                | (RelayConnected, PeerConnecting)
                | (RelayConnected, PeerConnected)
                | (PeerConnecting, PeerConnected)
                | (PeerConnected, RelayConnected)
        )
    }

    /// Whether a direct channel is open.
    #[must_use]
    pub fn is_peer_connected(self) -> bool {
        self == ConnectionState::PeerConnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ConnectingToRelay => "connecting-to-relay",
            ConnectionState::RelayConnected => "relay-connected",
            ConnectionState::PeerConnecting => "peer-connecting",
            ConnectionState::PeerConnected => "peer-connected",
            ConnectionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// One observed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// State before the change.
    pub from: ConnectionState,
    /// State after the change.
    pub to: ConnectionState,
}

impl StateTransition {
    /// Whether this transition is one the session may emit.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.from.can_transition_to(self.to)
    }
}
