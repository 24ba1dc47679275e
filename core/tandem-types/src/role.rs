//! Session roles and local identity resolution.

use crate::{Error, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a controller/headless pair this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Drives the session and dials the headless peer.
    Controller,
    /// Waits on a stable, externally supplied id for the controller to dial in.
    Headless,
}

impl Role {
    /// Whether this role initiates direct connections.
    #[must_use]
    pub fn dials(self) -> bool {
        matches!(self, Role::Controller)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Controller => f.write_str("controller"),
            Role::Headless => f.write_str("headless"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "controller" => Ok(Role::Controller),
            "headless" => Ok(Role::Headless),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

/// The resolved identity of the local process for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Our own id, registered with the relay.
    pub local: PeerId,
    /// The peer we dial, if any.
    pub remote: Option<PeerId>,
    /// Our role.
    pub role: Role,
}

impl PeerIdentity {
    /// Resolves the local identity from the headless peer's id.
    ///
    /// A headless process registers under `headless_peer_id` itself; a
    /// controller registers under a fresh id and dials `headless_peer_id`.
    #[must_use]
    pub fn resolve(headless_peer_id: &PeerId, role: Role) -> Self {
        match role {
            Role::Headless => Self {
                local: headless_peer_id.clone(),
                remote: None,
                role,
            },
            Role::Controller => Self {
                local: PeerId::generate(),
                remote: Some(headless_peer_id.clone()),
                role,
            },
        }
    }
}
