//! Peer identifiers.
//!
//! A peer id is an opaque string. Headless peers bring their own stable id
//! so a controller can find them again after a reconnect; controllers get a
//! random UUID v4 per session.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest id the relay will register.
pub const MAX_PEER_ID_LEN: usize = 64;

/// Unique identifier for a participant in a sync session.
///
/// Ordering is plain byte-wise string ordering; the CRDT layer relies on it
/// to break ties between concurrent writes deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    /// Generates a fresh random peer id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses an externally supplied peer id.
    ///
    /// Accepted ids are 1 to 64 characters long, start and end with an ASCII
    /// alphanumeric, and otherwise contain alphanumerics, `-`, `_`, or single
    /// spaces.
    pub fn parse(s: &str) -> Result<Self, Error> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(s: &str) -> Result<(), Error> {
    let invalid = |reason| Error::InvalidPeerId {
        id: s.to_string(),
        reason,
    };

    if s.is_empty() {
        return Err(invalid("empty"));
    }
    if s.len() > MAX_PEER_ID_LEN {
        return Err(invalid("too long"));
    }

    let bytes = s.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return Err(invalid("must start and end with an alphanumeric character"));
    }

    let mut prev_separator = false;
    for &b in bytes {
        if b.is_ascii_alphanumeric() {
            prev_separator = false;
        } else if b == b'-' || b == b'_' || b == b' ' {
            if prev_separator && b == b' ' {
                return Err(invalid("consecutive spaces"));
            }
            prev_separator = b == b' ';
        } else {
            return Err(invalid("unsupported character"));
        }
    }

    Ok(())
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s)?;
        Ok(Self(s))
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
