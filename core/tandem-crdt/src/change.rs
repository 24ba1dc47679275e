//! Changes and their wire encoding.
//!
//! A [`Change`] is the immutable delta produced by one local write. It
//! carries everything a remote replica needs to merge it deterministically:
//! the writing actor, that actor's counter, the key, and the new value.
//!
//! On the wire a change is a single JSON object:
//!
//! ```json
//! {"formatVersion":1,"actor":"C1","counter":3,"key":"score","value":2}
//! ```
//!
//! Decoders ignore fields they do not know, so newer peers can add fields
//! under a higher `formatVersion` without breaking older ones.

use crate::Value;
use crate::error::{CrdtError, CrdtResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tandem_types::PeerId;

/// Wire format version written by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Largest counter accepted from a remote peer. Leaves headroom so a local
/// write after merging the highest accepted counter cannot overflow.
pub const MAX_COUNTER: u64 = u64::MAX / 2;

/// Total order over writes: counter first, actor id breaks ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Lamport counter of the write.
    pub counter: u64,
    /// Actor that performed the write.
    pub actor: PeerId,
}

impl Stamp {
    /// Creates a stamp.
    #[must_use]
    pub fn new(counter: u64, actor: PeerId) -> Self {
        Self { counter, actor }
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.actor.cmp(&other.actor))
    }
}

/// A single key write, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Actor that made the write.
    pub actor: PeerId,
    /// The actor's counter for this write (starts at 1).
    pub counter: u64,
    /// Event name being written.
    pub key: String,
    /// New value.
    pub value: Value,
}

impl Change {
    /// The stamp this change competes with inside a register.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.counter, self.actor.clone())
    }

    /// Encodes this change for the wire.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_change(self)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a> {
    format_version: u32,
    actor: &'a PeerId,
    counter: u64,
    key: &'a str,
    value: &'a Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    format_version: u32,
    actor: PeerId,
    counter: u64,
    key: String,
    value: Value,
}

/// Encodes a change as a self-delimiting JSON object.
#[must_use]
pub fn encode_change(change: &Change) -> Vec<u8> {
    let envelope = EnvelopeRef {
        format_version: FORMAT_VERSION,
        actor: &change.actor,
        counter: change.counter,
        key: &change.key,
        value: &change.value,
    };
    // Serializing borrowed strings, integers and a `Value` into a Vec cannot fail.
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// Decodes a change received from a remote peer.
///
/// Rejects payloads that are not JSON, miss a required field, or carry an
/// empty key, a zero format version, or a counter that is zero or above
/// [`MAX_COUNTER`].
pub fn decode_change(bytes: &[u8]) -> CrdtResult<Change> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;

    if envelope.format_version == 0 {
        return Err(CrdtError::Invalid("format version 0"));
    }
    if envelope.counter == 0 {
        return Err(CrdtError::Invalid("counter must be positive"));
    }
    if envelope.counter > MAX_COUNTER {
        return Err(CrdtError::Invalid("counter out of range"));
    }
    if envelope.key.is_empty() {
        return Err(CrdtError::Invalid("empty key"));
    }

    Ok(Change {
        actor: envelope.actor,
        counter: envelope.counter,
        key: envelope.key,
        value: envelope.value,
    })
}
