//! The replicated key/value document.
//!
//! [`ReplicationStore`] maps event names to their latest value. Every key is
//! an independent [`LWWRegister`], so writes to different keys never
//! conflict, and writes to the same key resolve by [`Stamp`] order.
//!
//! A materialized [`Snapshot`] is maintained alongside the registers and
//! updated in place, so reading it costs nothing regardless of how many
//! changes the store has absorbed.

use crate::Value;
use crate::change::{Change, Stamp, decode_change};
use crate::error::CrdtResult;
use crate::lww_register::LWWRegister;
use crate::vector_clock::VectorClock;
use serde::Serialize;
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};
use tandem_types::PeerId;

/// Read-only view of the document: event name to latest value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Returns the value for an event name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no key has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    /// Borrows the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Renders the snapshot as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// What merging one remote change did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The change won its key and the snapshot now shows its value.
    Applied,
    /// A higher-stamped write already holds the key.
    Superseded,
    /// This exact change was merged before.
    Duplicate,
}

/// CRDT document exposing local apply and remote merge.
#[derive(Debug, Clone)]
pub struct ReplicationStore {
    actor: PeerId,
    registers: HashMap<String, LWWRegister<Value>>,
    snapshot: Snapshot,
    clock: VectorClock,
    /// Highest counter applied or merged so far (Lamport clock).
    max_counter: u64,
}

impl ReplicationStore {
    /// Creates an empty document that writes as `actor`.
    #[must_use]
    pub fn new(actor: PeerId) -> Self {
        Self {
            actor,
            registers: HashMap::new(),
            snapshot: Snapshot::default(),
            clock: VectorClock::new(),
            max_counter: 0,
        }
    }

    /// The actor local writes are attributed to.
    #[must_use]
    pub fn actor(&self) -> &PeerId {
        &self.actor
    }

    /// Writes `value` under `key` locally and returns the delta to broadcast.
    pub fn apply(&mut self, key: impl Into<String>, value: Value) -> Change {
        self.max_counter = self.max_counter.saturating_add(1);
        let change = Change {
            actor: self.actor.clone(),
            counter: self.max_counter,
            key: key.into(),
            value,
        };
        self.integrate(&change);
        change
    }

    /// Decodes and merges a remote change, returning the resulting snapshot.
    ///
    /// Decoding happens before anything is touched, so a malformed payload
    /// leaves the document exactly as it was.
    pub fn merge(&mut self, bytes: &[u8]) -> CrdtResult<&Snapshot> {
        let change = decode_change(bytes)?;
        self.merge_change(&change);
        Ok(&self.snapshot)
    }

    /// Merges an already decoded change.
    pub fn merge_change(&mut self, change: &Change) -> MergeOutcome {
        self.max_counter = self.max_counter.max(change.counter);
        self.integrate(change)
    }

    /// The current materialized document.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Highest counter seen per actor.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Stamp of the write currently holding `key`.
    #[must_use]
    pub fn stamp_of(&self, key: &str) -> Option<&Stamp> {
        self.registers.get(key).map(LWWRegister::stamp)
    }

    fn integrate(&mut self, change: &Change) -> MergeOutcome {
        self.clock.observe(&change.actor, change.counter);
        let stamp = change.stamp();

        match self.registers.get_mut(&change.key) {
            Some(register) if *register.stamp() == stamp => MergeOutcome::Duplicate,
            Some(register) => {
                if register.offer(change.value.clone(), stamp) {
                    self.snapshot
                        .entries
                        .insert(change.key.clone(), change.value.clone());
                    MergeOutcome::Applied
                } else {
                    MergeOutcome::Superseded
                }
            }
            None => {
                self.registers.insert(
                    change.key.clone(),
                    LWWRegister::new(change.value.clone(), stamp),
                );
                self.snapshot
                    .entries
                    .insert(change.key.clone(), change.value.clone());
                MergeOutcome::Applied
            }
        }
    }
}
