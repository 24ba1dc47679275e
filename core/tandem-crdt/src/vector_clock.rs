//! Vector clock over change counters.
//!
//! Records, for every actor a replica has heard from, the highest counter
//! it has applied. Two replicas with equal clocks have seen the same set of
//! winning writes per actor, which is what the convergence checks compare.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tandem_types::PeerId;

/// Causality relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First clock happened before second.
    Before,
    /// First clock happened after second.
    After,
    /// Clocks are concurrent (neither happened before the other).
    Concurrent,
    /// Clocks are identical.
    Equal,
}

/// Highest counter seen per actor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: BTreeMap<PeerId, u64>,
}

impl VectorClock {
    /// Creates a new empty vector clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter recorded for an actor (0 if never seen).
    #[must_use]
    pub fn get(&self, actor: &PeerId) -> u64 {
        self.clocks.get(actor).copied().unwrap_or(0)
    }

    /// Returns all actors and their counters, in actor order.
    pub fn actors(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.clocks.iter()
    }

    /// Returns the number of actors in the clock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Returns true if the clock has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Highest counter across all actors.
    #[must_use]
    pub fn max_counter(&self) -> u64 {
        self.clocks.values().copied().max().unwrap_or(0)
    }

    /// Records that `actor` produced a change with `counter`.
    ///
    /// Only raises the stored value. Returns true if it changed.
    pub fn observe(&mut self, actor: &PeerId, counter: u64) -> bool {
        match self.clocks.get_mut(actor) {
            Some(current) if *current >= counter => false,
            Some(current) => {
                *current = counter;
                true
            }
            None => {
                self.clocks.insert(actor.clone(), counter);
                true
            }
        }
    }

    /// Merges another vector clock into this one, taking the per-actor max.
    pub fn merge(&mut self, other: &Self) {
        for (actor, &counter) in &other.clocks {
            self.observe(actor, counter);
        }
    }

    /// Compares this clock with another to determine causal ordering.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut self_ge = true;
        let mut other_ge = true;

        let actors: BTreeSet<&PeerId> = self.clocks.keys().chain(other.clocks.keys()).collect();
        for actor in actors {
            let mine = self.get(actor);
            let theirs = other.get(actor);
            if mine < theirs {
                self_ge = false;
            }
            if theirs < mine {
                other_ge = false;
            }
        }

        match (self_ge, other_ge) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (false, false) => CausalOrder::Concurrent,
        }
    }

    /// Returns true if this clock is >= the other for every actor.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }
}

impl Eq for VectorClock {}
