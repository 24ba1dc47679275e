//! Last-Writer-Wins Register (LWW-Register).
//!
//! Stores a single value. Concurrent writes are resolved by comparing
//! [`Stamp`]s: the higher counter wins, and equal counters fall back to the
//! higher actor id. The order is total, so every replica picks the same
//! winner.

use crate::change::Stamp;
use serde::{Deserialize, Serialize};

/// A Last-Writer-Wins Register keyed by [`Stamp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LWWRegister<T> {
    value: T,
    stamp: Stamp,
}

impl<T> LWWRegister<T> {
    /// Creates a register holding `value` written at `stamp`.
    #[must_use]
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    /// Returns a reference to the current value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the stamp of the winning write.
    #[must_use]
    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Offers a write. Returns true if it won and replaced the value.
    ///
    /// Re-offering the current write is a no-op, which is what makes
    /// duplicate delivery harmless.
    pub fn offer(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}

impl<T: Clone> LWWRegister<T> {
    /// Merges another register into this one. Returns true if ours changed.
    pub fn merge(&mut self, other: &Self) -> bool {
        self.offer(other.value.clone(), other.stamp.clone())
    }

    /// Creates a new register that is the merge of this and another.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.merge(other);
        result
    }
}
