//! Replicated document for Tandem.
//!
//! This crate provides the conflict-free data types behind the shared
//! event document:
//!
//! - [`VectorClock`] — highest counter seen per actor
//! - [`LWWRegister<T>`] — Last-Writer-Wins register ordered by [`Stamp`]
//! - [`Change`] — the delta produced by a local write, and its wire encoding
//! - [`ReplicationStore`] — the key/value document with `apply`/`merge`
//!
//! Merging satisfies the usual CRDT properties:
//! - **Commutative**: merge(a, b) == merge(b, a)
//! - **Associative**: merge(merge(a, b), c) == merge(a, merge(b, c))
//! - **Idempotent**: merge(a, a) == a
//!
//! so every replica that has seen the same set of changes holds the same
//! snapshot, regardless of arrival order.
//!
//! The store is a plain data structure: it does no I/O and never blocks.

mod change;
mod error;
mod lww_register;
mod store;
mod vector_clock;

pub use change::{Change, FORMAT_VERSION, MAX_COUNTER, Stamp, decode_change, encode_change};
pub use error::{CrdtError, CrdtResult};
pub use lww_register::LWWRegister;
pub use store::{MergeOutcome, ReplicationStore, Snapshot};
pub use vector_clock::{CausalOrder, VectorClock};

/// Payload type carried by document entries.
pub type Value = serde_json::Value;
