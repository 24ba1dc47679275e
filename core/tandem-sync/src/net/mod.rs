//! Networked transport: WebSocket signaling through a relay, TCP for the
//! direct channels themselves.

mod codec;
mod connection;
mod transport;

pub use codec::{read_frame, read_json, write_frame, write_json};
pub use transport::RelayTransport;
