//! Peer-to-peer sync session for Tandem.
//!
//! A controller and a headless peer share one small key/value document.
//! They find each other through a rendezvous relay, then exchange changes
//! over a direct channel; the relay never carries document data.
//!
//! # Architecture
//!
//! - **Transport**: [`SignalingTransport`] registers with the relay and
//!   produces [`DirectChannel`]s. [`RelayTransport`] speaks WebSocket to a
//!   relay and TCP between peers; [`MemoryRelay`] runs everything in-process.
//! - **Protocol**: the signaling messages exchanged with the relay.
//! - **State**: the [`ConnectionState`] machine and its legal transitions.
//! - **Session**: [`SyncSession`] owns a `ReplicationStore` and wires
//!   transport events to `apply`/`merge`, delivering snapshots to a single
//!   subscription callback.
//!
//! ## Connection flow
//!
//! 1. `connect()` opens the relay link (`ConnectingToRelay -> RelayConnected`)
//! 2. A controller dials the headless peer (`PeerConnecting -> PeerConnected`);
//!    a headless peer waits for the dial
//! 3. Every `send()` applies locally and, when connected, goes out as one
//!    encoded change
//! 4. Every inbound change is merged and the full snapshot handed to the
//!    callback
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem_sync::{RelayTransport, SessionConfig, SessionUpdate, SyncSession};
//! use tandem_types::Role;
//!
//! # async fn run() -> tandem_sync::SyncResult<()> {
//! let config = SessionConfig::default();
//! let transport = Arc::new(RelayTransport::new(config.clone()));
//! let session = SyncSession::new(transport, config)?;
//!
//! session
//!     .connect("living-room", Role::Controller, |update| {
//!         if let SessionUpdate::Snapshot(snapshot) = update {
//!             println!("{:?}", snapshot.get("pose"));
//!         }
//!     })
//!     .await?;
//! session.send("pose", serde_json::json!([0.0, 1.5, 0.0])).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod memory;
pub mod net;
pub mod protocol;
mod session;
pub mod state;
pub mod transport;

pub use config::{DEFAULT_RELAY_PATH, DEFAULT_RELAY_PORT, RelayEndpoint, SessionConfig};
pub use error::{SyncError, SyncResult};
pub use memory::{DialBehaviour, MemoryRelay, MemoryTransport};
pub use net::RelayTransport;
pub use protocol::{ChannelHello, ErrorCode, PROTOCOL_VERSION, SignalMessage};
pub use session::{Delivery, SessionUpdate, SyncSession, UpdateCallback};
pub use state::{ConnectionState, StateTransition};
pub use transport::{
    ChannelSender, DirectChannel, SignalingTransport, TransportEvent, TransportEvents,
};
