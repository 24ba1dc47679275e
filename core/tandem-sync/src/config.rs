//! Session configuration.
//!
//! Everything is plain data with defaults, so a config can be built in code
//! or loaded from JSON with only the fields that differ.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 9000;

/// Default WebSocket path of the signaling endpoint.
pub const DEFAULT_RELAY_PATH: &str = "/tandem";

/// Where the rendezvous relay lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEndpoint {
    /// Relay host name or address.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Use TLS (`wss://`).
    pub secure: bool,
    /// Path of the signaling endpoint.
    pub path: String,
}

impl Default for RelayEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RELAY_PORT,
            secure: false,
            path: DEFAULT_RELAY_PATH.to_string(),
        }
    }
}

impl RelayEndpoint {
    /// Creates an endpoint for `host:port` with the default path.
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            ..Default::default()
        }
    }

    /// WebSocket URL of the signaling endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }
}

/// Configuration for a sync session and its transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relay to register with.
    pub relay: RelayEndpoint,
    /// Bound on reaching the relay and registering (ms).
    pub open_timeout_ms: u64,
    /// Bound on establishing a direct channel (ms).
    pub dial_timeout_ms: u64,
    /// Interval between heartbeats sent to the relay (ms).
    pub heartbeat_interval_ms: u64,
    /// Address a headless peer listens on for direct channels.
    pub direct_listen_addr: SocketAddr,
    /// Host announced to dialers. When unset the relay reports the address
    /// it sees us connecting from.
    pub advertise_host: Option<String>,
    /// Largest frame accepted on a direct channel (bytes).
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay: RelayEndpoint::default(),
            open_timeout_ms: 10_000,
            dial_timeout_ms: 10_000,
            heartbeat_interval_ms: 5_000,
            direct_listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_host: None,
            max_frame_size: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values can drive a session.
    pub fn validate(&self) -> SyncResult<()> {
        if self.relay.host.trim().is_empty() {
            return Err(SyncError::Config("relay host is empty".into()));
        }
        if self.open_timeout_ms == 0 {
            return Err(SyncError::Config("open_timeout_ms must be positive".into()));
        }
        if self.dial_timeout_ms == 0 {
            return Err(SyncError::Config("dial_timeout_ms must be positive".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SyncError::Config(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(SyncError::Config("max_frame_size must be positive".into()));
        }
        Ok(())
    }

    /// Relay open timeout.
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Direct dial timeout.
    #[must_use]
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Relay heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
