//! HTTP API and signaling endpoint for the Tandem relay.

mod signaling;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::{Json, Response};
use axum::{Router, routing::get};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_sync::{DEFAULT_RELAY_PATH, PROTOCOL_VERSION};
use tokio::net::TcpListener;

pub use signaling::Registry;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentityResponse {
    pub name: String,
    pub protocol_version: u32,
    pub agent_version: String,
}

impl Default for IdentityResponse {
    fn default() -> Self {
        Self {
            name: "tandem-relay".to_string(),
            protocol_version: PROTOCOL_VERSION,
            agent_version: concat!("tandem-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeersResponse {
    pub connected: usize,
}

/// Shared relay state.
pub struct RelayState {
    pub identity: IdentityResponse,
    /// A peer that sends nothing for this long is dropped.
    pub heartbeat_timeout: Duration,
    pub registry: Registry,
}

impl RelayState {
    pub fn new(identity: IdentityResponse, heartbeat_timeout: Duration) -> Self {
        Self {
            identity,
            heartbeat_timeout,
            registry: Registry::default(),
        }
    }
}

async fn identity_handler(State(state): State<Arc<RelayState>>) -> Json<IdentityResponse> {
    Json(state.identity.clone())
}

async fn peers_handler(State(state): State<Arc<RelayState>>) -> Json<PeersResponse> {
    Json(PeersResponse {
        connected: state.registry.len(),
    })
}

async fn signaling_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    ws.on_upgrade(move |socket| signaling::handle_socket(socket, addr, state))
}

/// Build the HTTP API and signaling router.
///
/// The signaling route needs the peer address, so serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` (see [`serve`]).
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/api/v1/identity", get(identity_handler))
        .route("/api/v1/peers", get(peers_handler))
        .route(DEFAULT_RELAY_PATH, get(signaling_handler))
        .with_state(state)
}

/// Serve the relay on `listener` until the future is dropped.
pub async fn serve(listener: TcpListener, state: Arc<RelayState>) -> std::io::Result<()> {
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
