//! Two sessions syncing through a live relay over real sockets.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tandem_relay::{IdentityResponse, RelayState, serve};
use tandem_sync::{
    ConnectionState, Delivery, RelayEndpoint, RelayTransport, SessionConfig, SessionUpdate,
    SyncError, SyncSession,
};
use tandem_types::Role;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

type Updates = mpsc::UnboundedReceiver<SessionUpdate>;

async fn spawn_relay() -> (u16, Arc<RelayState>) {
    let state = Arc::new(RelayState::new(
        IdentityResponse::default(),
        Duration::from_secs(5),
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    let served = state.clone();
    tokio::spawn(async move {
        serve(listener, served).await.unwrap();
    });
    (port, state)
}

fn config(port: u16) -> SessionConfig {
    SessionConfig {
        relay: RelayEndpoint::new("127.0.0.1", port, false),
        direct_listen_addr: "127.0.0.1:0".parse().unwrap(),
        open_timeout_ms: 2_000,
        dial_timeout_ms: 2_000,
        heartbeat_interval_ms: 500,
        ..Default::default()
    }
}

fn session(config: SessionConfig) -> SyncSession {
    let transport = Arc::new(RelayTransport::new(config.clone()));
    SyncSession::new(transport, config).unwrap()
}

fn recorder() -> (impl Fn(SessionUpdate) + Send + Sync + 'static, Updates) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |update| {
            let _ = tx.send(update);
        },
        rx,
    )
}

async fn wait_for_state(session: &SyncSession, state: ConnectionState) {
    let mut rx = session.watch_state();
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}

async fn next_update(rx: &mut Updates) -> SessionUpdate {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn controller_and_headless_sync_over_the_relay() {
    let (port, state) = spawn_relay().await;

    let headless = session(config(port));
    let (on_headless, mut h_rx) = recorder();
    headless
        .connect("H1", Role::Headless, on_headless)
        .await
        .unwrap();

    let controller = session(config(port));
    let (on_controller, mut c_rx) = recorder();
    controller
        .connect("H1", Role::Controller, on_controller)
        .await
        .unwrap();

    wait_for_state(&controller, ConnectionState::PeerConnected).await;
    wait_for_state(&headless, ConnectionState::PeerConnected).await;
    assert_eq!(state.registry.len(), 2);

    assert_eq!(
        controller.send("score", json!(1)).await.unwrap(),
        Delivery::Broadcast
    );
    let SessionUpdate::Snapshot(seen) = next_update(&mut h_rx).await else {
        panic!("expected a snapshot");
    };
    assert_eq!(seen.get("score"), Some(&json!(1)));

    headless.send("score", json!(2)).await.unwrap();
    let SessionUpdate::Snapshot(seen) = next_update(&mut c_rx).await else {
        panic!("expected a snapshot");
    };
    assert_eq!(seen.get("score"), Some(&json!(2)));
    assert_eq!(*controller.snapshot(), *headless.snapshot());

    controller.disconnect().await.unwrap();
    let SessionUpdate::Error(err) = next_update(&mut h_rx).await else {
        panic!("expected the channel to close");
    };
    assert!(matches!(err, SyncError::ChannelClosed));
    wait_for_state(&headless, ConnectionState::RelayConnected).await;

    timeout(WAIT, async {
        while state.registry.len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dialing_an_unregistered_peer_errors() {
    let (port, _state) = spawn_relay().await;
    let controller = session(config(port));
    let (on_update, mut rx) = recorder();

    controller
        .connect("nobody", Role::Controller, on_update)
        .await
        .unwrap();

    let SessionUpdate::Error(err) = next_update(&mut rx).await else {
        panic!("expected an error");
    };
    assert!(matches!(err, SyncError::DialFailed { .. }));
    assert_eq!(controller.state(), ConnectionState::Errored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn taken_headless_id_fails_connect() {
    let (port, _state) = spawn_relay().await;
    let first = session(config(port));
    let (on_first, _rx1) = recorder();
    first.connect("H1", Role::Headless, on_first).await.unwrap();

    let second = session(config(port));
    let (on_second, _rx2) = recorder();
    let err = second
        .connect("H1", Role::Headless, on_second)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RelayUnavailable(_)));
    assert_eq!(second.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unreachable_relay_fails_connect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = session(config(port));
    let (on_update, _rx) = recorder();
    let err = session
        .connect("H1", Role::Headless, on_update)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RelayUnavailable(_)));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
