use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tandem_relay::{IdentityResponse, PeersResponse, RelayState, serve};

fn test_identity() -> IdentityResponse {
    IdentityResponse {
        name: "test-relay".to_string(),
        protocol_version: 1,
        agent_version: "tandem-relay/0.0.0".to_string(),
    }
}

/// Spin up the relay on an OS-assigned port, returning the base URL.
async fn spawn_test_server() -> String {
    let state = Arc::new(RelayState::new(test_identity(), Duration::from_secs(5)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        serve(listener, state).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn identity_endpoint_returns_correct_json() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/api/v1/identity", base))
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);

    let body: IdentityResponse = resp.json().await.unwrap();
    assert_eq!(body, test_identity());
}

#[tokio::test]
async fn identity_endpoint_content_type_is_json() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/api/v1/identity", base))
        .await
        .unwrap();

    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.contains("application/json"));
}

#[tokio::test]
async fn peers_endpoint_starts_empty() {
    let base = spawn_test_server().await;
    let body: PeersResponse = reqwest::get(format!("{}/api/v1/peers", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body, PeersResponse { connected: 0 });
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/api/v1/nonexistent", base))
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn signaling_route_requires_an_upgrade() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/tandem", base)).await.unwrap();

    assert!(resp.status().is_client_error());
}

#[test]
fn default_identity_reports_the_protocol_version() {
    let identity = IdentityResponse::default();
    assert_eq!(identity.name, "tandem-relay");
    assert_eq!(identity.protocol_version, tandem_sync::PROTOCOL_VERSION);
    assert!(identity.agent_version.starts_with("tandem-relay/"));
}
