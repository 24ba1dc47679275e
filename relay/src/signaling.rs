//! Peer registry and signaling loop.
//!
//! Each WebSocket client claims one peer id. Offers, answers and rejects are
//! forwarded to their `dst` with `src` stamped by the relay; an offer to an
//! id nobody holds is answered with `expire`.

use crate::RelayState;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_sync::{ErrorCode, PROTOCOL_VERSION, SignalMessage};
use tandem_types::PeerId;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

struct Client {
    session: u64,
    tx: mpsc::UnboundedSender<SignalMessage>,
}

/// Live peers by id.
#[derive(Default)]
pub struct Registry {
    peers: Mutex<HashMap<PeerId, Client>>,
    next_session: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, Client>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `peer`; `None` if a live client holds it.
    fn register(&self, peer: &PeerId, tx: mpsc::UnboundedSender<SignalMessage>) -> Option<u64> {
        let mut peers = self.lock();
        if peers.get(peer).is_some_and(|client| !client.tx.is_closed()) {
            return None;
        }
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        peers.insert(peer.clone(), Client { session, tx });
        Some(session)
    }

    fn unregister(&self, peer: &PeerId, session: u64) {
        let mut peers = self.lock();
        if peers.get(peer).is_some_and(|client| client.session == session) {
            peers.remove(peer);
        }
    }

    fn send(&self, peer: &PeerId, message: SignalMessage) -> bool {
        match self.lock().get(peer) {
            Some(client) => client.tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `peer` is registered.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.lock().contains_key(peer)
    }
}

type Sink = SplitSink<WebSocket, Message>;
type Stream = SplitStream<WebSocket>;

/// Next signaling message, `Some(Err)` for an undecodable one, `None` when
/// the socket is done.
async fn read_signal(stream: &mut Stream) -> Option<Result<SignalMessage, String>> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => {
                return Some(SignalMessage::from_json(text.as_str()).map_err(|e| e.to_string()));
            }
            Ok(Message::Binary(_)) => return Some(Err("binary frames are not signaling".into())),
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                debug!("websocket read failed: {e}");
                return None;
            }
        }
    }
}

async fn write_signal(sink: &mut Sink, message: &SignalMessage) -> Result<(), String> {
    let text = message.to_json().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

async fn refuse(sink: &mut Sink, code: ErrorCode, message: impl Into<String>) {
    let error = SignalMessage::Error {
        code,
        message: message.into(),
    };
    let _ = write_signal(sink, &error).await;
    let _ = sink.close().await;
}

/// Serves one signaling client.
pub(crate) async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<RelayState>) {
    let (mut sink, mut stream) = socket.split();

    let peer_id = match timeout(state.heartbeat_timeout, read_signal(&mut stream)).await {
        Ok(Some(Ok(SignalMessage::Register { peer_id, version }))) => {
            if version != PROTOCOL_VERSION {
                refuse(
                    &mut sink,
                    ErrorCode::Version,
                    format!("relay speaks version {PROTOCOL_VERSION}, got {version}"),
                )
                .await;
                return;
            }
            peer_id
        }
        Ok(Some(Ok(other))) => {
            refuse(
                &mut sink,
                ErrorCode::BadMessage,
                format!("expected register, got {}", other.kind()),
            )
            .await;
            return;
        }
        Ok(Some(Err(reason))) => {
            refuse(&mut sink, ErrorCode::InvalidId, reason).await;
            return;
        }
        Ok(None) | Err(_) => {
            debug!("{addr} left before registering");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let Some(session) = state.registry.register(&peer_id, tx) else {
        warn!("{addr} asked for {peer_id}, which is taken");
        refuse(&mut sink, ErrorCode::IdTaken, format!("{peer_id} is taken")).await;
        return;
    };
    info!("{peer_id} registered from {addr}");

    let open = SignalMessage::Open {
        peer_id: peer_id.clone(),
    };
    if write_signal(&mut sink, &open).await.is_ok() {
        let mut deadline = Instant::now() + state.heartbeat_timeout;
        loop {
            tokio::select! {
                incoming = read_signal(&mut stream) => match incoming {
                    Some(Ok(message)) => {
                        deadline = Instant::now() + state.heartbeat_timeout;
                        if !route(&state, &peer_id, addr, message) {
                            break;
                        }
                    }
                    Some(Err(reason)) => {
                        debug!("bad message from {peer_id}: {reason}");
                        let error = SignalMessage::Error {
                            code: ErrorCode::BadMessage,
                            message: reason,
                        };
                        if write_signal(&mut sink, &error).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                outgoing = rx.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = write_signal(&mut sink, &message).await {
                            debug!("write to {peer_id} failed: {e}");
                            break;
                        }
                    }
                    None => break,
                },
                () = sleep_until(deadline) => {
                    info!("{peer_id} missed its heartbeat");
                    break;
                }
            }
        }
    }

    state.registry.unregister(&peer_id, session);
    let _ = sink.close().await;
    info!("{peer_id} left");
}

/// Forwards one message from `from`. Returns `false` when the client leaves.
fn route(state: &RelayState, from: &PeerId, addr: SocketAddr, message: SignalMessage) -> bool {
    let registry = &state.registry;
    match message {
        SignalMessage::Offer {
            dst, connection_id, ..
        } => {
            let offer = SignalMessage::Offer {
                src: Some(from.clone()),
                dst: dst.clone(),
                connection_id: connection_id.clone(),
            };
            if !registry.send(&dst, offer) {
                debug!("offer from {from} to absent {dst}");
                registry.send(from, SignalMessage::Expire { dst, connection_id });
            }
        }
        SignalMessage::Answer {
            dst,
            connection_id,
            host,
            port,
            ..
        } => {
            let answer = SignalMessage::Answer {
                src: Some(from.clone()),
                dst: dst.clone(),
                connection_id,
                host: host.or_else(|| Some(addr.ip().to_string())),
                port,
            };
            if !registry.send(&dst, answer) {
                debug!("answer from {from} to absent {dst}");
            }
        }
        SignalMessage::Reject {
            dst,
            connection_id,
            reason,
            ..
        } => {
            let reject = SignalMessage::Reject {
                src: Some(from.clone()),
                dst: dst.clone(),
                connection_id,
                reason,
            };
            registry.send(&dst, reject);
        }
        SignalMessage::Heartbeat => {}
        SignalMessage::Leave => return false,
        other => debug!("ignoring {} from {from}", other.kind()),
    }
    true
}
