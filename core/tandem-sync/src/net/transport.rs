//! Relay-backed transport.
//!
//! Signaling runs over a WebSocket to the relay. A headless peer also binds
//! a TCP listener and answers offers with its address; the controller
//! connects there and opens with a [`ChannelHello`] naming the answered
//! offer. Connections presenting an unknown offer are dropped.

use super::codec::{read_json, write_json};
use super::connection::spawn_channel;
use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{ChannelHello, PROTOCOL_VERSION, SignalMessage};
use crate::transport::{DirectChannel, SignalingTransport, TransportEvent, TransportEvents};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_types::{PeerId, Role};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const MAX_ANSWERED_OFFERS: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What came back for an offer.
enum DialReply {
    Answer { host: String, port: u16 },
    Refused(String),
}

/// Offers awaiting an answer, by connection id.
#[derive(Clone, Default)]
struct PendingDials(Arc<Mutex<HashMap<String, oneshot::Sender<DialReply>>>>);

impl PendingDials {
    fn insert(&self, connection_id: String) -> (oneshot::Receiver<DialReply>, PendingGuard) {
        let (tx, rx) = oneshot::channel();
        lock(&self.0).insert(connection_id.clone(), tx);
        let guard = PendingGuard {
            dials: self.clone(),
            connection_id,
        };
        (rx, guard)
    }

    fn resolve(&self, connection_id: &str, reply: DialReply) {
        match lock(&self.0).remove(connection_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!("reply for unknown offer {connection_id}"),
        }
    }

    fn fail_all(&self, reason: &str) {
        for (_, tx) in lock(&self.0).drain() {
            let _ = tx.send(DialReply::Refused(reason.to_string()));
        }
    }
}

/// Forgets an offer when the dial finishes or is abandoned.
struct PendingGuard {
    dials: PendingDials,
    connection_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.dials.0).remove(&self.connection_id);
    }
}

/// Offers this peer answered, kept until the dialer connects or the
/// handshake window passes.
struct AnsweredOffers {
    window: Duration,
    offers: Mutex<HashMap<String, (PeerId, Instant)>>,
}

impl AnsweredOffers {
    fn new(window: Duration) -> Self {
        Self {
            window,
            offers: Mutex::new(HashMap::new()),
        }
    }

    /// Records an answer. Returns `false` when too many answers are still
    /// outstanding, in which case the offer should be rejected.
    fn record(&self, connection_id: String, offered_by: PeerId) -> bool {
        let now = Instant::now();
        let mut offers = lock(&self.offers);
        offers.retain(|_, (_, answered_at)| now.duration_since(*answered_at) < self.window);
        if offers.len() >= MAX_ANSWERED_OFFERS {
            return false;
        }
        offers.insert(connection_id, (offered_by, now));
        true
    }

    /// Claims an answered offer that is still inside the handshake window.
    fn claim(&self, connection_id: &str) -> Option<PeerId> {
        let (peer, answered_at) = lock(&self.offers).remove(connection_id)?;
        (answered_at.elapsed() < self.window).then_some(peer)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.offers).len()
    }
}

/// State shared by the signaling reader and the direct-channel listener.
struct SignalContext {
    role: Role,
    relay_host: String,
    advertise_host: Option<String>,
    listen_port: Option<u16>,
    outgoing: mpsc::UnboundedSender<SignalMessage>,
    dials: PendingDials,
    answered: AnsweredOffers,
    events: mpsc::Sender<TransportEvent>,
    alive: AtomicBool,
}

struct RelayLink {
    local: PeerId,
    role: Role,
    context: Arc<SignalContext>,
    writer: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Transport that signals through a relay server and carries data over
/// direct TCP connections.
pub struct RelayTransport {
    config: SessionConfig,
    link: Mutex<Option<RelayLink>>,
}

impl RelayTransport {
    /// Creates a closed transport.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
        }
    }

    /// The transport's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connects to the relay and waits for our id to be confirmed.
    async fn register(&self, local: &PeerId) -> SyncResult<WsStream> {
        let url = self.config.relay.url();
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::RelayUnavailable(format!("{url}: {e}")))?;

        let register = SignalMessage::register(local.clone()).to_json()?;
        ws.send(Message::Text(register))
            .await
            .map_err(|e| SyncError::RelayUnavailable(e.to_string()))?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match SignalMessage::from_json(&text)? {
                    SignalMessage::Open { peer_id } if &peer_id == local => return Ok(ws),
                    SignalMessage::Error { code, message } => {
                        return Err(SyncError::RelayUnavailable(format!(
                            "registration refused ({code:?}): {message}"
                        )));
                    }
                    other => {
                        return Err(SyncError::Protocol(format!(
                            "unexpected {} before open",
                            other.kind()
                        )));
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SyncError::RelayUnavailable(
                        "relay closed the link during registration".into(),
                    ));
                }
                Some(Ok(Message::Binary(_))) => {
                    return Err(SyncError::Protocol("binary frame from relay".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SyncError::RelayUnavailable(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl SignalingTransport for RelayTransport {
    async fn open(&self, local: &PeerId, role: Role) -> SyncResult<TransportEvents> {
        if lock(&self.link).is_some() {
            return Err(SyncError::Config("transport is already open".into()));
        }

        let listener = match role {
            Role::Headless => Some(
                TcpListener::bind(self.config.direct_listen_addr)
                    .await
                    .map_err(|e| SyncError::Network(format!("bind direct listener: {e}")))?,
            ),
            Role::Controller => None,
        };
        let listen_port = match &listener {
            Some(listener) => Some(
                listener
                    .local_addr()
                    .map_err(|e| SyncError::Network(e.to_string()))?
                    .port(),
            ),
            None => None,
        };

        let ws = self.register(local).await?;
        info!("registered with relay as {local} ({role})");

        let (sink, stream) = ws.split();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let context = Arc::new(SignalContext {
            role,
            relay_host: self.config.relay.host.clone(),
            advertise_host: self.config.advertise_host.clone(),
            listen_port,
            outgoing: outgoing_tx,
            dials: PendingDials::default(),
            answered: AnsweredOffers::new(self.config.dial_timeout()),
            events: events_tx,
            alive: AtomicBool::new(true),
        });

        let writer = tokio::spawn(write_signals(
            sink,
            outgoing_rx,
            self.config.heartbeat_interval(),
        ));
        let mut tasks = vec![tokio::spawn(read_signals(stream, context.clone()))];
        if let Some(listener) = listener {
            tasks.push(tokio::spawn(accept_channels(
                listener,
                context.clone(),
                self.config.dial_timeout(),
                self.config.max_frame_size,
            )));
        }

        *lock(&self.link) = Some(RelayLink {
            local: local.clone(),
            role,
            context,
            writer,
            tasks,
        });
        Ok(events_rx)
    }

    async fn dial(&self, remote: &PeerId) -> SyncResult<DirectChannel> {
        let (local, context) = match &*lock(&self.link) {
            Some(link) if link.role.dials() => (link.local.clone(), link.context.clone()),
            Some(_) => return Err(SyncError::Config("only a controller dials".into())),
            None => return Err(SyncError::dial_failed(remote, "transport is not open")),
        };
        if !context.alive.load(Ordering::Acquire) {
            return Err(SyncError::dial_failed(remote, "relay link closed"));
        }

        let connection_id = Uuid::new_v4().to_string();
        let (reply, _pending) = context.dials.insert(connection_id.clone());
        context
            .outgoing
            .send(SignalMessage::Offer {
                src: None,
                dst: remote.clone(),
                connection_id: connection_id.clone(),
            })
            .map_err(|_| SyncError::dial_failed(remote, "relay link closed"))?;
        debug!("offered connection {connection_id} to {remote}");

        let (host, port) = match reply.await {
            Ok(DialReply::Answer { host, port }) => (host, port),
            Ok(DialReply::Refused(reason)) => return Err(SyncError::dial_failed(remote, reason)),
            Err(_) => return Err(SyncError::dial_failed(remote, "relay link closed")),
        };

        let mut stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| SyncError::dial_failed(remote, format!("connect {host}:{port}: {e}")))?;
        let max_frame = self.config.max_frame_size;
        write_json(&mut stream, &ChannelHello::new(connection_id, local), max_frame)
            .await
            .map_err(|e| SyncError::dial_failed(remote, e.to_string()))?;

        info!("direct channel to {remote} via {host}:{port}");
        Ok(spawn_channel(stream, remote.clone(), max_frame))
    }

    async fn close(&self) {
        let link = lock(&self.link).take();
        let Some(link) = link else {
            return;
        };
        link.context.alive.store(false, Ordering::Release);
        for task in &link.tasks {
            task.abort();
        }
        link.context.dials.fail_all("transport closed");

        let _ = link.context.outgoing.send(SignalMessage::Leave);
        let abort = link.writer.abort_handle();
        if tokio::time::timeout(CLOSE_GRACE, link.writer).await.is_err() {
            abort.abort();
        }
        debug!("left relay as {}", link.local);
    }

    fn is_open(&self) -> bool {
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| link.context.alive.load(Ordering::Acquire))
    }
}

async fn write_signals(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<SignalMessage>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        let message = tokio::select! {
            next = outgoing.recv() => match next {
                Some(message) => message,
                None => break,
            },
            _ = ticker.tick() => SignalMessage::Heartbeat,
        };

        let leaving = matches!(message, SignalMessage::Leave);
        match message.to_json() {
            Ok(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("relay write failed: {e}");
                    break;
                }
            }
            Err(e) => warn!("failed to encode {}: {e}", message.kind()),
        }
        if leaving {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_signals(mut stream: SplitStream<WsStream>, context: Arc<SignalContext>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match SignalMessage::from_json(&text) {
                Ok(message) => handle_signal(message, &context).await,
                Err(e) => warn!("undecodable relay message: {e}"),
            },
            Some(Ok(Message::Close(_))) => break "relay closed the link".to_string(),
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
            None => break "relay link ended".to_string(),
        }
    };

    context.alive.store(false, Ordering::Release);
    context.dials.fail_all(&reason);
    info!("relay link lost: {reason}");
    let _ = context
        .events
        .send(TransportEvent::RelayClosed { reason })
        .await;
}

async fn handle_signal(message: SignalMessage, context: &SignalContext) {
    match message {
        SignalMessage::Offer {
            src: Some(src),
            connection_id,
            ..
        } => {
            let reply = match (context.role, context.listen_port) {
                (Role::Headless, Some(port))
                    if context.answered.record(connection_id.clone(), src.clone()) =>
                {
                    SignalMessage::Answer {
                        src: None,
                        dst: src,
                        connection_id,
                        host: context.advertise_host.clone(),
                        port,
                    }
                }
                _ => SignalMessage::Reject {
                    src: None,
                    dst: src,
                    connection_id,
                    reason: "not accepting connections".to_string(),
                },
            };
            let _ = context.outgoing.send(reply);
        }
        SignalMessage::Answer {
            connection_id,
            host,
            port,
            ..
        } => {
            let host = host.unwrap_or_else(|| context.relay_host.clone());
            context
                .dials
                .resolve(&connection_id, DialReply::Answer { host, port });
        }
        SignalMessage::Reject {
            connection_id,
            reason,
            ..
        } => context
            .dials
            .resolve(&connection_id, DialReply::Refused(reason)),
        SignalMessage::Expire { dst, connection_id } => context.dials.resolve(
            &connection_id,
            DialReply::Refused(format!("{dst} is not registered with the relay")),
        ),
        SignalMessage::Error { code, message } => {
            let error = SyncError::Protocol(format!("relay error ({code:?}): {message}"));
            let _ = context.events.send(TransportEvent::Error(error)).await;
        }
        other => debug!("ignoring {} from relay", other.kind()),
    }
}

async fn accept_channels(
    listener: TcpListener,
    context: Arc<SignalContext>,
    handshake_timeout: Duration,
    max_frame: usize,
) {
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("direct listener failed: {e}");
                break;
            }
        };

        let context = context.clone();
        tokio::spawn(async move {
            let hello: ChannelHello =
                match tokio::time::timeout(handshake_timeout, read_json(&mut stream, max_frame))
                    .await
                {
                    Ok(Ok(hello)) => hello,
                    Ok(Err(e)) => {
                        debug!("bad channel hello from {addr}: {e}");
                        return;
                    }
                    Err(_) => {
                        debug!("channel hello from {addr} timed out");
                        return;
                    }
                };

            let offered_by = context.answered.claim(&hello.connection_id);
            if hello.version != PROTOCOL_VERSION || offered_by.as_ref() != Some(&hello.peer_id) {
                warn!(
                    "dropping direct connection from {addr}: unknown offer {}",
                    hello.connection_id
                );
                return;
            }

            let channel = spawn_channel(stream, hello.peer_id, max_frame);
            let _ = context
                .events
                .send(TransportEvent::IncomingConnection(channel))
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn answered_offers_expire_after_the_window() {
        let answered = AnsweredOffers::new(Duration::from_secs(2));
        assert!(answered.record("c-1".into(), peer("C1")));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(answered.claim("c-1"), None);

        assert!(answered.record("c-2".into(), peer("C1")));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(answered.record("c-3".into(), peer("C1")));
        assert_eq!(answered.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_within_the_window_returns_the_offerer_once() {
        let answered = AnsweredOffers::new(Duration::from_secs(2));
        answered.record("c-1".into(), peer("C1"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(answered.claim("c-1"), Some(peer("C1")));
        assert_eq!(answered.claim("c-1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_flood_is_capped() {
        let answered = AnsweredOffers::new(Duration::from_secs(10));
        for n in 0..MAX_ANSWERED_OFFERS {
            assert!(answered.record(format!("c-{n}"), peer("C1")));
        }
        assert!(!answered.record("one-more".into(), peer("C1")));
        assert_eq!(answered.len(), MAX_ANSWERED_OFFERS);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(answered.record("later".into(), peer("C1")));
        assert_eq!(answered.len(), 1);
    }
}
