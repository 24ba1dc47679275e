//! Sync session: one shared document, one relay link, at most one peer.
//!
//! [`SyncSession`] is a handle. The document and all connection bookkeeping
//! live in a single actor task; `send`, `connect`, `disconnect`, transport
//! events and inbound payloads all reach it through one queue, so `apply`
//! and `merge` never interleave. Reads are served from a cached snapshot.
//!
//! Work that can block (relay open, dialing, reading a channel) runs in
//! spawned tasks that report back tagged with the epoch they were started
//! in. `disconnect()` bumps the epoch, so results that arrive late are
//! discarded.

use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use crate::state::{ConnectionState, StateTransition};
use crate::transport::{
    ChannelSender, DirectChannel, SignalingTransport, TransportEvent, TransportEvents,
};
use std::fmt;
use std::sync::Arc;
use tandem_crdt::{ReplicationStore, Snapshot, Value};
use tandem_types::{PeerId, PeerIdentity, Role};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TRANSITION_BUFFER: usize = 64;

/// What the subscription callback receives.
#[derive(Debug)]
pub enum SessionUpdate {
    /// Full document after merging one inbound message.
    Snapshot(Snapshot),
    /// A connection failure the application should know about.
    Error(SyncError),
}

/// Subscription callback. Runs on the session task and must not block.
pub type UpdateCallback = Arc<dyn Fn(SessionUpdate) + Send + Sync>;

/// Whether a `send` reached the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Applied locally and written to the open channel.
    Broadcast,
    /// Applied locally only. The change is not queued.
    LocalOnly,
}

enum Command {
    Connect {
        remote: PeerId,
        role: Role,
        on_update: UpdateCallback,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        key: String,
        value: Value,
        reply: oneshot::Sender<Delivery>,
    },
}

enum Internal {
    Opened {
        epoch: u64,
        result: SyncResult<TransportEvents>,
    },
    Dialed {
        epoch: u64,
        result: SyncResult<DirectChannel>,
    },
    Transport {
        epoch: u64,
        event: TransportEvent,
    },
    EventsEnded {
        epoch: u64,
    },
    Inbound {
        channel: u64,
        payload: Vec<u8>,
    },
    ChannelClosed {
        channel: u64,
    },
}

/// Handle to a running session.
///
/// Dropping the handle disconnects and stops the session task.
pub struct SyncSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    identity: watch::Receiver<Option<PeerIdentity>>,
    transitions: broadcast::Sender<StateTransition>,
}

impl SyncSession {
    /// Starts a disconnected session with an empty document.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<dyn SignalingTransport>, config: SessionConfig) -> SyncResult<Self> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::default()));
        let (identity_tx, identity_rx) = watch::channel(None);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_BUFFER);

        let actor = SessionActor {
            transport,
            config,
            // Writes carry a per-process actor; peer ids only address the relay.
            store: ReplicationStore::new(PeerId::generate()),
            state: ConnectionState::Disconnected,
            epoch: 0,
            identity: None,
            on_update: None,
            relay_alive: false,
            pending_connect: None,
            opening: None,
            dialing: None,
            pump: None,
            channel: None,
            next_channel: 0,
            internal: internal_tx,
            state_tx,
            snapshot_tx,
            identity_tx,
            transitions: transitions_tx.clone(),
        };
        tokio::spawn(actor.run(commands_rx, internal_rx));

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            snapshot: snapshot_rx,
            identity: identity_rx,
            transitions: transitions_tx,
        })
    }

    /// Registers with the relay as the peer implied by `role`, and as a
    /// controller dials `headless_peer_id`.
    ///
    /// Resolves once the relay link is up (or failed). Peer connection
    /// progress and failures after that are reported through `on_update`
    /// and [`transitions`](Self::transitions).
    pub async fn connect<F>(&self, headless_peer_id: &str, role: Role, on_update: F) -> SyncResult<()>
    where
        F: Fn(SessionUpdate) + Send + Sync + 'static,
    {
        let remote = PeerId::parse(headless_peer_id)?;
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect {
            remote,
            role,
            on_update: Arc::new(on_update),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Tears down the relay link and any channel. The document is kept.
    pub async fn disconnect(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Disconnect { reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Sets `key` to `value` locally and broadcasts the change if a peer is
    /// connected. Changes made without a peer are never sent later.
    pub async fn send(&self, key: impl Into<String>, value: Value) -> SyncResult<Delivery> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            key: key.into(),
            value,
            reply,
        })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Current document.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribes to state transitions from now on.
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Our peer id while connected.
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.identity
            .borrow()
            .as_ref()
            .map(|identity| identity.local.clone())
    }

    fn command(&self, command: Command) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("state", &self.state())
            .field("local_peer_id", &self.local_peer_id())
            .finish()
    }
}

struct ActiveChannel {
    id: u64,
    sender: ChannelSender,
    reader: JoinHandle<()>,
}

struct SessionActor {
    transport: Arc<dyn SignalingTransport>,
    config: SessionConfig,
    store: ReplicationStore,
    state: ConnectionState,
    epoch: u64,
    identity: Option<PeerIdentity>,
    on_update: Option<UpdateCallback>,
    relay_alive: bool,
    pending_connect: Option<oneshot::Sender<SyncResult<()>>>,
    opening: Option<JoinHandle<()>>,
    dialing: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    channel: Option<ActiveChannel>,
    next_channel: u64,
    internal: mpsc::UnboundedSender<Internal>,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    identity_tx: watch::Sender<Option<PeerIdentity>>,
    transitions: broadcast::Sender<StateTransition>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event).await,
            }
        }

        self.release_link().await;
        self.transition(ConnectionState::Disconnected);
        debug!("session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                remote,
                role,
                on_update,
                reply,
            } => self.connect(remote, role, on_update, reply),
            Command::Disconnect { reply } => {
                self.release_link().await;
                self.transition(ConnectionState::Disconnected);
                let _ = reply.send(());
            }
            Command::Send { key, value, reply } => {
                let _ = reply.send(self.send(key, value));
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Opened { epoch, result } if epoch == self.epoch => {
                self.relay_opened(result).await;
            }
            Internal::Dialed { epoch, result } if epoch == self.epoch => self.dialed(result),
            Internal::Transport { epoch, event } if epoch == self.epoch => {
                self.transport_event(event);
            }
            Internal::EventsEnded { epoch } if epoch == self.epoch => {
                self.relay_lost("transport event stream ended".to_string());
            }
            Internal::Inbound { channel, payload } if self.is_current(channel) => {
                self.inbound(&payload);
            }
            Internal::ChannelClosed { channel } if self.is_current(channel) => {
                self.channel_closed();
            }
            _ => debug!("discarding stale session event"),
        }
    }

    fn connect(
        &mut self,
        remote: PeerId,
        role: Role,
        on_update: UpdateCallback,
        reply: oneshot::Sender<SyncResult<()>>,
    ) {
        if self.state != ConnectionState::Disconnected {
            let _ = reply.send(Err(SyncError::Config(format!(
                "cannot connect while {}; disconnect first",
                self.state
            ))));
            return;
        }

        let identity = PeerIdentity::resolve(&remote, role);
        let local = identity.local.clone();
        info!("connecting as {local} ({role})");

        self.epoch += 1;
        self.identity = Some(identity.clone());
        self.identity_tx.send_replace(Some(identity));
        self.on_update = Some(on_update);
        self.pending_connect = Some(reply);
        self.transition(ConnectionState::ConnectingToRelay);

        let transport = self.transport.clone();
        let internal = self.internal.clone();
        let epoch = self.epoch;
        let timeout = self.config.open_timeout();
        self.opening = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.open(&local, role)).await {
                Ok(Ok(events)) => Ok(events),
                Ok(Err(SyncError::RelayUnavailable(reason))) => {
                    Err(SyncError::RelayUnavailable(reason))
                }
                Ok(Err(e)) => Err(SyncError::RelayUnavailable(e.to_string())),
                Err(_) => Err(SyncError::RelayUnavailable(format!(
                    "no answer within {}ms",
                    timeout.as_millis()
                ))),
            };
            let _ = internal.send(Internal::Opened { epoch, result });
        }));
    }

    async fn relay_opened(&mut self, result: SyncResult<TransportEvents>) {
        self.opening = None;
        let reply = self.pending_connect.take();

        let mut events = match result {
            Ok(events) => events,
            Err(e) => {
                warn!("relay open failed: {e}");
                self.release_link().await;
                self.transition(ConnectionState::Disconnected);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        let internal = self.internal.clone();
        let epoch = self.epoch;
        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if internal.send(Internal::Transport { epoch, event }).is_err() {
                    return;
                }
            }
            let _ = internal.send(Internal::EventsEnded { epoch });
        }));

        self.relay_alive = true;
        self.transition(ConnectionState::RelayConnected);
        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }

        let remote = self
            .identity
            .as_ref()
            .and_then(|identity| identity.remote.clone());
        if let Some(remote) = remote {
            self.dial(remote);
        }
    }

    fn dial(&mut self, remote: PeerId) {
        info!("dialing {remote}");
        self.transition(ConnectionState::PeerConnecting);

        let transport = self.transport.clone();
        let internal = self.internal.clone();
        let epoch = self.epoch;
        let timeout = self.config.dial_timeout();
        self.dialing = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.dial(&remote)).await {
                Ok(Ok(channel)) => Ok(channel),
                Ok(Err(e @ SyncError::DialFailed { .. })) => Err(e),
                Ok(Err(e)) => Err(SyncError::dial_failed(&remote, e.to_string())),
                Err(_) => Err(SyncError::dial_failed(
                    &remote,
                    format!("no channel within {}ms", timeout.as_millis()),
                )),
            };
            let _ = internal.send(Internal::Dialed { epoch, result });
        }));
    }

    fn dialed(&mut self, result: SyncResult<DirectChannel>) {
        self.dialing = None;
        if self.state != ConnectionState::PeerConnecting {
            debug!("dial finished after leaving peer-connecting; dropping result");
            return;
        }
        match result {
            Ok(channel) => {
                self.install_channel(channel);
                self.transition(ConnectionState::PeerConnected);
            }
            Err(e) => {
                warn!("{e}");
                self.fail(e);
            }
        }
    }

    fn transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingConnection(channel) => {
                let accepts = self
                    .identity
                    .as_ref()
                    .is_some_and(|identity| !identity.role.dials());
                if accepts && self.state == ConnectionState::RelayConnected {
                    self.install_channel(channel);
                    self.transition(ConnectionState::PeerConnected);
                } else {
                    warn!(
                        "rejecting direct channel from {} while {}",
                        channel.remote(),
                        self.state
                    );
                }
            }
            TransportEvent::RelayClosed { reason } => self.relay_lost(reason),
            TransportEvent::Error(e) => {
                warn!("transport error: {e}");
                self.fail(e);
            }
        }
    }

    fn relay_lost(&mut self, reason: String) {
        if !self.relay_alive {
            return;
        }
        self.relay_alive = false;
        match self.state {
            ConnectionState::PeerConnected => {
                info!("relay lost ({reason}); keeping direct channel");
            }
            ConnectionState::RelayConnected | ConnectionState::PeerConnecting => {
                warn!("relay lost: {reason}");
                self.fail(SyncError::RelayUnavailable(reason));
            }
            _ => {}
        }
    }

    fn inbound(&mut self, payload: &[u8]) {
        let snapshot = match self.store.merge(payload) {
            Ok(snapshot) => snapshot.clone(),
            Err(e) => {
                warn!("dropping undecodable change: {e}");
                return;
            }
        };
        debug!("merged inbound change; {} keys", snapshot.len());
        self.snapshot_tx.send_replace(Arc::new(snapshot.clone()));
        self.notify(SessionUpdate::Snapshot(snapshot));
    }

    fn channel_closed(&mut self) {
        let remote = self.channel.take().map(|channel| channel.sender.remote().clone());
        if self.state != ConnectionState::PeerConnected {
            return;
        }

        if self.relay_alive {
            info!("channel to {remote:?} closed; relay still up");
            self.transition(ConnectionState::RelayConnected);
            self.notify(SessionUpdate::Error(SyncError::ChannelClosed));
        } else {
            warn!("channel to {remote:?} closed and relay is gone");
            self.fail(SyncError::ChannelClosed);
        }
    }

    fn send(&mut self, key: String, value: Value) -> Delivery {
        let change = self.store.apply(key, value);
        self.snapshot_tx
            .send_replace(Arc::new(self.store.snapshot().clone()));

        let channel = match &self.channel {
            Some(channel) if self.state == ConnectionState::PeerConnected => channel,
            _ => return Delivery::LocalOnly,
        };
        match channel.sender.send(change.encode()) {
            Ok(()) => Delivery::Broadcast,
            Err(_) => {
                debug!("channel closing; change {} kept local", change.key);
                Delivery::LocalOnly
            }
        }
    }

    fn install_channel(&mut self, channel: DirectChannel) {
        self.next_channel += 1;
        let id = self.next_channel;
        let (sender, mut inbound) = channel.split();
        info!("direct channel to {} open", sender.remote());

        let internal = self.internal.clone();
        let reader = tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                if internal.send(Internal::Inbound { channel: id, payload }).is_err() {
                    return;
                }
            }
            let _ = internal.send(Internal::ChannelClosed { channel: id });
        });

        self.channel = Some(ActiveChannel { id, sender, reader });
    }

    fn is_current(&self, channel: u64) -> bool {
        self.channel.as_ref().is_some_and(|active| active.id == channel)
    }

    fn drop_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.reader.abort();
        }
    }

    /// Enters `Errored`: the dial and channel are released, the relay link
    /// stays until `disconnect()`.
    fn fail(&mut self, error: SyncError) {
        if let Some(dialing) = self.dialing.take() {
            dialing.abort();
        }
        self.drop_channel();
        self.transition(ConnectionState::Errored);
        self.notify(SessionUpdate::Error(error));
    }

    /// Drops everything tied to the current connection attempt.
    async fn release_link(&mut self) {
        self.epoch += 1;
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(SyncError::Cancelled));
        }
        // An open or dial caught mid-poll on another worker can still touch
        // the transport, so both must have stopped before `close()`.
        for task in [self.opening.take(), self.dialing.take()].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.drop_channel();
        self.transport.close().await;

        self.relay_alive = false;
        self.on_update = None;
        self.identity = None;
        self.identity_tx.send_replace(None);
    }

    fn notify(&self, update: SessionUpdate) {
        if let Some(on_update) = &self.on_update {
            on_update(update);
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("ignoring invalid transition {} -> {next}", self.state);
            return;
        }
        let from = std::mem::replace(&mut self.state, next);
        info!("session {from} -> {next}");
        self.state_tx.send_replace(next);
        let _ = self.transitions.send(StateTransition { from, to: next });
    }
}
