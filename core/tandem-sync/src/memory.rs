//! In-process relay and transport.
//!
//! [`MemoryRelay`] plays the rendezvous server for any number of
//! [`MemoryTransport`]s in the same process. Channels are pumped by small
//! forwarding tasks, so both ends see a close when either drops, and tests
//! can sever them or break the relay on demand.

use crate::error::{SyncError, SyncResult};
use crate::transport::{DirectChannel, SignalingTransport, TransportEvent, TransportEvents};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_types::{PeerId, Role};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const EVENT_BUFFER: usize = 64;

/// How the relay treats offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialBehaviour {
    /// Offers to registered peers succeed.
    #[default]
    Accept,
    /// Every offer is rejected.
    Reject,
    /// Offers are never answered.
    Stall,
}

struct Registration {
    token: u64,
    role: Role,
    events: mpsc::Sender<TransportEvent>,
}

struct RelayState {
    reachable: bool,
    open_stalls: bool,
    dial_behaviour: DialBehaviour,
    peers: HashMap<PeerId, Registration>,
    pumps: Vec<JoinHandle<()>>,
    next_token: u64,
}

/// Shared in-memory relay. Cheap to clone.
#[derive(Clone)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelay {
    /// Creates a reachable relay with no peers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                reachable: true,
                open_stalls: false,
                dial_behaviour: DialBehaviour::Accept,
                peers: HashMap::new(),
                pumps: Vec::new(),
                next_token: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a transport attached to this relay.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            relay: self.clone(),
            link: Mutex::new(None),
        }
    }

    /// Makes `open()` fail with `RelayUnavailable` while `false`.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Makes `open()` hang while `true`.
    pub fn set_open_stalls(&self, stalls: bool) {
        self.lock().open_stalls = stalls;
    }

    /// Sets how offers are answered.
    pub fn set_dial_behaviour(&self, behaviour: DialBehaviour) {
        self.lock().dial_behaviour = behaviour;
    }

    /// Whether `peer` is currently registered.
    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.lock().peers.contains_key(peer)
    }

    /// Ids currently registered, sorted.
    pub fn registered_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.lock().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Drops every relay link. Peers see `RelayClosed`; direct channels
    /// keep running.
    pub fn drop_relay(&self) {
        let peers: Vec<_> = self.lock().peers.drain().collect();
        for (peer, registration) in peers {
            debug!("memory relay dropping {peer}");
            let _ = registration.events.try_send(TransportEvent::RelayClosed {
                reason: "relay shut down".to_string(),
            });
        }
    }

    /// Tears down every direct channel created so far.
    pub fn sever_channels(&self) {
        let pumps: Vec<_> = self.lock().pumps.drain(..).collect();
        for pump in pumps {
            pump.abort();
        }
    }

    /// Delivers a transport error to `peer`.
    pub fn inject_error(&self, peer: &PeerId, error: SyncError) -> bool {
        let state = self.lock();
        match state.peers.get(peer) {
            Some(registration) => registration
                .events
                .try_send(TransportEvent::Error(error))
                .is_ok(),
            None => false,
        }
    }

    fn link(&self, dialer: &PeerId, dialee: &PeerId) -> (DirectChannel, DirectChannel) {
        let (dialer_out, dialee_in, forward) = pump();
        let (dialee_out, dialer_in, backward) = pump();

        let mut state = self.lock();
        state.pumps.retain(|handle| !handle.is_finished());
        state.pumps.push(forward);
        state.pumps.push(backward);

        (
            DirectChannel::new(dialee.clone(), dialer_out, dialer_in),
            DirectChannel::new(dialer.clone(), dialee_out, dialee_in),
        )
    }
}

/// One direction of a channel: what goes into the sender comes out of the
/// receiver until either end is dropped or the pump is aborted.
fn pump() -> (
    mpsc::UnboundedSender<Vec<u8>>,
    mpsc::UnboundedReceiver<Vec<u8>>,
    JoinHandle<()>,
) {
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(payload) = in_rx.recv().await {
            if out_tx.send(payload).is_err() {
                break;
            }
        }
    });
    (in_tx, out_rx, handle)
}

struct Link {
    local: PeerId,
    role: Role,
    token: u64,
}

/// A transport attached to a [`MemoryRelay`].
pub struct MemoryTransport {
    relay: MemoryRelay,
    link: Mutex<Option<Link>>,
}

impl MemoryTransport {
    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The relay this transport talks to.
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn open(&self, local: &PeerId, role: Role) -> SyncResult<TransportEvents> {
        if self.link().is_some() {
            return Err(SyncError::Config("transport is already open".into()));
        }

        let stalls = {
            let state = self.relay.lock();
            if !state.reachable {
                return Err(SyncError::RelayUnavailable("relay unreachable".into()));
            }
            state.open_stalls
        };
        if stalls {
            std::future::pending::<()>().await;
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let token = {
            let mut state = self.relay.lock();
            if state.peers.contains_key(local) {
                return Err(SyncError::RelayUnavailable(format!(
                    "peer id {local} is already registered"
                )));
            }
            let token = state.next_token;
            state.next_token += 1;
            state.peers.insert(
                local.clone(),
                Registration {
                    token,
                    role,
                    events: events_tx,
                },
            );
            token
        };

        *self.link() = Some(Link {
            local: local.clone(),
            role,
            token,
        });
        debug!("memory relay registered {local} as {role}");
        Ok(events_rx)
    }

    async fn dial(&self, remote: &PeerId) -> SyncResult<DirectChannel> {
        let local = match &*self.link() {
            Some(link) if link.role.dials() => link.local.clone(),
            Some(_) => return Err(SyncError::Config("only a controller dials".into())),
            None => return Err(SyncError::dial_failed(remote, "transport is not open")),
        };

        let (behaviour, events) = {
            let state = self.relay.lock();
            if !state.peers.contains_key(&local) {
                return Err(SyncError::dial_failed(remote, "relay link closed"));
            }
            let events = match state.peers.get(remote) {
                Some(registration) if registration.role.dials() => {
                    return Err(SyncError::dial_failed(remote, "peer does not accept"));
                }
                Some(registration) => registration.events.clone(),
                None => return Err(SyncError::dial_failed(remote, "peer unknown to relay")),
            };
            (state.dial_behaviour, events)
        };

        match behaviour {
            DialBehaviour::Accept => {}
            DialBehaviour::Reject => {
                return Err(SyncError::dial_failed(remote, "offer rejected"));
            }
            DialBehaviour::Stall => std::future::pending::<()>().await,
        }

        let (ours, theirs) = self.relay.link(&local, remote);
        events
            .try_send(TransportEvent::IncomingConnection(theirs))
            .map_err(|_| SyncError::dial_failed(remote, "peer stopped listening"))?;
        Ok(ours)
    }

    async fn close(&self) {
        let link = self.link().take();
        let Some(link) = link else {
            return;
        };
        let mut state = self.relay.lock();
        if state
            .peers
            .get(&link.local)
            .is_some_and(|registration| registration.token == link.token)
        {
            state.peers.remove(&link.local);
            debug!("memory relay released {}", link.local);
        }
    }

    fn is_open(&self) -> bool {
        let guard = self.link();
        let Some(link) = guard.as_ref() else {
            return false;
        };
        self.relay
            .lock()
            .peers
            .get(&link.local)
            .is_some_and(|registration| registration.token == link.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        PeerId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn dial_hands_the_other_end_to_the_headless_peer() {
        let relay = MemoryRelay::new();
        let headless = relay.transport();
        let controller = relay.transport();

        let mut events = headless.open(&id("h"), Role::Headless).await.unwrap();
        controller.open(&id("c"), Role::Controller).await.unwrap();

        let mut ours = controller.dial(&id("h")).await.unwrap();
        let Some(TransportEvent::IncomingConnection(mut theirs)) = events.recv().await else {
            panic!("expected an incoming connection");
        };
        assert_eq!(ours.remote(), &id("h"));
        assert_eq!(theirs.remote(), &id("c"));

        ours.send(b"ping".to_vec()).unwrap();
        assert_eq!(theirs.recv().await.unwrap(), b"ping");
        theirs.send(b"pong".to_vec()).unwrap();
        assert_eq!(ours.recv().await.unwrap(), b"pong");

        drop(theirs);
        assert!(ours.recv().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let relay = MemoryRelay::new();
        let first = relay.transport();
        let second = relay.transport();

        first.open(&id("h"), Role::Headless).await.unwrap();
        let err = second.open(&id("h"), Role::Headless).await.unwrap_err();
        assert!(matches!(err, SyncError::RelayUnavailable(_)));

        first.close().await;
        assert!(!relay.is_registered(&id("h")));
        second.open(&id("h"), Role::Headless).await.unwrap();
    }

    #[tokio::test]
    async fn headless_cannot_dial() {
        let relay = MemoryRelay::new();
        let headless = relay.transport();
        headless.open(&id("h"), Role::Headless).await.unwrap();
        let err = headless.dial(&id("other")).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_only_releases_own_registration() {
        let relay = MemoryRelay::new();
        let transport = relay.transport();
        transport.close().await;

        transport.open(&id("h"), Role::Headless).await.unwrap();
        relay.drop_relay();
        let other = relay.transport();
        other.open(&id("h"), Role::Headless).await.unwrap();

        transport.close().await;
        assert!(relay.is_registered(&id("h")));
        assert!(other.is_open());
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn severed_channels_close_on_both_ends() {
        let relay = MemoryRelay::new();
        let headless = relay.transport();
        let controller = relay.transport();
        let mut events = headless.open(&id("h"), Role::Headless).await.unwrap();
        controller.open(&id("c"), Role::Controller).await.unwrap();

        let mut ours = controller.dial(&id("h")).await.unwrap();
        let Some(TransportEvent::IncomingConnection(mut theirs)) = events.recv().await else {
            panic!("expected an incoming connection");
        };

        relay.sever_channels();
        assert!(ours.recv().await.is_none());
        assert!(theirs.recv().await.is_none());
    }
}
