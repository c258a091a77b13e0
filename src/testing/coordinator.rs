//! In-memory coordination backend.

use crate::cluster::{BackendEvent, BackendResult, CoordinationBackend, MemberDescriptor};
use crate::error::DiscoveryError;
use crate::types::ServiceId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

const WATCH_CAPACITY: usize = 256;

/// Session id used for members registered by test code.
const EXTERNAL_SESSION: u64 = 0;

struct Registration {
    session: u64,
    data: Vec<u8>,
}

struct HubState {
    reachable: bool,
    next_session: u64,
    connected: HashSet<u64>,
    registrations: BTreeMap<ServiceId, Registration>,
    watchers: Vec<(u64, mpsc::Sender<BackendEvent>)>,
    publishes: HashMap<ServiceId, usize>,
}

impl HubState {
    /// Deliver to every watcher. Closed watchers are dropped; a full one
    /// misses the event.
    fn broadcast(&mut self, event: BackendEvent) {
        self.watchers.retain(|(session, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    session = *session,
                    capacity = WATCH_CAPACITY,
                    event = ?event,
                    "Watch queue full, dropping event"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn register(&mut self, session: u64, service_id: &str, data: Vec<u8>) {
        let previous = self.registrations.insert(
            service_id.to_string(),
            Registration {
                session,
                data: data.clone(),
            },
        );
        *self.publishes.entry(service_id.to_string()).or_default() += 1;
        let service_id = service_id.to_string();
        self.broadcast(match previous {
            Some(_) => BackendEvent::Updated { service_id, data },
            None => BackendEvent::Joined { service_id, data },
        });
    }

    fn unregister(&mut self, service_id: &str) {
        if self.registrations.remove(service_id).is_some() {
            self.broadcast(BackendEvent::Left {
                service_id: service_id.to_string(),
            });
        }
    }

    /// Drop a session: its watchers see `Disconnected`, its registrations go.
    fn end_session(&mut self, session: u64, notify: bool) {
        self.connected.remove(&session);
        let (own, others): (Vec<_>, Vec<_>) = std::mem::take(&mut self.watchers)
            .into_iter()
            .partition(|(s, _)| *s == session);
        self.watchers = others;
        if notify {
            for (_, tx) in own {
                let _ = tx.try_send(BackendEvent::Disconnected);
            }
        }

        let owned: Vec<ServiceId> = self
            .registrations
            .iter()
            .filter(|(_, r)| r.session == session)
            .map(|(id, _)| id.clone())
            .collect();
        for service_id in owned {
            self.unregister(&service_id);
        }
    }

    fn require_connected(&self, session: u64) -> BackendResult<()> {
        if self.connected.contains(&session) {
            Ok(())
        } else {
            Err(DiscoveryError::NotConnected)
        }
    }
}

/// Shared registration store with a watch stream, standing in for an
/// external coordination service.
#[derive(Clone)]
pub struct InMemoryCoordinator {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                reachable: true,
                next_session: EXTERNAL_SESSION + 1,
                connected: HashSet::new(),
                registrations: BTreeMap::new(),
                watchers: Vec::new(),
                publishes: HashMap::new(),
            })),
        }
    }

    /// A new backend client with its own session.
    pub fn session(&self) -> InMemoryBackend {
        let mut state = self.state.lock();
        let session = state.next_session;
        state.next_session += 1;
        InMemoryBackend {
            hub: self.clone(),
            session,
        }
    }

    /// Register a member that is not driven by a discovery adapter.
    pub fn join_external(&self, descriptor: &MemberDescriptor) {
        // bincode of a plain struct with owned fields does not fail
        let data = descriptor.to_bytes().unwrap_or_default();
        self.state
            .lock()
            .register(EXTERNAL_SESSION, &descriptor.service_id, data);
    }

    /// Remove a member's registration.
    pub fn leave_external(&self, service_id: &str) {
        self.state.lock().unregister(service_id);
    }

    /// Expire the session that registered `service_id`, as a coordination
    /// service does when a client stops heart-beating.
    pub fn expire(&self, service_id: &str) {
        let mut state = self.state.lock();
        let Some(session) = state.registrations.get(service_id).map(|r| r.session) else {
            return;
        };
        if session == EXTERNAL_SESSION {
            state.unregister(service_id);
        } else {
            state.end_session(session, true);
        }
    }

    /// Make connects fail (`false`) or succeed again (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Registered service ids, sorted.
    pub fn registered(&self) -> Vec<ServiceId> {
        self.state.lock().registrations.keys().cloned().collect()
    }

    /// How many times a service published its descriptor.
    pub fn publish_count(&self, service_id: &str) -> usize {
        self.state
            .lock()
            .publishes
            .get(service_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryCoordinator")
            .field("reachable", &state.reachable)
            .field("registrations", &state.registrations.len())
            .field("watchers", &state.watchers.len())
            .finish()
    }
}

/// One client session of an [`InMemoryCoordinator`].
#[derive(Debug)]
pub struct InMemoryBackend {
    hub: InMemoryCoordinator,
    session: u64,
}

#[async_trait]
impl CoordinationBackend for InMemoryBackend {
    async fn connect(&self) -> BackendResult<()> {
        let mut state = self.hub.state.lock();
        if !state.reachable {
            return Err(DiscoveryError::Connection("coordinator unreachable".to_string()));
        }
        state.connected.insert(self.session);
        Ok(())
    }

    async fn publish(&self, service_id: &str, data: Vec<u8>) -> BackendResult<()> {
        let mut state = self.hub.state.lock();
        state.require_connected(self.session)?;
        state.register(self.session, service_id, data);
        Ok(())
    }

    async fn members(&self) -> BackendResult<Vec<(ServiceId, Vec<u8>)>> {
        let state = self.hub.state.lock();
        state.require_connected(self.session)?;
        Ok(state
            .registrations
            .iter()
            .map(|(id, r)| (id.clone(), r.data.clone()))
            .collect())
    }

    async fn watch(&self) -> BackendResult<mpsc::Receiver<BackendEvent>> {
        let mut state = self.hub.state.lock();
        state.require_connected(self.session)?;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        state.watchers.push((self.session, tx));
        Ok(rx)
    }

    async fn disconnect(&self) -> BackendResult<()> {
        self.hub.state.lock().end_session(self.session, false);
        Ok(())
    }
}
