//! Discovery through an external coordination backend.
//!
//! The adapter publishes this node's descriptor, lists the live members and
//! then follows the backend's watch stream on a background worker:
//!
//! - A join or a routing-relevant update recomputes immediately.
//! - A leave is provisional for `recalculate_delay`. If the peer comes back
//!   inside the window the leave is cancelled, and nothing is recomputed
//!   unless its descriptor changed.
//! - Losing the backend session starts a reconnect cycle with capped,
//!   jittered exponential backoff. Ownership stays as last computed until
//!   the session is back; the member list is then reconciled.
//! - The descriptor is republished every `republish_interval` so load and
//!   readiness changes reach the other members.

use crate::cluster::discovery::{DiscoveryService, PartitionRecalculator};
use crate::cluster::membership::{LocalService, MemberDescriptor};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::metrics::RoutingMetrics;
use crate::types::ServiceId;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Result type of backend operations.
pub type BackendResult<T> = std::result::Result<T, DiscoveryError>;

/// Membership change reported by a coordination backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A member published its descriptor for the first time.
    Joined { service_id: ServiceId, data: Vec<u8> },
    /// A member republished its descriptor.
    Updated { service_id: ServiceId, data: Vec<u8> },
    /// A member's registration disappeared.
    Left { service_id: ServiceId },
    /// This node's session with the backend was lost.
    Disconnected,
}

/// Presence store shared by the cluster (ephemeral registrations plus a
/// watch stream). Descriptors travel as opaque bytes.
#[async_trait]
pub trait CoordinationBackend: Send + Sync + 'static {
    /// Open a session.
    async fn connect(&self) -> BackendResult<()>;

    /// Create or replace this node's registration.
    async fn publish(&self, service_id: &str, data: Vec<u8>) -> BackendResult<()>;

    /// All current registrations, this node's included.
    async fn members(&self) -> BackendResult<Vec<(ServiceId, Vec<u8>)>>;

    /// Subscribe to registration changes from now on.
    async fn watch(&self) -> BackendResult<mpsc::Receiver<BackendEvent>>;

    /// Close the session, dropping this node's registration.
    async fn disconnect(&self) -> BackendResult<()>;
}

/// Capped exponential backoff with jitter in `[0.5, 1.0]` of the step.
#[derive(Debug)]
pub(crate) struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self { current: min, max }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let step = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        step.mul_f64(jitter)
    }
}

/// Discovery adapter over a [`CoordinationBackend`].
pub struct CoordinatedDiscovery<B: CoordinationBackend> {
    shared: Arc<Shared<B>>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

struct Shared<B> {
    local: Arc<LocalService>,
    backend: B,
    recalculator: Arc<dyn PartitionRecalculator>,
    config: DiscoveryConfig,
    metrics: Arc<RoutingMetrics>,
    peers: RwLock<BTreeMap<ServiceId, MemberDescriptor>>,
    connected: watch::Sender<bool>,
}

impl<B: CoordinationBackend> CoordinatedDiscovery<B> {
    pub fn new(
        local: Arc<LocalService>,
        backend: B,
        recalculator: Arc<dyn PartitionRecalculator>,
        config: DiscoveryConfig,
        metrics: Arc<RoutingMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let (connected, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                local,
                backend,
                recalculator,
                config,
                metrics,
                peers: RwLock::new(BTreeMap::new()),
                connected,
            }),
            shutdown: CancellationToken::new(),
            worker: None,
        })
    }

    /// Whether a backend session is currently established.
    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Wait until a backend session is established.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.shared.connected.subscribe();
        while !*rx.borrow_and_update() {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(DiscoveryError::Shutdown.into()),
                changed = rx.changed() => changed.map_err(|_| DiscoveryError::Shutdown)?,
            }
        }
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }
}

#[async_trait]
impl<B: CoordinationBackend> DiscoveryService for CoordinatedDiscovery<B> {
    async fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        tracing::info!(
            service_id = %self.shared.local.service_id(),
            recalculate_delay_ms = self.shared.config.recalculate_delay.as_millis() as u64,
            "Starting coordinated discovery"
        );

        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            shared: self.shared.clone(),
            shutdown: self.shutdown.clone(),
            pending: HashMap::new(),
            expired_tx,
            next_generation: 0,
            initialized: false,
        };
        self.worker = Some(tokio::spawn(worker.run(expired_rx)));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Err(DiscoveryError::NotStarted.into());
        };
        self.shutdown.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Discovery worker ended abnormally");
        }
        Ok(())
    }

    fn is_monolith(&self) -> bool {
        false
    }

    fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    fn peers(&self) -> Vec<MemberDescriptor> {
        self.shared.peers.read().values().cloned().collect()
    }
}

impl<B: CoordinationBackend> Drop for CoordinatedDiscovery<B> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<B: CoordinationBackend> std::fmt::Debug for CoordinatedDiscovery<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatedDiscovery")
            .field("service_id", &self.shared.local.service_id())
            .field("started", &self.worker.is_some())
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct PendingLeave {
    generation: u64,
    token: CancellationToken,
}

enum LoopExit {
    Shutdown,
    Reconnect,
}

struct Worker<B> {
    shared: Arc<Shared<B>>,
    shutdown: CancellationToken,
    pending: HashMap<ServiceId, PendingLeave>,
    expired_tx: mpsc::UnboundedSender<(ServiceId, u64)>,
    next_generation: u64,
    initialized: bool,
}

impl<B: CoordinationBackend> Worker<B> {
    async fn run(mut self, mut expired_rx: mpsc::UnboundedReceiver<(ServiceId, u64)>) {
        loop {
            let Some(mut events) = self.establish().await else {
                break;
            };
            match self.follow(&mut events, &mut expired_rx).await {
                LoopExit::Shutdown => break,
                LoopExit::Reconnect => {
                    self.shared.connected.send_replace(false);
                }
            }
        }

        for (_, pending) in self.pending.drain() {
            pending.token.cancel();
        }
        self.shared.connected.send_replace(false);
        if let Err(e) = self.shared.backend.disconnect().await {
            tracing::debug!(error = %e, "Backend disconnect failed");
        }
        tracing::info!(service_id = %self.shared.local.service_id(), "Coordinated discovery stopped");
    }

    /// Connect with backoff until a session is up or shutdown is requested.
    async fn establish(&mut self) -> Option<mpsc::Receiver<BackendEvent>> {
        let config = &self.shared.config;
        let mut backoff = Backoff::new(config.reconnect_backoff_min, config.reconnect_backoff_max);

        loop {
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                result = self.connect_and_list() => result,
            };

            match attempt {
                Ok((members, events)) => {
                    let reconnect = self.initialized;
                    self.reconcile(members).await;
                    self.shared.connected.send_replace(true);
                    if reconnect {
                        self.shared.metrics.reconnects.inc();
                        tracing::info!(
                            service_id = %self.shared.local.service_id(),
                            "Reconnected to coordination backend"
                        );
                    }
                    return Some(events);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Coordination backend unavailable"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_list(
        &self,
    ) -> BackendResult<(Vec<MemberDescriptor>, mpsc::Receiver<BackendEvent>)> {
        let backend = &self.shared.backend;
        backend.connect().await?;
        self.publish_self().await?;
        let events = backend.watch().await?;
        let listed = backend.members().await?;

        let own_id = self.shared.local.service_id();
        let members = listed
            .into_iter()
            .filter(|(service_id, _)| *service_id != own_id)
            .filter_map(|(service_id, data)| decode(&service_id, &data))
            .collect();
        Ok((members, events))
    }

    async fn publish_self(&self) -> BackendResult<()> {
        let descriptor = self.shared.local.descriptor();
        let data = descriptor
            .to_bytes()
            .map_err(|e| DiscoveryError::Backend(e.to_string()))?;
        self.shared.backend.publish(&descriptor.service_id, data).await
    }

    async fn follow(
        &mut self,
        events: &mut mpsc::Receiver<BackendEvent>,
        expired_rx: &mut mpsc::UnboundedReceiver<(ServiceId, u64)>,
    ) -> LoopExit {
        let period = self.shared.config.republish_interval;
        let mut republish = tokio::time::interval_at(Instant::now() + period, period);
        republish.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return LoopExit::Shutdown,
                _ = republish.tick() => {
                    if let Err(e) = self.publish_self().await {
                        tracing::warn!(error = %e, "Failed to republish descriptor");
                        return LoopExit::Reconnect;
                    }
                    tracing::debug!("Republished descriptor");
                }
                event = events.recv() => match event {
                    Some(BackendEvent::Joined { service_id, data })
                    | Some(BackendEvent::Updated { service_id, data }) => {
                        self.on_join(&service_id, &data).await;
                    }
                    Some(BackendEvent::Left { service_id }) => self.on_leave(service_id).await,
                    Some(BackendEvent::Disconnected) | None => {
                        tracing::warn!("Lost coordination backend session");
                        return LoopExit::Reconnect;
                    }
                },
                Some((service_id, generation)) = expired_rx.recv() => {
                    self.on_leave_expired(service_id, generation).await;
                }
            }
        }
    }

    /// Replace the peer view with a fresh listing. The first listing of a
    /// worker discards any view left from an earlier run and always
    /// recomputes; later ones only when the view actually changed.
    async fn reconcile(&mut self, listed: Vec<MemberDescriptor>) {
        if !self.initialized {
            let fresh: BTreeMap<ServiceId, MemberDescriptor> = listed
                .into_iter()
                .map(|member| (member.service_id.clone(), member))
                .collect();
            *self.shared.peers.write() = fresh;
            self.initialized = true;
            self.recalculate().await;
            return;
        }

        let listed_ids: HashSet<&str> = listed.iter().map(|m| m.service_id.as_str()).collect();
        let gone: Vec<ServiceId> = self
            .shared
            .peers
            .read()
            .keys()
            .filter(|id| !listed_ids.contains(id.as_str()))
            .cloned()
            .collect();
        drop(listed_ids);

        let mut changed = false;
        for service_id in gone {
            if self.shared.config.recalculate_delay.is_zero() {
                let removed = self.shared.peers.write().remove(&service_id).is_some();
                if removed {
                    tracing::info!(service_id = %service_id, "Peer left while disconnected");
                    changed = true;
                }
            } else {
                self.on_leave(service_id).await;
            }
        }
        for member in listed {
            changed |= self.apply_join(member);
        }

        if changed {
            self.recalculate().await;
        }
    }

    async fn on_join(&mut self, service_id: &str, data: &[u8]) {
        if service_id == self.shared.local.service_id() {
            return;
        }
        if let Some(descriptor) = decode(service_id, data) {
            if self.apply_join(descriptor) {
                self.recalculate().await;
            }
        }
    }

    /// Record a joined or updated peer. Returns whether the assignment
    /// inputs changed.
    fn apply_join(&mut self, descriptor: MemberDescriptor) -> bool {
        let service_id = descriptor.service_id.clone();
        if let Some(pending) = self.pending.remove(&service_id) {
            pending.token.cancel();
            self.shared.metrics.debounced_leaves.inc();
            tracing::debug!(service_id = %service_id, "Peer rejoined within debounce window");
        }

        let mut peers = self.shared.peers.write();
        let changed = match peers.get(&service_id) {
            Some(existing) => !existing.same_routing(&descriptor),
            None => {
                tracing::info!(service_id = %service_id, "Peer joined");
                true
            }
        };
        peers.insert(service_id, descriptor);
        changed
    }

    async fn on_leave(&mut self, service_id: ServiceId) {
        let known = self.shared.peers.read().contains_key(&service_id);
        if !known {
            return;
        }

        let delay = self.shared.config.recalculate_delay;
        if delay.is_zero() {
            self.remove_peer(&service_id).await;
            return;
        }
        if self.pending.contains_key(&service_id) {
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let token = self.shutdown.child_token();
        let timer = token.clone();
        let tx = self.expired_tx.clone();
        let id = service_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send((id, generation));
                }
            }
        });

        tracing::debug!(
            service_id = %service_id,
            delay_ms = delay.as_millis() as u64,
            "Peer left, recalculation scheduled"
        );
        self.pending.insert(service_id, PendingLeave { generation, token });
    }

    async fn on_leave_expired(&mut self, service_id: ServiceId, generation: u64) {
        let current = matches!(
            self.pending.get(&service_id),
            Some(pending) if pending.generation == generation
        );
        if current {
            self.pending.remove(&service_id);
            self.remove_peer(&service_id).await;
        }
    }

    async fn remove_peer(&mut self, service_id: &str) {
        let removed = self.shared.peers.write().remove(service_id).is_some();
        if removed {
            tracing::info!(service_id = %service_id, "Peer left");
            self.recalculate().await;
        }
    }

    /// Recompute on the blocking pool; the worker waits for it so
    /// recomputations triggered here never overlap.
    async fn recalculate(&self) {
        let this = self.shared.local.descriptor();
        let peers: Vec<MemberDescriptor> = self.shared.peers.read().values().cloned().collect();
        let recalculator = self.shared.recalculator.clone();
        let task = tokio::task::spawn_blocking(move || recalculator.recalculate(&this, &peers));
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Partition recalculation task failed");
        }
    }
}

fn decode(service_id: &str, data: &[u8]) -> Option<MemberDescriptor> {
    match MemberDescriptor::from_bytes(data) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            tracing::warn!(service_id = %service_id, error = %e, "Ignoring undecodable member descriptor");
            None
        }
    }
}
