//! Catchup cache.
//!
//! A supervisor task follows the connection monitor. Each time the log comes
//! up it opens a subscription and hands it to a consumer task, which owns the
//! catching-up set for that session. Events delivered before the log reports
//! the backlog as replayed land in the catching-up set; the rest are applied
//! straight to the live set. Only the consumer of the current session ever
//! writes, so every mutation is serialized.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anabasis_core::aggregate::{Aggregate, NO_VERSION};
use anabasis_core::codec::{EventCodec, JsonCodec};
use anabasis_core::connection::ConnectionMonitor;
use anabasis_core::error::DomainError;
use anabasis_core::event::DomainEvent;
use anabasis_core::log::{
    RecordedEvent, Subscription, SubscriptionMessage, SubscriptionStart, SubscriptionTarget,
};
use anabasis_core::registry::EventTypeRegistry;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::config::{CacheSource, CatchupCacheConfig};
use crate::status::{CacheChange, CacheStatus};

const CHANGE_CAPACITY: usize = 1024;

type Key<A> = <<A as Aggregate>::Event as DomainEvent>::Key;

/// Aggregates restored from elsewhere, e.g. a snapshot store, that a
/// single-stream cache starts from.
#[derive(Debug, Clone)]
pub struct CacheSeed<A> {
    /// Aggregates placed in the live set before the first connect.
    pub aggregates: Vec<A>,
    /// Sequence number of the last event the aggregates reflect.
    pub sequence_number: i64,
}

/// How a finished catch-up is folded into the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMode {
    /// The replay covered the whole log: it replaces the live set.
    Rebuild,
    /// The replay resumed after a checkpoint: it is upserted into the live set.
    Resume,
}

#[derive(Debug)]
enum SessionEnd {
    Dropped(String),
    Faulted(DomainError),
    Superseded,
}

/// A continuously updated, keyed projection of the aggregates in the log.
///
/// Readers get clones of the live set and never block the writer for longer
/// than one upsert. Connectivity loss never raises an error: it marks the
/// cache stale and keeps serving the last known state.
pub struct CatchupCache<A: Aggregate, C: EventCodec = JsonCodec> {
    shared: Arc<Shared<A, C>>,
    shutdown: watch::Sender<bool>,
}

struct Shared<A: Aggregate, C: EventCodec> {
    config: CatchupCacheConfig,
    source: CacheSource,
    registry: Arc<EventTypeRegistry<A::Event, C>>,
    live: RwLock<HashMap<Key<A>, A>>,
    status: watch::Sender<CacheStatus>,
    changes: broadcast::Sender<CacheChange<Key<A>>>,
    checkpoint: AtomicI64,
    session: AtomicU64,
    disposed: AtomicBool,
}

impl<A: Aggregate, C: EventCodec> CatchupCache<A, C> {
    /// Creates a cache over `source` and starts following `monitor`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(
        config: CatchupCacheConfig,
        source: CacheSource,
        monitor: Arc<dyn ConnectionMonitor>,
        registry: Arc<EventTypeRegistry<A::Event, C>>,
    ) -> Self {
        Self::spawn(config, source, monitor, registry, HashMap::new(), NO_VERSION)
    }

    /// Creates a single-stream cache whose live set starts from `seed`;
    /// tailing resumes after the seed's sequence number.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start_seeded(
        config: CatchupCacheConfig,
        stream: impl Into<String>,
        monitor: Arc<dyn ConnectionMonitor>,
        registry: Arc<EventTypeRegistry<A::Event, C>>,
        seed: CacheSeed<A>,
    ) -> Self {
        let mut live = HashMap::with_capacity(seed.aggregates.len());
        for aggregate in seed.aggregates {
            match aggregate.aggregate_id() {
                Some(key) => {
                    live.insert(key.clone(), aggregate);
                }
                None => warn!("ignoring seed aggregate without identifier"),
            }
        }
        Self::spawn(
            config,
            CacheSource::Stream(stream.into()),
            monitor,
            registry,
            live,
            seed.sequence_number,
        )
    }

    fn spawn(
        config: CatchupCacheConfig,
        source: CacheSource,
        monitor: Arc<dyn ConnectionMonitor>,
        registry: Arc<EventTypeRegistry<A::Event, C>>,
        live: HashMap<Key<A>, A>,
        checkpoint: i64,
    ) -> Self {
        let (status, _) = watch::channel(CacheStatus::default());
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            config,
            source,
            registry,
            live: RwLock::new(live),
            status,
            changes,
            checkpoint: AtomicI64::new(checkpoint),
            session: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        });

        tokio::spawn(supervise(Arc::clone(&shared), monitor, shutdown_rx));
        Self { shared, shutdown }
    }

    /// Returns a clone of the live aggregate stored under `key`.
    #[must_use]
    pub fn get(&self, key: &Key<A>) -> Option<A> {
        self.shared.read_live().get(key).cloned()
    }

    /// Returns a clone of every live aggregate.
    #[must_use]
    pub fn items(&self) -> Vec<A> {
        self.shared.read_live().values().cloned().collect()
    }

    /// Returns the keys of the live set.
    #[must_use]
    pub fn keys(&self) -> Vec<Key<A>> {
        self.shared.read_live().keys().cloned().collect()
    }

    /// Number of live aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.read_live().len()
    }

    /// `true` if the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.read_live().is_empty()
    }

    /// `true` once the backlog of the current session has been replayed.
    #[must_use]
    pub fn is_caught_up(&self) -> bool {
        self.shared.status.borrow().is_caught_up
    }

    /// `true` while the live set may be behind the log.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.shared.status.borrow().is_stale
    }

    /// The error that stopped the cache, if any.
    #[must_use]
    pub fn fault(&self) -> Option<Arc<DomainError>> {
        self.shared.status.borrow().fault.clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that observes every status transition.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<CacheStatus> {
        self.shared.status.subscribe()
    }

    /// Receiver of live-set changes made from now on.
    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<CacheChange<Key<A>>> {
        self.shared.changes.subscribe()
    }

    /// Waits until the cache is caught up and not stale.
    ///
    /// # Errors
    ///
    /// Returns the cache fault if the cache stops on an undecodable event
    /// before catching up.
    pub async fn wait_until_caught_up(&self) -> Result<(), Arc<DomainError>> {
        let mut status = self.shared.status.subscribe();
        let reached = status
            .wait_for(|status| status.is_current() || status.fault.is_some())
            .await
            .map_err(|_| Arc::new(DomainError::Infrastructure("cache status closed".into())))?;
        match &reached.fault {
            Some(fault) => Err(Arc::clone(fault)),
            None => Ok(()),
        }
    }

    /// Stops the cache. No event is applied once this returns; the live set
    /// stays readable. Calling it again has no effect.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.session.fetch_add(1, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        debug!(source = ?self.shared.source, "cache disposed");
    }
}

impl<A: Aggregate, C: EventCodec> Drop for CatchupCache<A, C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<A: Aggregate, C: EventCodec> std::fmt::Debug for CatchupCache<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchupCache")
            .field("source", &self.shared.source)
            .field("status", &*self.shared.status.borrow())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<A: Aggregate, C: EventCodec> Shared<A, C> {
    fn read_live(&self) -> RwLockReadGuard<'_, HashMap<Key<A>, A>> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_live(&self) -> RwLockWriteGuard<'_, HashMap<Key<A>, A>> {
        self.live.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }

    fn mode(&self) -> MergeMode {
        match self.source {
            CacheSource::AllStreams => MergeMode::Rebuild,
            CacheSource::Stream(_) => MergeMode::Resume,
        }
    }

    async fn connect(
        self: &Arc<Self>,
        monitor: &dyn ConnectionMonitor,
    ) -> Result<JoinHandle<SessionEnd>, DomainError> {
        let log = monitor.connection().ok_or(DomainError::NotConnected)?;
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        if self.disposed.load(Ordering::SeqCst) {
            return Err(DomainError::Infrastructure("cache disposed".into()));
        }
        self.status.send_modify(|status| {
            status.is_connected = true;
            status.is_caught_up = false;
            status.is_stale = true;
            status.fault = None;
        });

        let (target, start) = match &self.source {
            CacheSource::AllStreams => (SubscriptionTarget::AllStreams, SubscriptionStart::Beginning),
            CacheSource::Stream(name) => {
                // Read under the lock so a write of the previous session is
                // either fully visible or rejected.
                let checkpoint = {
                    let _live = self.read_live();
                    self.checkpoint.load(Ordering::SeqCst)
                };
                (
                    SubscriptionTarget::Stream(name.clone()),
                    SubscriptionStart::resume_after((checkpoint > NO_VERSION).then_some(checkpoint)),
                )
            }
        };
        let subscription = log.subscribe(target, start).await?;
        info!(source = ?self.source, ?start, "cache subscribed");

        Ok(tokio::spawn(consume(Arc::clone(self), subscription, session)))
    }

    /// Watchers are only woken when the cache turns stale; an already stale
    /// cache just records the lost connection.
    fn mark_disconnected(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        let turned_stale = self.status.send_if_modified(|status| {
            let was_stale = status.is_stale;
            status.is_connected = false;
            status.is_stale = true;
            !was_stale
        });
        if turned_stale {
            warn!(source = ?self.source, "connection lost, cache is stale");
        }
    }

    fn mark_stale(&self) {
        self.status.send_if_modified(|status| {
            let changed = !status.is_stale;
            status.is_stale = true;
            changed
        });
    }

    fn mark_faulted(&self, fault: DomainError) {
        error!(source = ?self.source, error = %fault, "cache stopped on an event it cannot apply");
        self.status.send_modify(|status| {
            status.is_stale = true;
            status.fault = Some(Arc::new(fault));
        });
    }

    fn decode(&self, recorded: &RecordedEvent) -> Result<Option<A::Event>, DomainError> {
        if !self.registry.can_apply(&recorded.event_type) {
            trace!(
                stream = %recorded.stream_id,
                event_type = %recorded.event_type,
                "ignoring event type without decoder"
            );
            return Ok(None);
        }
        self.registry.decode(recorded).map(Some)
    }

    fn apply_catching_up(
        &self,
        catching_up: &mut HashMap<Key<A>, A>,
        event: A::Event,
        sequence_number: i64,
    ) {
        let entry = match catching_up.entry(event.entity_id().clone()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let known = match self.mode() {
                    MergeMode::Resume => self.read_live().get(vacant.key()).cloned(),
                    MergeMode::Rebuild => None,
                };
                vacant.insert(known.unwrap_or_default())
            }
        };
        project(entry, event, sequence_number, self.config.keep_applied_events);
    }

    /// Applies a live event and advances the checkpoint past it. Returns
    /// `false`, touching nothing, once `session` has been superseded.
    fn apply_live(&self, event: Option<A::Event>, sequence_number: i64, session: u64) -> bool {
        let change = {
            let mut live = self.write_live();
            if !self.is_current(session) {
                return false;
            }
            self.checkpoint.fetch_max(sequence_number, Ordering::SeqCst);
            event.and_then(|event| {
                let key = event.entity_id().clone();
                let entry = live.entry(key.clone()).or_default();
                project(entry, event, sequence_number, self.config.keep_applied_events)
                    .then(|| CacheChange {
                        key,
                        version: entry.version(),
                    })
            })
        };
        if let Some(change) = change {
            let _ = self.changes.send(change);
        }
        true
    }

    fn merge(
        &self,
        catching_up: &mut HashMap<Key<A>, A>,
        replayed_to: Option<i64>,
        session: u64,
    ) -> bool {
        let changes: Vec<CacheChange<Key<A>>> = catching_up
            .iter()
            .map(|(key, aggregate)| CacheChange {
                key: key.clone(),
                version: aggregate.version(),
            })
            .collect();
        {
            let mut live = self.write_live();
            if !self.is_current(session) {
                return false;
            }
            match self.mode() {
                MergeMode::Rebuild => *live = std::mem::take(catching_up),
                MergeMode::Resume => live.extend(catching_up.drain()),
            }
            if let Some(sequence_number) = replayed_to {
                self.checkpoint.fetch_max(sequence_number, Ordering::SeqCst);
            }
        }

        let merged = self.status.send_if_modified(|status| {
            if !self.is_current(session) {
                return false;
            }
            status.is_caught_up = true;
            status.is_stale = false;
            true
        });
        if merged {
            info!(source = ?self.source, aggregates = changes.len(), "cache caught up");
            for change in changes {
                let _ = self.changes.send(change);
            }
        }
        merged
    }
}

/// Applies `event` unless `aggregate` is already at or past its sequence number.
fn project<A: Aggregate>(
    aggregate: &mut A,
    event: A::Event,
    sequence_number: i64,
    keep_applied: bool,
) -> bool {
    if sequence_number <= aggregate.version() {
        trace!(sequence_number, "skipping redelivered event");
        return false;
    }
    aggregate.apply_recorded(event, sequence_number, keep_applied);
    true
}

async fn consume<A: Aggregate, C: EventCodec>(
    shared: Arc<Shared<A, C>>,
    mut subscription: Subscription,
    session: u64,
) -> SessionEnd {
    let mut catching_up: HashMap<Key<A>, A> = HashMap::new();
    let mut caught_up = false;
    let mut replayed_to = None;

    while let Some(message) = subscription.next().await {
        if !shared.is_current(session) {
            subscription.stop();
            return SessionEnd::Superseded;
        }

        match message {
            SubscriptionMessage::Event(recorded) => {
                let event = match shared.decode(&recorded) {
                    Ok(event) => event,
                    Err(err) => {
                        subscription.stop();
                        return SessionEnd::Faulted(err);
                    }
                };
                if caught_up {
                    if !shared.apply_live(event, recorded.sequence_number, session) {
                        subscription.stop();
                        return SessionEnd::Superseded;
                    }
                } else {
                    if let Some(event) = event {
                        shared.apply_catching_up(&mut catching_up, event, recorded.sequence_number);
                    }
                    replayed_to = Some(recorded.sequence_number);
                }
            }
            SubscriptionMessage::CaughtUp => {
                if !shared.merge(&mut catching_up, replayed_to.take(), session) {
                    subscription.stop();
                    return SessionEnd::Superseded;
                }
                caught_up = true;
            }
            SubscriptionMessage::Dropped(reason) => return SessionEnd::Dropped(reason),
        }
    }
    SessionEnd::Dropped("subscription closed by the log".into())
}

async fn supervise<A: Aggregate, C: EventCodec>(
    shared: Arc<Shared<A, C>>,
    monitor: Arc<dyn ConnectionMonitor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connection = monitor.watch_connection();
    let mut session = None;
    let mut retry_at = None;

    if *connection.borrow_and_update() {
        (session, retry_at) = start_session(&shared, monitor.as_ref()).await;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    warn!(source = ?shared.source, "connection monitor closed, cache stops");
                    shared.mark_disconnected();
                    break;
                }
                stop_session(&mut session);
                retry_at = None;
                if *connection.borrow_and_update() {
                    (session, retry_at) = start_session(&shared, monitor.as_ref()).await;
                } else {
                    shared.mark_disconnected();
                }
            }
            ended = join_session(&mut session) => {
                session = None;
                match ended {
                    SessionEnd::Dropped(reason) => {
                        warn!(source = ?shared.source, %reason, "subscription dropped, resubscribing");
                        shared.mark_stale();
                        retry_at = Some(Instant::now() + shared.config.resubscribe_delay());
                    }
                    SessionEnd::Faulted(fault) => shared.mark_faulted(fault),
                    SessionEnd::Superseded => {}
                }
            }
            () = wait_until(retry_at) => {
                retry_at = None;
                if *connection.borrow() {
                    (session, retry_at) = start_session(&shared, monitor.as_ref()).await;
                }
            }
        }
    }

    stop_session(&mut session);
    debug!(source = ?shared.source, "cache supervisor stopped");
}

async fn start_session<A: Aggregate, C: EventCodec>(
    shared: &Arc<Shared<A, C>>,
    monitor: &dyn ConnectionMonitor,
) -> (Option<JoinHandle<SessionEnd>>, Option<Instant>) {
    match shared.connect(monitor).await {
        Ok(handle) => (Some(handle), None),
        Err(err) => {
            warn!(source = ?shared.source, error = %err, "cache could not subscribe, retrying");
            shared.mark_stale();
            (None, Some(Instant::now() + shared.config.resubscribe_delay()))
        }
    }
}

fn stop_session(session: &mut Option<JoinHandle<SessionEnd>>) {
    if let Some(handle) = session.take() {
        handle.abort();
    }
}

async fn join_session(session: &mut Option<JoinHandle<SessionEnd>>) -> SessionEnd {
    match session {
        Some(handle) => handle.await.unwrap_or_else(|err| {
            SessionEnd::Faulted(DomainError::Infrastructure(format!(
                "cache session ended abnormally: {err}"
            )))
        }),
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
