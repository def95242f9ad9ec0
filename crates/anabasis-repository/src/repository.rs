//! Event-sourced repository.

use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;

use anabasis_core::aggregate::Aggregate;
use anabasis_core::clock::{Clock, SystemClock};
use anabasis_core::codec::{EventCodec, JsonCodec};
use anabasis_core::connection::ConnectionMonitor;
use anabasis_core::error::DomainError;
use anabasis_core::event::{DomainEvent, EventHeaders};
use anabasis_core::log::{EventData, EventLog, ExpectedVersion, SliceStatus, WriteResult};
use anabasis_core::registry::EventTypeRegistry;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RepositoryConfig;

/// Loads aggregates by replaying their stream and saves them with optimistic
/// concurrency.
///
/// Connectivity is checked at call time: every operation fails fast with
/// `DomainError::NotConnected` while the monitor reports the log as down.
/// Write conflicts are returned to the caller and never retried.
pub struct EventSourcedRepository<A: Aggregate, C: EventCodec = JsonCodec> {
    config: RepositoryConfig,
    monitor: Arc<dyn ConnectionMonitor>,
    registry: Arc<EventTypeRegistry<A::Event, C>>,
    clock: Arc<dyn Clock>,
}

impl<A: Aggregate, C: EventCodec> EventSourcedRepository<A, C> {
    /// Creates a repository using the system clock for commit headers.
    #[must_use]
    pub fn new(
        config: RepositoryConfig,
        monitor: Arc<dyn ConnectionMonitor>,
        registry: Arc<EventTypeRegistry<A::Event, C>>,
    ) -> Self {
        Self {
            config,
            monitor,
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock stamped into commit headers.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn connection(&self) -> Result<Arc<dyn EventLog>, DomainError> {
        if !self.monitor.is_connected() {
            return Err(DomainError::NotConnected);
        }
        self.monitor.connection().ok_or(DomainError::NotConnected)
    }

    /// Loads the aggregate stored under `id`.
    ///
    /// Returns `Ok(None)` if its stream does not exist or has been deleted.
    /// With `load_events`, every replayed event is retained on the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotConnected` while disconnected,
    /// `DomainError::UnsupportedEvent` or `DomainError::Decode` if a recorded
    /// event cannot be decoded, or the log's error.
    pub async fn get_by_id(
        &self,
        id: &<A::Event as DomainEvent>::Key,
        load_events: bool,
    ) -> Result<Option<A>, DomainError> {
        self.replay(&id.to_string(), A::default(), load_events).await
    }

    /// Brings `aggregate` up to date by replaying only the events recorded
    /// after its version, e.g. after restoring it from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the aggregate has no identifier,
    /// otherwise the same errors as [`get_by_id`](Self::get_by_id).
    pub async fn refresh(&self, aggregate: A, load_events: bool) -> Result<Option<A>, DomainError> {
        let stream = stream_of(&aggregate)?;
        self.replay(&stream, aggregate, load_events).await
    }

    async fn replay(
        &self,
        stream: &str,
        mut aggregate: A,
        load_events: bool,
    ) -> Result<Option<A>, DomainError> {
        let log = self.connection()?;
        let page_size = self.config.read_page_size.max(1);
        let mut from = aggregate.version() + 1;

        loop {
            let slice = log.read_stream_forward(stream, from, page_size).await?;
            match slice.status {
                SliceStatus::Success => {}
                SliceStatus::StreamNotFound | SliceStatus::StreamDeleted => {
                    debug!(stream, status = ?slice.status, "no aggregate to load");
                    return Ok(None);
                }
            }

            for recorded in &slice.events {
                if recorded.sequence_number != aggregate.version() + 1 {
                    return Err(DomainError::Infrastructure(format!(
                        "event {} on stream {stream} does not follow version {}",
                        recorded.sequence_number,
                        aggregate.version()
                    )));
                }
                let event = self.registry.decode(recorded)?;
                aggregate.apply_recorded(event, recorded.sequence_number, load_events);
            }
            debug!(stream, from, read = slice.events.len(), "replayed page");

            if slice.is_end_of_stream {
                break;
            }
            from = slice.next_sequence_number;
        }

        Ok(Some(aggregate))
    }

    /// Persists the aggregate's uncommitted events, expecting its stream to
    /// still be at the version they were applied on top of.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another writer advanced
    /// the stream, `DomainError::NotConnected` while disconnected, or the
    /// log's error. On error the uncommitted events are left in place.
    pub async fn save(&self, aggregate: &mut A) -> Result<(), DomainError> {
        self.save_with_headers(aggregate, BTreeMap::new()).await
    }

    /// [`save`](Self::save) with extra commit headers.
    ///
    /// # Errors
    ///
    /// Same as [`save`](Self::save).
    pub async fn save_with_headers(
        &self,
        aggregate: &mut A,
        extra: BTreeMap<String, String>,
    ) -> Result<(), DomainError> {
        let log = self.connection()?;
        if aggregate.uncommitted_events().is_empty() {
            return Ok(());
        }

        let stream = stream_of(aggregate)?;
        let expected = ExpectedVersion::from_version(aggregate.committed_version());
        let commit_id = Uuid::new_v4();
        let events = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| self.to_event_data(event, commit_id, type_name::<A>(), &extra))
            .collect::<Result<Vec<_>, _>>()?;
        let count = events.len();

        let result = self
            .write_batch(log.as_ref(), &stream, expected, events)
            .await
            .inspect_err(|err| {
                if err.is_concurrency_conflict() {
                    warn!(stream, %expected, "rejected stale write");
                }
            })?;

        aggregate.mark_committed(result.next_expected_version);
        info!(
            stream,
            %commit_id,
            events = count,
            version = result.next_expected_version,
            "saved aggregate"
        );
        Ok(())
    }

    /// Applies `event` to `aggregate` and saves it.
    ///
    /// # Errors
    ///
    /// Same as [`save`](Self::save); the event stays uncommitted on failure.
    pub async fn apply(&self, aggregate: &mut A, event: A::Event) -> Result<(), DomainError> {
        aggregate.record(event);
        self.save(aggregate).await
    }

    /// Writes a standalone event to its own stream without a version check.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotConnected` while disconnected, or the log's error.
    pub async fn emit<E: DomainEvent>(&self, event: &E) -> Result<WriteResult, DomainError> {
        self.emit_with_headers(event, BTreeMap::new()).await
    }

    /// [`emit`](Self::emit) with extra commit headers.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit).
    pub async fn emit_with_headers<E: DomainEvent>(
        &self,
        event: &E,
        extra: BTreeMap<String, String>,
    ) -> Result<WriteResult, DomainError> {
        let log = self.connection()?;
        let stream = event.stream_name();
        let commit_id = Uuid::new_v4();
        let data = self.to_event_data(event, commit_id, type_name::<E>(), &extra)?;

        let result = log
            .append_to_stream(&stream, ExpectedVersion::Any, vec![data])
            .await?;
        debug!(stream, event_type = event.event_type(), "emitted event");
        Ok(result)
    }

    async fn write_batch(
        &self,
        log: &dyn EventLog,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult, DomainError> {
        let page_size = self.config.write_page_size.max(1);
        if events.len() <= page_size {
            return log.append_to_stream(stream, expected, events).await;
        }

        debug!(stream, events = events.len(), page_size, "writing batch in a transaction");
        let mut transaction = log.start_transaction(stream, expected).await?;
        let mut remaining = events.into_iter().peekable();
        while remaining.peek().is_some() {
            let page: Vec<EventData> = remaining.by_ref().take(page_size).collect();
            transaction.write(page).await?;
        }
        transaction.commit().await
    }

    fn to_event_data<E: DomainEvent>(
        &self,
        event: &E,
        commit_id: Uuid,
        aggregate_type: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<EventData, DomainError> {
        let headers = EventHeaders {
            commit_id,
            aggregate_type: aggregate_type.to_owned(),
            user_identity: self.config.identity.clone(),
            server_name: self.config.server_name.clone(),
            server_clock: self.clock.now(),
            event_type: self
                .registry
                .payload_type(event.event_type())
                .unwrap_or_else(type_name::<E>)
                .to_owned(),
            extra: extra.clone(),
        };
        let codec = self.registry.codec();

        Ok(EventData {
            event_id: Uuid::new_v4(),
            event_type: event.event_type().to_owned(),
            data: codec.encode(event)?,
            metadata: codec.encode(&headers)?,
        })
    }
}

fn stream_of<A: Aggregate>(aggregate: &A) -> Result<String, DomainError> {
    aggregate
        .aggregate_id()
        .map(ToString::to_string)
        .ok_or_else(|| DomainError::Validation("aggregate has no identifier".into()))
}

impl<A: Aggregate, C: EventCodec> std::fmt::Debug for EventSourcedRepository<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcedRepository")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
