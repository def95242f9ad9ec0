//! `PostgreSQL` implementation of the `EventLog` trait.

use anabasis_core::aggregate::NO_VERSION;
use anabasis_core::error::DomainError;
use anabasis_core::log::{
    EventData, EventLog, ExpectedVersion, LogTransaction, RecordedEvent, SliceStatus,
    StreamSlice, Subscription, SubscriptionFeed, SubscriptionMessage, SubscriptionStart,
    SubscriptionTarget, WriteResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PgEventLogConfig;
use crate::schema::{CREATE_EVENT_LOG, WRITER_LOCK_KEY};

const FEED_CAPACITY: usize = 256;

const SELECT_EVENTS: &str = "SELECT position, stream_id, sequence_number, event_id, event_type, \
     data, metadata, created_at FROM event_log";

#[derive(Debug, FromRow)]
struct EventRow {
    position: i64,
    stream_id: String,
    sequence_number: i64,
    event_id: Uuid,
    event_type: String,
    data: Vec<u8>,
    metadata: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for RecordedEvent {
    fn from(row: EventRow) -> Self {
        Self {
            stream_id: row.stream_id,
            event_id: row.event_id,
            event_type: row.event_type,
            sequence_number: row.sequence_number,
            position: row.position,
            data: row.data,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

fn limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed event log.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
    config: PgEventLogConfig,
}

impl PgEventLog {
    /// Creates a new `PgEventLog`.
    #[must_use]
    pub fn new(pool: PgPool, config: PgEventLogConfig) -> Self {
        Self { pool, config }
    }

    /// Creates the log tables if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(CREATE_EVENT_LOG)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(())
    }

    /// Marks `stream` as deleted. Its events are kept but no longer readable,
    /// and further writes fail with `DomainError::StreamDeleted`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on database failure.
    pub async fn delete_stream(&self, stream: &str) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO streams (stream_id, deleted) VALUES ($1, TRUE) \
             ON CONFLICT (stream_id) DO UPDATE SET deleted = TRUE",
        )
        .bind(stream)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        debug!(stream, "stream deleted");
        Ok(())
    }

    async fn begin_write(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<PgLogTransaction, DomainError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        let version = lock_stream(&mut tx, stream).await?;
        if !expected.matches(version) {
            return Err(DomainError::ConcurrencyConflict {
                stream: stream.to_owned(),
                expected,
                actual: version,
            });
        }
        Ok(PgLogTransaction {
            tx,
            stream: stream.to_owned(),
            version,
            position: -1,
        })
    }
}

/// Takes the writer lock and returns the current version of `stream`.
async fn lock_stream(conn: &mut PgConnection, stream: &str) -> Result<i64, DomainError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(WRITER_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .map_err(infrastructure)?;

    let state: Option<(i64, bool)> =
        sqlx::query_as("SELECT version, deleted FROM streams WHERE stream_id = $1")
            .bind(stream)
            .fetch_optional(&mut *conn)
            .await
            .map_err(infrastructure)?;
    match state {
        Some((_, true)) => Err(DomainError::StreamDeleted(stream.to_owned())),
        Some((version, false)) => Ok(version),
        None => Ok(NO_VERSION),
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult, DomainError> {
        let mut transaction = self.begin_write(stream, expected).await?;
        transaction.write(events).await?;
        Box::new(transaction).commit().await
    }

    async fn start_transaction(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<Box<dyn LogTransaction>, DomainError> {
        Ok(Box::new(self.begin_write(stream, expected).await?))
    }

    async fn read_stream_forward(
        &self,
        stream: &str,
        from: i64,
        max_count: usize,
    ) -> Result<StreamSlice, DomainError> {
        let state: Option<(i64, bool)> =
            sqlx::query_as("SELECT version, deleted FROM streams WHERE stream_id = $1")
                .bind(stream)
                .fetch_optional(&self.pool)
                .await
                .map_err(infrastructure)?;
        let version = match state {
            None => return Ok(StreamSlice::unavailable(SliceStatus::StreamNotFound, from)),
            Some((_, true)) => return Ok(StreamSlice::unavailable(SliceStatus::StreamDeleted, from)),
            Some((version, false)) => version,
        };

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "{SELECT_EVENTS} WHERE stream_id = $1 AND sequence_number >= $2 \
             ORDER BY sequence_number LIMIT $3"
        ))
        .bind(stream)
        .bind(from)
        .bind(limit(max_count))
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        let events: Vec<RecordedEvent> = rows.into_iter().map(RecordedEvent::from).collect();
        let next_sequence_number = events
            .last()
            .map_or(from, |event| event.sequence_number + 1);
        Ok(StreamSlice {
            status: SliceStatus::Success,
            is_end_of_stream: next_sequence_number > version,
            next_sequence_number,
            events,
        })
    }

    async fn subscribe(
        &self,
        target: SubscriptionTarget,
        start: SubscriptionStart,
    ) -> Result<Subscription, DomainError> {
        let (feed, subscription) = Subscription::channel(FEED_CAPACITY);
        tokio::spawn(poll(
            self.pool.clone(),
            self.config.clone(),
            feed,
            target,
            start,
        ));
        Ok(subscription)
    }
}

async fn fetch_after(
    pool: &PgPool,
    target: &SubscriptionTarget,
    checkpoint: i64,
    batch_size: usize,
) -> Result<Vec<RecordedEvent>, sqlx::Error> {
    let rows: Vec<EventRow> = match target {
        SubscriptionTarget::AllStreams => {
            sqlx::query_as(&format!(
                "{SELECT_EVENTS} WHERE position > $1 ORDER BY position LIMIT $2"
            ))
            .bind(checkpoint)
            .bind(limit(batch_size))
            .fetch_all(pool)
            .await?
        }
        SubscriptionTarget::Stream(stream) => {
            sqlx::query_as(&format!(
                "{SELECT_EVENTS} WHERE stream_id = $1 AND sequence_number > $2 \
                 ORDER BY sequence_number LIMIT $3"
            ))
            .bind(stream)
            .bind(checkpoint)
            .bind(limit(batch_size))
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.into_iter().map(RecordedEvent::from).collect())
}

/// Feeds a catch-up subscription by polling past its checkpoint.
async fn poll(
    pool: PgPool,
    config: PgEventLogConfig,
    feed: SubscriptionFeed,
    target: SubscriptionTarget,
    start: SubscriptionStart,
) {
    let batch_size = config.read_batch_size.max(1);
    let mut checkpoint = match start {
        SubscriptionStart::Beginning => NO_VERSION,
        SubscriptionStart::After(checkpoint) => checkpoint,
    };
    let mut caught_up = false;

    loop {
        let batch = tokio::select! {
            () = feed.closed() => return,
            batch = fetch_after(&pool, &target, checkpoint, batch_size) => batch,
        };
        let events = match batch {
            Ok(events) => events,
            Err(err) => {
                warn!(?target, error = %err, "subscription poll failed");
                feed.send(SubscriptionMessage::Dropped(err.to_string())).await;
                return;
            }
        };

        let exhausted = events.len() < batch_size;
        for event in events {
            checkpoint = match target {
                SubscriptionTarget::AllStreams => event.position,
                SubscriptionTarget::Stream(_) => event.sequence_number,
            };
            if !feed.send(SubscriptionMessage::Event(event)).await {
                return;
            }
        }
        if !exhausted {
            continue;
        }

        if !caught_up {
            if !feed.send(SubscriptionMessage::CaughtUp).await {
                return;
            }
            caught_up = true;
        }
        tokio::select! {
            () = feed.closed() => return,
            () = tokio::time::sleep(config.poll_interval()) => {}
        }
    }
}

/// A write holding the writer lock until it commits or is dropped.
struct PgLogTransaction {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
    stream: String,
    version: i64,
    position: i64,
}

#[async_trait]
impl LogTransaction for PgLogTransaction {
    async fn write(&mut self, events: Vec<EventData>) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        sqlx::query("INSERT INTO streams (stream_id) VALUES ($1) ON CONFLICT (stream_id) DO NOTHING")
            .bind(&self.stream)
            .execute(&mut *self.tx)
            .await
            .map_err(infrastructure)?;

        for event in events {
            let sequence_number = self.version + 1;
            self.position = sqlx::query_scalar(
                "INSERT INTO event_log \
                 (stream_id, sequence_number, event_id, event_type, data, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING position",
            )
            .bind(&self.stream)
            .bind(sequence_number)
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(&event.metadata)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(infrastructure)?;
            self.version = sequence_number;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<WriteResult, DomainError> {
        let Self {
            mut tx,
            stream,
            version,
            position,
        } = *self;
        sqlx::query("UPDATE streams SET version = $2 WHERE stream_id = $1")
            .bind(&stream)
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;
        tx.commit().await.map_err(infrastructure)?;
        debug!(stream, version, position, "committed write");

        Ok(WriteResult {
            next_expected_version: version,
            position,
        })
    }
}
