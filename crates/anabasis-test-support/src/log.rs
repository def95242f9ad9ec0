//! In-memory `EventLog` with fault injection and call counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anabasis_core::error::DomainError;
use anabasis_core::log::{
    EventData, EventLog, ExpectedVersion, LogTransaction, RecordedEvent, SliceStatus,
    StreamSlice, Subscription, SubscriptionFeed, SubscriptionMessage, SubscriptionStart,
    SubscriptionTarget, WriteResult,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

const LIVE_CAPACITY: usize = 1024;
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct StreamState {
    events: Vec<RecordedEvent>,
    deleted: bool,
}

impl StreamState {
    #[allow(clippy::cast_possible_wrap)]
    fn version(&self) -> i64 {
        self.events.len() as i64 - 1
    }
}

#[derive(Debug, Default)]
struct LogState {
    streams: HashMap<String, StreamState>,
    all: Vec<RecordedEvent>,
    fail_transaction_write: Option<usize>,
    append_calls: usize,
    transaction_writes: usize,
    committed_transactions: usize,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<LogState>,
    live: broadcast::Sender<RecordedEvent>,
    generation: watch::Sender<u64>,
}

/// A complete in-process event log.
///
/// Appends are atomic under one lock, transactions buffer their pages until
/// commit, and subscriptions replay the backlog before switching to live
/// events without a gap.
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    inner: Arc<Inner>,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LogState::default()),
                live,
                generation,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.inner.state.lock().unwrap()
    }

    /// Makes the `nth` (1-based) page written by every later transaction fail.
    pub fn fail_transaction_write(&self, nth: usize) {
        self.state().fail_transaction_write = Some(nth);
    }

    /// Marks `stream` as deleted. Reads report `StreamDeleted`, writes fail.
    pub fn delete_stream(&self, stream: &str) {
        self.state()
            .streams
            .entry(stream.to_owned())
            .or_default()
            .deleted = true;
    }

    /// Ends every open subscription with a `Dropped` message.
    pub fn drop_subscriptions(&self) {
        self.inner.generation.send_modify(|generation| *generation += 1);
    }

    /// Appends a raw JSON payload without a concurrency check.
    ///
    /// # Panics
    ///
    /// Panics if the stream has been deleted.
    pub fn append_json(&self, stream: &str, event_type: &str, payload: &serde_json::Value) -> WriteResult {
        let data = EventData {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            data: serde_json::to_vec(payload).unwrap(),
            metadata: Vec::new(),
        };
        self.append_locked(&mut self.state(), stream, ExpectedVersion::Any, vec![data])
            .unwrap()
    }

    /// Returns every event of `stream`, ignoring deletion.
    #[must_use]
    pub fn stream_events(&self, stream: &str) -> Vec<RecordedEvent> {
        self.state()
            .streams
            .get(stream)
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    /// Number of `append_to_stream` calls received.
    #[must_use]
    pub fn append_calls(&self) -> usize {
        self.state().append_calls
    }

    /// Number of transaction pages written, committed or not.
    #[must_use]
    pub fn transaction_writes(&self) -> usize {
        self.state().transaction_writes
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn committed_transactions(&self) -> usize {
        self.state().committed_transactions
    }

    #[allow(clippy::cast_possible_wrap)]
    fn append_locked(
        &self,
        state: &mut LogState,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult, DomainError> {
        let current = check_expected(state, stream, expected)?;

        let LogState { streams, all, .. } = state;
        let target = streams.entry(stream.to_owned()).or_default();
        let mut position = all.len() as i64 - 1;
        for data in events {
            position = all.len() as i64;
            let recorded = RecordedEvent {
                stream_id: stream.to_owned(),
                event_id: data.event_id,
                event_type: data.event_type,
                sequence_number: target.version() + 1,
                position,
                data: data.data,
                metadata: data.metadata,
                created_at: Utc::now(),
            };
            target.events.push(recorded.clone());
            all.push(recorded.clone());
            let _ = self.inner.live.send(recorded);
        }

        let next_expected_version = target.version().max(current);
        Ok(WriteResult {
            next_expected_version,
            position,
        })
    }
}

fn check_expected(
    state: &LogState,
    stream: &str,
    expected: ExpectedVersion,
) -> Result<i64, DomainError> {
    let existing = state.streams.get(stream);
    if existing.is_some_and(|s| s.deleted) {
        return Err(DomainError::StreamDeleted(stream.to_owned()));
    }
    let current = existing.map_or(-1, StreamState::version);
    if !expected.matches(current) {
        return Err(DomainError::ConcurrencyConflict {
            stream: stream.to_owned(),
            expected,
            actual: current,
        });
    }
    Ok(current)
}

fn is_after(target: &SubscriptionTarget, start: SubscriptionStart, event: &RecordedEvent) -> bool {
    let checkpoint = match start {
        SubscriptionStart::Beginning => -1,
        SubscriptionStart::After(checkpoint) => checkpoint,
    };
    match target {
        SubscriptionTarget::AllStreams => event.position > checkpoint,
        SubscriptionTarget::Stream(name) => {
            event.stream_id == *name && event.sequence_number > checkpoint
        }
    }
}

async fn run_subscription(
    feed: SubscriptionFeed,
    target: SubscriptionTarget,
    start: SubscriptionStart,
    backlog: Vec<RecordedEvent>,
    mut live: broadcast::Receiver<RecordedEvent>,
    mut generation: watch::Receiver<u64>,
) {
    for event in backlog {
        if !feed.send(SubscriptionMessage::Event(event)).await {
            return;
        }
    }
    if !feed.send(SubscriptionMessage::CaughtUp).await {
        return;
    }

    loop {
        tokio::select! {
            () = feed.closed() => return,
            _ = generation.changed() => {
                feed.send(SubscriptionMessage::Dropped("subscription dropped by log".into())).await;
                return;
            }
            received = live.recv() => match received {
                Ok(event) => {
                    if is_after(&target, start, &event)
                        && !feed.send(SubscriptionMessage::Event(event)).await
                    {
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    feed.send(SubscriptionMessage::Dropped(format!(
                        "subscriber lagged behind by {skipped} events"
                    )))
                    .await;
                    return;
                }
                Err(RecvError::Closed) => return,
            },
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<WriteResult, DomainError> {
        let mut state = self.state();
        state.append_calls += 1;
        self.append_locked(&mut state, stream, expected, events)
    }

    async fn start_transaction(
        &self,
        stream: &str,
        expected: ExpectedVersion,
    ) -> Result<Box<dyn LogTransaction>, DomainError> {
        check_expected(&self.state(), stream, expected)?;
        Ok(Box::new(InMemoryTransaction {
            log: self.clone(),
            stream: stream.to_owned(),
            expected,
            pages_written: 0,
            buffered: Vec::new(),
        }))
    }

    async fn read_stream_forward(
        &self,
        stream: &str,
        from: i64,
        max_count: usize,
    ) -> Result<StreamSlice, DomainError> {
        let state = self.state();
        let Some(existing) = state.streams.get(stream) else {
            return Ok(StreamSlice::unavailable(SliceStatus::StreamNotFound, from));
        };
        if existing.deleted {
            return Ok(StreamSlice::unavailable(SliceStatus::StreamDeleted, from));
        }

        let start = usize::try_from(from.max(0)).unwrap_or(usize::MAX);
        let events: Vec<RecordedEvent> = existing
            .events
            .iter()
            .skip(start)
            .take(max_count)
            .cloned()
            .collect();
        let next_sequence_number = events
            .last()
            .map_or(from, |event| event.sequence_number + 1);

        Ok(StreamSlice {
            status: SliceStatus::Success,
            is_end_of_stream: next_sequence_number > existing.version(),
            next_sequence_number,
            events,
        })
    }

    async fn subscribe(
        &self,
        target: SubscriptionTarget,
        start: SubscriptionStart,
    ) -> Result<Subscription, DomainError> {
        let (backlog, live) = {
            let state = self.state();
            let backlog = state
                .all
                .iter()
                .filter(|event| is_after(&target, start, event))
                .cloned()
                .collect::<Vec<_>>();
            (backlog, self.inner.live.subscribe())
        };
        let generation = self.inner.generation.subscribe();

        let (feed, subscription) = Subscription::channel(FEED_CAPACITY);
        tokio::spawn(run_subscription(
            feed, target, start, backlog, live, generation,
        ));
        Ok(subscription)
    }
}

/// Transaction buffering pages until commit.
struct InMemoryTransaction {
    log: InMemoryEventLog,
    stream: String,
    expected: ExpectedVersion,
    pages_written: usize,
    buffered: Vec<EventData>,
}

#[async_trait]
impl LogTransaction for InMemoryTransaction {
    async fn write(&mut self, events: Vec<EventData>) -> Result<(), DomainError> {
        let mut state = self.log.state();
        state.transaction_writes += 1;
        self.pages_written += 1;
        if state.fail_transaction_write == Some(self.pages_written) {
            return Err(DomainError::Infrastructure(format!(
                "injected failure on page {} of transaction on {}",
                self.pages_written, self.stream
            )));
        }
        self.buffered.extend(events);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<WriteResult, DomainError> {
        let Self {
            log,
            stream,
            expected,
            buffered,
            ..
        } = *self;
        let mut state = log.state();
        let result = log.append_locked(&mut state, &stream, expected, buffered)?;
        state.committed_transactions += 1;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(event_type: &str) -> EventData {
        EventData {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            data: b"{}".to_vec(),
            metadata: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_position() {
        let log = InMemoryEventLog::new();

        log.append_to_stream("a", ExpectedVersion::NoStream, vec![data("x"), data("y")])
            .await
            .unwrap();
        let result = log
            .append_to_stream("b", ExpectedVersion::NoStream, vec![data("z")])
            .await
            .unwrap();

        assert_eq!(result.next_expected_version, 0);
        assert_eq!(result.position, 2);
        let a = log.stream_events("a");
        assert_eq!(a[1].sequence_number, 1);
        assert_eq!(a[1].position, 1);
    }

    #[tokio::test]
    async fn test_append_rejects_stale_expected_version() {
        let log = InMemoryEventLog::new();
        log.append_to_stream("a", ExpectedVersion::NoStream, vec![data("x")])
            .await
            .unwrap();

        let result = log
            .append_to_stream("a", ExpectedVersion::NoStream, vec![data("y")])
            .await;

        match result {
            Err(DomainError::ConcurrencyConflict { actual, .. }) => assert_eq!(actual, 0),
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(log.stream_events("a").len(), 1);
    }

    #[tokio::test]
    async fn test_read_pages_until_end_of_stream() {
        let log = InMemoryEventLog::new();
        log.append_to_stream("a", ExpectedVersion::Any, vec![data("x"), data("x"), data("x")])
            .await
            .unwrap();

        let first = log.read_stream_forward("a", 0, 2).await.unwrap();
        let second = log
            .read_stream_forward("a", first.next_sequence_number, 2)
            .await
            .unwrap();

        assert_eq!(first.events.len(), 2);
        assert!(!first.is_end_of_stream);
        assert_eq!(second.events.len(), 1);
        assert!(second.is_end_of_stream);
    }

    #[tokio::test]
    async fn test_abandoned_transaction_writes_nothing() {
        let log = InMemoryEventLog::new();
        log.fail_transaction_write(2);

        let mut transaction = log
            .start_transaction("a", ExpectedVersion::NoStream)
            .await
            .unwrap();
        transaction.write(vec![data("x")]).await.unwrap();
        let failed = transaction.write(vec![data("x")]).await;
        drop(transaction);

        assert!(failed.is_err());
        assert_eq!(log.transaction_writes(), 2);
        let slice = log.read_stream_forward("a", 0, 10).await.unwrap();
        assert_eq!(slice.status, SliceStatus::StreamNotFound);
    }

    #[tokio::test]
    async fn test_subscription_replays_backlog_then_goes_live() {
        let log = InMemoryEventLog::new();
        log.append_json("a", "x", &serde_json::json!({}));

        let mut subscription = log
            .subscribe(SubscriptionTarget::AllStreams, SubscriptionStart::Beginning)
            .await
            .unwrap();

        assert!(matches!(subscription.next().await, Some(SubscriptionMessage::Event(e)) if e.position == 0));
        assert_eq!(subscription.next().await, Some(SubscriptionMessage::CaughtUp));

        log.append_json("b", "y", &serde_json::json!({}));

        assert!(matches!(subscription.next().await, Some(SubscriptionMessage::Event(e)) if e.stream_id == "b"));
    }

    #[tokio::test]
    async fn test_stream_subscription_resumes_after_checkpoint() {
        let log = InMemoryEventLog::new();
        for _ in 0..3 {
            log.append_json("a", "x", &serde_json::json!({}));
        }
        log.append_json("b", "x", &serde_json::json!({}));

        let mut subscription = log
            .subscribe(SubscriptionTarget::Stream("a".into()), SubscriptionStart::After(1))
            .await
            .unwrap();

        assert!(matches!(subscription.next().await, Some(SubscriptionMessage::Event(e)) if e.sequence_number == 2));
        assert_eq!(subscription.next().await, Some(SubscriptionMessage::CaughtUp));
    }
}
