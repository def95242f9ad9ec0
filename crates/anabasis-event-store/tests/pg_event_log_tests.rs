//! Integration tests for `PgEventLog`. They need a database reachable
//! through `DATABASE_URL`.

use std::time::Duration;

use anabasis_core::error::DomainError;
use anabasis_core::log::{
    EventData, EventLog, ExpectedVersion, SliceStatus, SubscriptionMessage, SubscriptionStart,
    SubscriptionTarget,
};
use anabasis_event_store::{PgEventLog, PgEventLogConfig};
use sqlx::PgPool;
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

fn log(pool: PgPool) -> PgEventLog {
    PgEventLog::new(
        pool,
        PgEventLogConfig {
            read_batch_size: 2,
            poll_interval_ms: 20,
        },
    )
}

fn event(event_type: &str) -> EventData {
    EventData {
        event_id: Uuid::new_v4(),
        event_type: event_type.to_owned(),
        data: br#"{"pair_id":"EUR/USD"}"#.to_vec(),
        metadata: b"{}".to_vec(),
    }
}

// --- append / read ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_append_then_read_stream_forward(pool: PgPool) {
    // Arrange
    let log = log(pool);
    let first = event("currency_pair.created");
    let first_id = first.event_id;

    // Act
    let written = log
        .append_to_stream(
            "EUR/USD",
            ExpectedVersion::NoStream,
            vec![first, event("currency_pair.price_changed")],
        )
        .await
        .unwrap();
    let slice = log.read_stream_forward("EUR/USD", 0, 10).await.unwrap();

    // Assert
    assert_eq!(written.next_expected_version, 1);
    assert_eq!(slice.status, SliceStatus::Success);
    assert!(slice.is_end_of_stream);
    assert_eq!(slice.next_sequence_number, 2);
    assert_eq!(slice.events.len(), 2);
    assert_eq!(slice.events[0].event_id, first_id);
    assert_eq!(slice.events[0].sequence_number, 0);
    assert_eq!(slice.events[1].sequence_number, 1);
    assert!(slice.events[0].position < slice.events[1].position);
    assert_eq!(slice.events[1].position, written.position);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_read_pages_stop_at_max_count(pool: PgPool) {
    // Arrange
    let log = log(pool);
    log.append_to_stream(
        "EUR/USD",
        ExpectedVersion::Any,
        vec![event("a"), event("b"), event("c")],
    )
    .await
    .unwrap();

    // Act
    let first = log.read_stream_forward("EUR/USD", 0, 2).await.unwrap();
    let second = log
        .read_stream_forward("EUR/USD", first.next_sequence_number, 2)
        .await
        .unwrap();

    // Assert
    assert!(!first.is_end_of_stream);
    assert_eq!(first.next_sequence_number, 2);
    assert!(second.is_end_of_stream);
    assert_eq!(second.events.len(), 1);
    assert_eq!(second.events[0].event_type, "c");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_read_missing_stream_reports_not_found(pool: PgPool) {
    let log = log(pool);

    let slice = log.read_stream_forward("nowhere", 0, 10).await.unwrap();

    assert_eq!(slice.status, SliceStatus::StreamNotFound);
    assert!(slice.events.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_wrong_expected_version_is_a_conflict(pool: PgPool) {
    // Arrange
    let log = log(pool);
    log.append_to_stream("EUR/USD", ExpectedVersion::NoStream, vec![event("a")])
        .await
        .unwrap();

    // Act
    let result = log
        .append_to_stream("EUR/USD", ExpectedVersion::Exact(5), vec![event("b")])
        .await;

    // Assert
    let err = result.unwrap_err();
    assert!(err.is_concurrency_conflict());
    assert!(matches!(err, DomainError::ConcurrencyConflict { actual: 0, .. }));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_deleted_stream_rejects_reads_and_writes(pool: PgPool) {
    // Arrange
    let log = log(pool);
    log.append_to_stream("EUR/USD", ExpectedVersion::Any, vec![event("a")])
        .await
        .unwrap();

    // Act
    log.delete_stream("EUR/USD").await.unwrap();
    let slice = log.read_stream_forward("EUR/USD", 0, 10).await.unwrap();
    let write = log
        .append_to_stream("EUR/USD", ExpectedVersion::Any, vec![event("b")])
        .await;

    // Assert
    assert_eq!(slice.status, SliceStatus::StreamDeleted);
    assert!(matches!(write, Err(DomainError::StreamDeleted(_))));
}

// --- transactions ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_transaction_is_visible_only_after_commit(pool: PgPool) {
    // Arrange
    let log = log(pool);
    let mut transaction = log
        .start_transaction("EUR/USD", ExpectedVersion::NoStream)
        .await
        .unwrap();

    // Act
    transaction.write(vec![event("a"), event("b")]).await.unwrap();
    transaction.write(vec![event("c")]).await.unwrap();
    let result = transaction.commit().await.unwrap();
    let slice = log.read_stream_forward("EUR/USD", 0, 10).await.unwrap();

    // Assert
    assert_eq!(result.next_expected_version, 2);
    assert_eq!(slice.events.len(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_dropped_transaction_writes_nothing(pool: PgPool) {
    // Arrange
    let log = log(pool);
    let mut transaction = log
        .start_transaction("EUR/USD", ExpectedVersion::Any)
        .await
        .unwrap();
    transaction.write(vec![event("a")]).await.unwrap();

    // Act
    drop(transaction);
    let slice = log.read_stream_forward("EUR/USD", 0, 10).await.unwrap();

    // Assert
    assert_eq!(slice.status, SliceStatus::StreamNotFound);
}

// --- subscriptions ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_subscription_replays_backlog_then_follows_live_writes(pool: PgPool) {
    // Arrange
    let log = log(pool);
    log.append_to_stream("EUR/USD", ExpectedVersion::Any, vec![event("a"), event("b")])
        .await
        .unwrap();
    log.append_to_stream("GBP/USD", ExpectedVersion::Any, vec![event("c")])
        .await
        .unwrap();
    let mut subscription = log
        .subscribe(SubscriptionTarget::AllStreams, SubscriptionStart::Beginning)
        .await
        .unwrap();

    // Act
    let mut backlog = Vec::new();
    loop {
        match timeout(WAIT, subscription.next()).await.unwrap().unwrap() {
            SubscriptionMessage::Event(event) => backlog.push(event.event_type),
            SubscriptionMessage::CaughtUp => break,
            SubscriptionMessage::Dropped(reason) => panic!("dropped: {reason}"),
        }
    }
    log.append_to_stream("EUR/USD", ExpectedVersion::Exact(1), vec![event("d")])
        .await
        .unwrap();
    let live = timeout(WAIT, subscription.next()).await.unwrap().unwrap();

    // Assert
    assert_eq!(backlog, ["a", "b", "c"]);
    assert!(matches!(live, SubscriptionMessage::Event(event) if event.event_type == "d"));
    subscription.stop();
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_stream_subscription_resumes_after_checkpoint(pool: PgPool) {
    // Arrange
    let log = log(pool);
    log.append_to_stream(
        "EUR/USD",
        ExpectedVersion::Any,
        vec![event("a"), event("b"), event("c")],
    )
    .await
    .unwrap();

    // Act
    let mut subscription = log
        .subscribe(
            SubscriptionTarget::Stream("EUR/USD".into()),
            SubscriptionStart::After(0),
        )
        .await
        .unwrap();
    let first = timeout(WAIT, subscription.next()).await.unwrap().unwrap();

    // Assert
    assert!(matches!(first, SubscriptionMessage::Event(event) if event.sequence_number == 1));
}
