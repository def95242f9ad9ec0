//! Integration tests for `FileSystemSnapshotStore`.

use std::sync::Arc;

use anabasis_core::aggregate::Aggregate;
use anabasis_repository::{EventSourcedRepository, RepositoryConfig};
use anabasis_snapshot::{FileSystemSnapshotStore, SnapshotRef, SnapshotStore, SnapshotStoreConfig};
use anabasis_test_support::{
    CurrencyPair, CurrencyPairEvent, InMemoryEventLog, ManualConnectionMonitor,
    currency_pair_registry,
};
use tempfile::TempDir;

fn store(dir: &TempDir) -> FileSystemSnapshotStore<CurrencyPair> {
    FileSystemSnapshotStore::new(SnapshotStoreConfig {
        repository_directory: dir.path().to_owned(),
    })
}

fn repository(log: &InMemoryEventLog) -> EventSourcedRepository<CurrencyPair> {
    EventSourcedRepository::new(
        RepositoryConfig::default(),
        Arc::new(ManualConnectionMonitor::connected(Arc::new(log.clone()))),
        Arc::new(currency_pair_registry()),
    )
}

async fn saved_pair(
    repository: &EventSourcedRepository<CurrencyPair>,
    id: &str,
    quotes: usize,
) -> CurrencyPair {
    let mut pair = CurrencyPair::default();
    pair.record(CurrencyPairEvent::created(id));
    for _ in 0..quotes {
        pair.record(CurrencyPairEvent::price_changed(id, 1.0, 1.5));
    }
    repository.save(&mut pair).await.unwrap();
    pair
}

fn pick_oldest(candidates: &[SnapshotRef]) -> Option<&SnapshotRef> {
    candidates.iter().min_by_key(|snapshot| snapshot.version)
}

fn pick_nothing(_: &[SnapshotRef]) -> Option<&SnapshotRef> {
    None
}

#[tokio::test]
async fn test_list_enumerates_snapshots_under_filters() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let log = InMemoryEventLog::new();
    let repository = repository(&log);
    let eur = saved_pair(&repository, "EURUSD", 1).await;
    let gbp = saved_pair(&repository, "GBPUSD", 0).await;
    store.save("EURUSD", &["fx"], &eur).await.unwrap();
    store.save("GBPUSD", &["fx"], &gbp).await.unwrap();
    store.save("GBPUSD", &["rates"], &gbp).await.unwrap();

    // Act
    let listed = store.list(&["fx"]).await.unwrap();
    let missing = store.list(&["commodities"]).await.unwrap();

    // Assert
    let listed: Vec<(&str, i64)> = listed
        .iter()
        .map(|snapshot| (snapshot.stream_id.as_str(), snapshot.version))
        .collect();
    assert_eq!(listed, [("EURUSD", 1), ("GBPUSD", 0)]);
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_select_loads_the_candidate_the_caller_picks() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let log = InMemoryEventLog::new();
    let repository = repository(&log);
    let mut pair = saved_pair(&repository, "EURUSD", 0).await;
    store.save("EURUSD", &["fx"], &pair).await.unwrap();
    repository
        .apply(&mut pair, CurrencyPairEvent::renamed("EURUSD", "Euro"))
        .await
        .unwrap();
    store.save("EURUSD", &["fx"], &pair).await.unwrap();

    // Act
    let oldest = store.select(&["fx"], &pick_oldest).await.unwrap();
    let none = store.select(&["fx"], &pick_nothing).await.unwrap();

    // Assert
    let oldest = oldest.unwrap();
    assert_eq!(oldest.version(), 0);
    assert_eq!(oldest.name, "EURUSD");
    assert!(none.is_none());
}

#[tokio::test]
async fn test_snapshot_then_refresh_replays_only_the_tail() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let log = InMemoryEventLog::new();
    let repository = repository(&log);
    let mut pair = saved_pair(&repository, "EURUSD", 2).await;
    store.save("EURUSD", &["fx"], &pair).await.unwrap();
    repository
        .apply(&mut pair, CurrencyPairEvent::price_changed("EURUSD", 2.0, 2.5))
        .await
        .unwrap();

    // Act
    let restored = store.get("EURUSD", "fx").await.unwrap();
    let refreshed = repository.refresh(restored, true).await.unwrap().unwrap();

    // Assert
    assert_eq!(refreshed.version(), 3);
    assert_eq!(refreshed.quotes, 3);
    assert_eq!(refreshed.applied_events().len(), 1);
}
