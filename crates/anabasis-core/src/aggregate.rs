//! Aggregate root abstraction.

use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;

/// Version of an aggregate that has never had an event applied.
pub const NO_VERSION: i64 = -1;

/// Bookkeeping every aggregate carries next to its projected state.
///
/// Only the version survives serialization: uncommitted and applied events
/// are process-local.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Journal<E> {
    version: i64,
    #[serde(skip)]
    uncommitted: Vec<E>,
    #[serde(skip)]
    applied: Vec<E>,
}

impl<E> Journal<E> {
    /// Sequence number of the last applied event, [`NO_VERSION`] if none.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Events applied locally but not yet persisted.
    #[must_use]
    pub fn uncommitted(&self) -> &[E] {
        &self.uncommitted
    }

    /// Events retained after application, when retention was requested.
    #[must_use]
    pub fn applied(&self) -> &[E] {
        &self.applied
    }
}

impl<E> Default for Journal<E> {
    fn default() -> Self {
        Self {
            version: NO_VERSION,
            uncommitted: Vec::new(),
            applied: Vec::new(),
        }
    }
}

/// Trait for aggregate roots that reconstitute from event history.
///
/// Implementors provide the state transition in [`mutate`](Aggregate::mutate)
/// and expose their [`Journal`]; versioning, uncommitted-event tracking and
/// applied-event retention are provided on top of that.
pub trait Aggregate: Default + Clone + Send + Sync + 'static {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate identifier, `None` until the first event set it.
    fn aggregate_id(&self) -> Option<&<Self::Event as DomainEvent>::Key>;

    /// Mutates projected state for one event. Must not touch the journal.
    fn mutate(&mut self, event: &Self::Event);

    /// Returns the aggregate's journal.
    fn journal(&self) -> &Journal<Self::Event>;

    /// Returns the aggregate's journal mutably.
    fn journal_mut(&mut self) -> &mut Journal<Self::Event>;

    /// Returns the current version (sequence number of the last applied event).
    fn version(&self) -> i64 {
        self.journal().version
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.journal().uncommitted
    }

    /// Returns events retained during application.
    fn applied_events(&self) -> &[Self::Event] {
        &self.journal().applied
    }

    /// Version the backing stream is at, ignoring uncommitted events.
    #[allow(clippy::cast_possible_wrap)]
    fn committed_version(&self) -> i64 {
        self.version() - self.uncommitted_events().len() as i64
    }

    /// Applies a new event locally and queues it for persistence.
    fn record(&mut self, event: Self::Event) {
        self.mutate(&event);
        let journal = self.journal_mut();
        journal.version += 1;
        journal.uncommitted.push(event);
    }

    /// Applies an event read back from the log at `sequence_number`.
    fn apply_recorded(&mut self, event: Self::Event, sequence_number: i64, keep_applied: bool) {
        self.mutate(&event);
        let journal = self.journal_mut();
        journal.version = sequence_number;
        if keep_applied {
            journal.applied.push(event);
        }
    }

    /// Clears uncommitted events after persistence and pins the version the
    /// log reported for the last written event.
    fn mark_committed(&mut self, version: i64) {
        let journal = self.journal_mut();
        journal.uncommitted.clear();
        journal.version = version;
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Incremented {
        counter_id: String,
        by: i32,
    }

    impl DomainEvent for Incremented {
        type Key = String;

        fn entity_id(&self) -> &String {
            &self.counter_id
        }

        fn event_type(&self) -> &'static str {
            "counter.incremented"
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Counter {
        id: Option<String>,
        total: i32,
        journal: Journal<Incremented>,
    }

    impl Aggregate for Counter {
        type Event = Incremented;

        fn aggregate_id(&self) -> Option<&String> {
            self.id.as_ref()
        }

        fn mutate(&mut self, event: &Incremented) {
            self.id = Some(event.counter_id.clone());
            self.total += event.by;
        }

        fn journal(&self) -> &Journal<Incremented> {
            &self.journal
        }

        fn journal_mut(&mut self) -> &mut Journal<Incremented> {
            &mut self.journal
        }
    }

    fn incremented(by: i32) -> Incremented {
        Incremented {
            counter_id: "c-1".to_owned(),
            by,
        }
    }

    #[test]
    fn test_new_aggregate_has_no_version() {
        let counter = Counter::default();

        assert_eq!(counter.version(), NO_VERSION);
        assert!(counter.aggregate_id().is_none());
        assert!(counter.uncommitted_events().is_empty());
    }

    #[test]
    fn test_record_advances_version_and_queues_event() {
        let mut counter = Counter::default();

        counter.record(incremented(2));
        counter.record(incremented(3));

        assert_eq!(counter.total, 5);
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.committed_version(), NO_VERSION);
        assert_eq!(counter.uncommitted_events().len(), 2);
        assert_eq!(counter.aggregate_id().map(String::as_str), Some("c-1"));
    }

    #[test]
    fn test_apply_recorded_pins_version_to_sequence_number() {
        let mut counter = Counter::default();

        counter.apply_recorded(incremented(1), 0, false);
        counter.apply_recorded(incremented(1), 7, false);

        assert_eq!(counter.version(), 7);
        assert!(counter.uncommitted_events().is_empty());
        assert!(counter.applied_events().is_empty());
    }

    #[test]
    fn test_apply_recorded_retains_events_when_asked() {
        let mut counter = Counter::default();

        counter.apply_recorded(incremented(4), 0, true);

        assert_eq!(counter.applied_events().len(), 1);
        assert_eq!(counter.applied_events()[0].by, 4);
    }

    #[test]
    fn test_mark_committed_clears_uncommitted_events() {
        let mut counter = Counter::default();
        counter.record(incremented(1));
        counter.record(incremented(1));

        counter.mark_committed(1);

        assert!(counter.uncommitted_events().is_empty());
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.committed_version(), 1);
    }
}
