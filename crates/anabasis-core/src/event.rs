//! Domain event abstractions.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an entity. Its `Display` form names the entity's stream.
pub trait EntityKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Trait that all domain events implement.
///
/// The serialized form of an event is what the registry entry for its
/// [`event_type`](DomainEvent::event_type) decodes on read-back. Event enums
/// therefore usually derive `#[serde(untagged)]` so that each variant is
/// written as its bare payload.
pub trait DomainEvent: Serialize + Clone + Debug + Send + Sync + 'static {
    /// Key of the entity this event belongs to.
    type Key: EntityKey;

    /// Returns the key of the owning entity.
    fn entity_id(&self) -> &Self::Key;

    /// Returns the logical event name used for type routing.
    fn event_type(&self) -> &'static str;

    /// Stream this event is written to when emitted on its own.
    fn stream_name(&self) -> String {
        self.entity_id().to_string()
    }
}

/// Header block written as metadata alongside every persisted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeaders {
    /// Identifier shared by every event written in the same commit.
    pub commit_id: Uuid,
    /// Type tag of the aggregate (or event, for standalone emits) that produced the commit.
    pub aggregate_type: String,
    /// Identity of the actor on whose behalf the write was made.
    pub user_identity: Option<String>,
    /// Host that performed the write.
    pub server_name: String,
    /// UTC time of the write.
    pub server_clock: DateTime<Utc>,
    /// Rust type name of the payload registered for the event type, or of
    /// the event type itself when it has no registration.
    pub event_type: String,
    /// Caller-supplied headers; they override nothing above.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}
