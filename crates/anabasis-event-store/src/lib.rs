//! Anabasis Event Store — a PostgreSQL backing log.
//!
//! Streams live in one append-only table ordered by a global position.
//! Writers are serialized with a transaction-scoped advisory lock, so
//! positions become visible in commit order and polling subscribers never
//! skip an event.

pub mod config;
pub mod pg_event_log;
pub mod schema;

pub use config::PgEventLogConfig;
pub use pg_event_log::PgEventLog;
