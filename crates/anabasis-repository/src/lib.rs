//! Anabasis Repository — strongly consistent read-modify-write of aggregates.
//!
//! Aggregates are loaded by replaying their dedicated stream page by page and
//! saved by appending their uncommitted events at the version they were
//! loaded at. Large writes go through a single log transaction.

pub mod config;
pub mod repository;

pub use config::RepositoryConfig;
pub use repository::EventSourcedRepository;
