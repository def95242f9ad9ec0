//! Anabasis Core — event-sourcing abstractions.
//!
//! This crate defines the aggregate and event model, the error taxonomy, and
//! the contracts of the collaborators every other crate depends on: the
//! backing event log, the connection monitor, and the payload codec. It
//! contains no storage code.

pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod connection;
pub mod error;
pub mod event;
pub mod log;
pub mod registry;
