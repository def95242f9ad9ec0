//! Shared test doubles and fixtures for the Anabasis event-sourcing runtime.

mod clock;
mod currency_pair;
mod log;
mod monitor;

pub use clock::FixedClock;
pub use currency_pair::{
    CURRENCY_PAIR_CREATED_EVENT_TYPE, CURRENCY_PAIR_RENAMED_EVENT_TYPE,
    PRICE_CHANGED_EVENT_TYPE, CurrencyPair, CurrencyPairCreated, CurrencyPairEvent,
    CurrencyPairRenamed, PriceChanged, currency_pair_registry,
};
pub use log::InMemoryEventLog;
pub use monitor::ManualConnectionMonitor;
