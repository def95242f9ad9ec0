//! Sample aggregate used across the workspace's tests.

use anabasis_core::aggregate::{Aggregate, Journal};
use anabasis_core::event::DomainEvent;
use anabasis_core::registry::EventTypeRegistry;
use serde::{Deserialize, Serialize};

/// Event type name of [`CurrencyPairCreated`].
pub const CURRENCY_PAIR_CREATED_EVENT_TYPE: &str = "currency_pair.created";
/// Event type name of [`CurrencyPairRenamed`].
pub const CURRENCY_PAIR_RENAMED_EVENT_TYPE: &str = "currency_pair.renamed";
/// Event type name of [`PriceChanged`].
pub const PRICE_CHANGED_EVENT_TYPE: &str = "currency_pair.price_changed";

/// Emitted when a currency pair is listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPairCreated {
    /// The pair identifier, e.g. `EUR/USD`.
    pub pair_id: String,
}

/// Emitted when a pair's display name changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPairRenamed {
    /// The pair identifier.
    pub pair_id: String,
    /// The new display name.
    pub name: String,
}

/// Emitted on every quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChanged {
    /// The pair identifier.
    pub pair_id: String,
    /// Bid price.
    pub bid: f64,
    /// Ask price.
    pub ask: f64,
}

/// Events of the currency pair aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CurrencyPairEvent {
    /// The pair has been listed.
    Created(CurrencyPairCreated),
    /// The pair has been renamed.
    Renamed(CurrencyPairRenamed),
    /// A new quote arrived.
    PriceChanged(PriceChanged),
}

impl CurrencyPairEvent {
    /// Shorthand for a `Created` event.
    #[must_use]
    pub fn created(pair_id: &str) -> Self {
        Self::Created(CurrencyPairCreated {
            pair_id: pair_id.to_owned(),
        })
    }

    /// Shorthand for a `Renamed` event.
    #[must_use]
    pub fn renamed(pair_id: &str, name: &str) -> Self {
        Self::Renamed(CurrencyPairRenamed {
            pair_id: pair_id.to_owned(),
            name: name.to_owned(),
        })
    }

    /// Shorthand for a `PriceChanged` event.
    #[must_use]
    pub fn price_changed(pair_id: &str, bid: f64, ask: f64) -> Self {
        Self::PriceChanged(PriceChanged {
            pair_id: pair_id.to_owned(),
            bid,
            ask,
        })
    }
}

impl From<CurrencyPairCreated> for CurrencyPairEvent {
    fn from(value: CurrencyPairCreated) -> Self {
        Self::Created(value)
    }
}

impl From<CurrencyPairRenamed> for CurrencyPairEvent {
    fn from(value: CurrencyPairRenamed) -> Self {
        Self::Renamed(value)
    }
}

impl From<PriceChanged> for CurrencyPairEvent {
    fn from(value: PriceChanged) -> Self {
        Self::PriceChanged(value)
    }
}

impl DomainEvent for CurrencyPairEvent {
    type Key = String;

    fn entity_id(&self) -> &String {
        match self {
            Self::Created(e) => &e.pair_id,
            Self::Renamed(e) => &e.pair_id,
            Self::PriceChanged(e) => &e.pair_id,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => CURRENCY_PAIR_CREATED_EVENT_TYPE,
            Self::Renamed(_) => CURRENCY_PAIR_RENAMED_EVENT_TYPE,
            Self::PriceChanged(_) => PRICE_CHANGED_EVENT_TYPE,
        }
    }
}

/// Registry decoding every [`CurrencyPairEvent`] from JSON.
#[must_use]
pub fn currency_pair_registry() -> EventTypeRegistry<CurrencyPairEvent> {
    EventTypeRegistry::json()
        .register::<CurrencyPairCreated>(CURRENCY_PAIR_CREATED_EVENT_TYPE)
        .register::<CurrencyPairRenamed>(CURRENCY_PAIR_RENAMED_EVENT_TYPE)
        .register::<PriceChanged>(PRICE_CHANGED_EVENT_TYPE)
}

/// The aggregate root for a currency pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Aggregate identifier.
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Last bid.
    pub bid: f64,
    /// Last ask.
    pub ask: f64,
    /// Number of quotes applied.
    pub quotes: u32,
    journal: Journal<CurrencyPairEvent>,
}

impl Aggregate for CurrencyPair {
    type Event = CurrencyPairEvent;

    fn aggregate_id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    fn mutate(&mut self, event: &CurrencyPairEvent) {
        match event {
            CurrencyPairEvent::Created(payload) => {
                self.id = Some(payload.pair_id.clone());
                self.name.clone_from(&payload.pair_id);
            }
            CurrencyPairEvent::Renamed(payload) => {
                self.name.clone_from(&payload.name);
            }
            CurrencyPairEvent::PriceChanged(payload) => {
                self.id.get_or_insert_with(|| payload.pair_id.clone());
                self.bid = payload.bid;
                self.ask = payload.ask;
                self.quotes += 1;
            }
        }
    }

    fn journal(&self) -> &Journal<CurrencyPairEvent> {
        &self.journal
    }

    fn journal_mut(&mut self) -> &mut Journal<CurrencyPairEvent> {
        &mut self.journal
    }
}
