//! Cache configuration.

use std::time::Duration;

use serde::Deserialize;

/// What a cache tails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// Every stream of the log, replayed from the beginning on each connect.
    AllStreams,
    /// One stream, resumed after the last processed sequence number.
    Stream(String),
}

/// Settings of a [`CatchupCache`](crate::CatchupCache).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CatchupCacheConfig {
    /// Retain every applied event on the cached aggregates.
    pub keep_applied_events: bool,
    /// Delay before resubscribing after the log dropped a subscription.
    pub resubscribe_delay_ms: u64,
}

impl CatchupCacheConfig {
    /// [`resubscribe_delay_ms`](Self::resubscribe_delay_ms) as a `Duration`.
    #[must_use]
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

impl Default for CatchupCacheConfig {
    fn default() -> Self {
        Self {
            keep_applied_events: false,
            resubscribe_delay_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CatchupCacheConfig::default();

        assert!(!config.keep_applied_events);
        assert_eq!(config.resubscribe_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_source_deserializes_from_snake_case() {
        let all: CacheSource = serde_json::from_str(r#""all_streams""#).unwrap();
        let one: CacheSource = serde_json::from_str(r#"{"stream": "EUR/USD"}"#).unwrap();

        assert_eq!(all, CacheSource::AllStreams);
        assert_eq!(one, CacheSource::Stream("EUR/USD".into()));
    }
}
