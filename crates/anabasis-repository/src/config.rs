//! Repository configuration.

use serde::Deserialize;

const DEFAULT_PAGE_SIZE: usize = 500;

/// Settings of an [`EventSourcedRepository`](crate::EventSourcedRepository).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Events fetched per forward read.
    pub read_page_size: usize,
    /// Events written per append; larger batches use a transaction.
    pub write_page_size: usize,
    /// Actor identity stamped into commit headers.
    pub identity: Option<String>,
    /// Host name stamped into commit headers.
    pub server_name: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            read_page_size: DEFAULT_PAGE_SIZE,
            write_page_size: DEFAULT_PAGE_SIZE,
            identity: None,
            server_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_sizes() {
        let config = RepositoryConfig::default();

        assert_eq!(config.read_page_size, 500);
        assert_eq!(config.write_page_size, 500);
        assert!(config.identity.is_none());
        assert!(!config.server_name.is_empty());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RepositoryConfig =
            serde_json::from_str(r#"{"write_page_size": 2, "identity": "trader-one"}"#).unwrap();

        assert_eq!(config.write_page_size, 2);
        assert_eq!(config.read_page_size, 500);
        assert_eq!(config.identity.as_deref(), Some("trader-one"));
    }
}
