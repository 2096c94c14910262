//! Importer configuration.

use std::time::Duration;

/// Cards requested per page from the source.
pub const PAGE_SIZE: u32 = 250;

/// Connection settings for the Pokémon TCG API.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    /// Sent as `X-Api-Key`. Requests are made anonymously when absent.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.pokemontcg.io/v2".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub page_size: u32,
    /// Upper bound for any single source call. Expiry fails the set.
    pub source_timeout: Duration,
    /// Sets imported at once by a batch. 1 means strictly sequential.
    pub concurrency: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            source_timeout: Duration::from_secs(60),
            concurrency: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importer_config_defaults() {
        let config = ImporterConfig::default();
        assert_eq!(config.page_size, 250);
        assert_eq!(config.concurrency, 1);

        let source = SourceConfig::default();
        assert!(source.base_url.starts_with("https://"));
        assert!(source.api_key.is_none());
    }
}
