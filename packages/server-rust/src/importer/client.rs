//! HTTP client for the Pokémon TCG API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::config::SourceConfig;
use super::source::{CardPage, CatalogSource, SourceCard, SourceError, SourceSet};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Deserialize)]
struct SetEnvelope {
    data: SourceSet,
}

#[derive(Deserialize)]
struct SetListEnvelope {
    #[serde(default)]
    data: Vec<SourceSet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardPageEnvelope {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    page_size: u32,
    #[serde(default)]
    total_count: u32,
}

/// [`CatalogSource`] over `https://api.pokemontcg.io/v2`.
#[derive(Debug, Clone)]
pub struct PokemonTcgClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PokemonTcgClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &SourceConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, ?query, "fetching from catalog source");
        let mut request = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CatalogSource for PokemonTcgClient {
    async fn fetch_set(&self, set_id: &str) -> Result<SourceSet, SourceError> {
        let envelope: SetEnvelope = self.get(&format!("/sets/{set_id}"), &[]).await?;
        Ok(envelope.data)
    }

    async fn fetch_cards(&self, set_id: &str, page: u32, page_size: u32) -> Result<CardPage, SourceError> {
        let envelope: CardPageEnvelope = self
            .get(
                "/cards",
                &[
                    ("q", format!("set.id:{set_id}")),
                    ("page", page.to_string()),
                    ("pageSize", page_size.to_string()),
                ],
            )
            .await?;

        let mut cards = Vec::with_capacity(envelope.data.len());
        let mut undecodable = 0;
        for record in envelope.data {
            match serde_json::from_value::<SourceCard>(record) {
                Ok(card) => cards.push(card),
                Err(e) => {
                    warn!(set_id, page, error = %e, "skipping undecodable card record");
                    undecodable += 1;
                }
            }
        }
        Ok(CardPage {
            cards,
            undecodable,
            page: envelope.page,
            page_size: envelope.page_size,
            total_count: envelope.total_count,
        })
    }

    async fn recent_set_ids(&self, count: u32) -> Result<Vec<String>, SourceError> {
        let envelope: SetListEnvelope = self
            .get(
                "/sets",
                &[
                    ("orderBy", "-releaseDate".to_string()),
                    ("page", "1".to_string()),
                    ("pageSize", count.to_string()),
                ],
            )
            .await?;
        Ok(envelope.data.into_iter().map(|s| s.id).collect())
    }
}
