//! OMDb title lookup.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::TitleInfo;

pub const OMDB_API_BASE: &str = "https://www.omdbapi.com";

pub struct OmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OmdbResponse {
    title: Option<String>,
    year: Option<String>,
    response: String,
    error: Option<String>,
}

impl OmdbResponse {
    fn into_title(self) -> Option<TitleInfo> {
        if self.response != "True" {
            debug!("OMDb: {}", self.error.as_deref().unwrap_or("no result"));
            return None;
        }
        Some(TitleInfo {
            title: self.title?,
            year: self.year.filter(|y| !y.is_empty() && y != "N/A"),
        })
    }
}

impl OmdbClient {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// `Ok(None)` when OMDb answers but does not know the id.
    pub async fn title(&self, external_id: &str) -> Result<Option<TitleInfo>> {
        let resp = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("i", external_id), ("apikey", self.api_key.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("OMDb API error: {}", resp.status()));
        }

        let data: OmdbResponse = resp.json().await?;
        Ok(data.into_title())
    }
}
