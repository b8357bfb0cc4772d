//! Metadata lookups.
//!
//! Two questions are asked about an external (IMDb) id: which provider id the
//! sources use for it ([TMDB](tmdb)), and what the title is called
//! ([OMDb](omdb)). Both are best-effort: every failure is logged and turned
//! into `None`, never raised.

pub mod omdb;
pub mod tmdb;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::MetadataConfig;
use crate::request::{MediaType, ResolvedId};

pub use omdb::OmdbClient;
pub use tmdb::TmdbClient;

/// Display title of a movie or series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleInfo {
    pub title: String,
    /// Release year, or year range for series (e.g. `"2008–2013"`).
    pub year: Option<String>,
}

/// Metadata collaborator consumed by the orchestrator and the stream service.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Map an external id to the numeric id the sources are keyed on.
    async fn resolve_provider_id(
        &self,
        external_id: &str,
        media_type: MediaType,
    ) -> Option<ResolvedId>;

    /// Title (and year) for an external id.
    async fn fetch_title_year(&self, external_id: &str) -> Option<TitleInfo>;
}

/// TMDB for id resolution, OMDb for titles. Either half may be unconfigured.
pub struct MetadataClient {
    tmdb: Option<TmdbClient>,
    omdb: Option<OmdbClient>,
}

impl MetadataClient {
    pub fn new(config: &MetadataConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("bytewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build metadata HTTP client")?;

        let tmdb = config
            .tmdb_token
            .as_ref()
            .map(|token| TmdbClient::new(client.clone(), &config.tmdb_base_url, token));
        let omdb = config
            .omdb_key
            .as_ref()
            .map(|key| OmdbClient::new(client.clone(), &config.omdb_base_url, key));

        if tmdb.is_none() {
            warn!("No TMDB token configured; no request can be resolved");
        }
        if omdb.is_none() {
            debug!("No OMDb key configured; descriptions fall back to ids");
        }

        Ok(Self { tmdb, omdb })
    }
}

#[async_trait]
impl MetadataProvider for MetadataClient {
    async fn resolve_provider_id(
        &self,
        external_id: &str,
        media_type: MediaType,
    ) -> Option<ResolvedId> {
        let tmdb = self.tmdb.as_ref()?;
        match tmdb.find(external_id).await {
            Ok(found) => found.provider_id(media_type),
            Err(e) => {
                warn!("TMDB lookup for {external_id} failed: {e:#}");
                None
            }
        }
    }

    async fn fetch_title_year(&self, external_id: &str) -> Option<TitleInfo> {
        let omdb = self.omdb.as_ref()?;
        match omdb.title(external_id).await {
            Ok(title) => title,
            Err(e) => {
                warn!("OMDb lookup for {external_id} failed: {e:#}");
                None
            }
        }
    }
}
