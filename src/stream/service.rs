//! Inbound surface: `getStreams` for whatever serves requests.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metadata::{MetadataProvider, TitleInfo};
use crate::request::{ContentRequest, MediaType};
use crate::stream::cache::{CachePolicy, StreamCache};
use crate::stream::orchestrator::{AggregatedResult, Orchestrator};

/// One playable stream as handed to the serving layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEntry {
    pub name: String,
    pub url: String,
    pub description: String,
}

pub struct StreamService {
    orchestrator: Orchestrator,
    metadata: Arc<dyn MetadataProvider>,
    cache: Arc<dyn StreamCache>,
    policy: CachePolicy,
}

impl StreamService {
    pub fn new(
        orchestrator: Orchestrator,
        metadata: Arc<dyn MetadataProvider>,
        cache: Arc<dyn StreamCache>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            orchestrator,
            metadata,
            cache,
            policy,
        }
    }

    /// Streams for an addon-style request: `media_type` is `movie` or
    /// `series`, `id` is `tt…` or `tt…:<season>:<episode>`.
    ///
    /// Anything malformed yields an empty list.
    pub async fn handle(&self, media_type: &str, id: &str) -> Vec<StreamEntry> {
        let media_type = match media_type.parse::<MediaType>() {
            Ok(media_type) => media_type,
            Err(e) => {
                debug!("{e}");
                return Vec::new();
            }
        };
        match ContentRequest::from_stream_id(media_type, id) {
            Ok(request) => self.get_streams(&request).await,
            Err(e) => {
                warn!("Rejected stream request: {e}");
                Vec::new()
            }
        }
    }

    /// Every stream the sources deliver for `request`, all sharing one
    /// description.
    pub async fn get_streams(&self, request: &ContentRequest) -> Vec<StreamEntry> {
        let (result, title) = tokio::join!(
            self.cached_resolve(request),
            self.metadata.fetch_title_year(request.external_id()),
        );
        let description = describe(request, title.as_ref());

        result
            .iter()
            .map(|(label, url)| StreamEntry {
                name: label.to_string(),
                url: url.to_string(),
                description: description.clone(),
            })
            .collect()
    }

    async fn cached_resolve(&self, request: &ContentRequest) -> AggregatedResult {
        let key = request.content_key();
        let Some(ttl) = self.policy.ttl_for(request.media_type()) else {
            return self.orchestrator.resolve(request).await;
        };

        if let Some(hit) = self.cache.get(&key).await {
            info!(%key, streams = hit.len(), "cache hit");
            return hit;
        }

        let result = self.orchestrator.resolve(request).await;
        self.cache.set(&key, result.clone(), ttl).await;
        result
    }
}

/// `"Title (Year)"` for movies, `"Title S<s>E<e>"` for episodes; the external
/// id when the title is unknown.
pub fn describe(request: &ContentRequest, title: Option<&TitleInfo>) -> String {
    let Some(info) = title else {
        return request.external_id().to_string();
    };
    match request.episode_numbers() {
        Some(ep) => format!("{} S{}E{}", info.title, ep.season, ep.episode),
        None => match &info.year {
            Some(year) => format!("{} ({year})", info.title),
            None => info.title.clone(),
        },
    }
}
