//! Fan-out/fan-in over every registered source.
//!
//! [`Orchestrator::resolve`] turns one [`ContentRequest`] into an
//! [`AggregatedResult`]: it resolves the provider id, runs one extraction per
//! source concurrently, waits for every one of them to settle and merges the
//! successes. A failing source never cancels or degrades another, and total
//! failure is an empty result, not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::browser::BrowserLauncher;
use crate::error::ResolveError;
use crate::metadata::MetadataProvider;
use crate::request::{ContentRequest, ExtractionTarget};
use crate::stream::classifier::RequestClassifier;
use crate::stream::session::{ExtractionOutcome, ExtractionSession, DEFAULT_CAPTURE_TIMEOUT};
use crate::stream::source::{SourceDescriptor, SourceRegistry};

/// Label to stream URL. Labels are unique; inserting an existing label
/// replaces its URL. Equality ignores insertion order.
#[derive(Debug, Clone, Default)]
pub struct AggregatedResult {
    entries: Vec<(String, String)>,
}

impl AggregatedResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the URL that was replaced.
    pub fn insert(&mut self, label: String, url: String) -> Option<String> {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(l, _)| *l == label) {
            return Some(std::mem::replace(existing, url));
        }
        self.entries.push((label, url));
        None
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, url)| url.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, u)| (l.as_str(), u.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for AggregatedResult {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (label, url) in iter {
            result.insert(label, url);
        }
        result
    }
}

impl PartialEq for AggregatedResult {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(label, url)| other.get(label) == Some(url))
    }
}

impl Eq for AggregatedResult {}

/// Runs one source against one target.
///
/// Implementations must always return an outcome; failures are outcomes too.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        source: &SourceDescriptor,
        target: &ExtractionTarget,
        deadline: Option<Instant>,
    ) -> ExtractionOutcome;
}

/// [`Extractor`] that runs an [`ExtractionSession`] in a fresh browser.
pub struct BrowserExtractor {
    launcher: Arc<dyn BrowserLauncher>,
    classifier: Arc<RequestClassifier>,
    capture_timeout: Duration,
}

impl BrowserExtractor {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, classifier: Arc<RequestClassifier>) -> Self {
        Self {
            launcher,
            classifier,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }
}

#[async_trait]
impl Extractor for BrowserExtractor {
    async fn extract(
        &self,
        source: &SourceDescriptor,
        target: &ExtractionTarget,
        deadline: Option<Instant>,
    ) -> ExtractionOutcome {
        ExtractionSession::new(source, target, self.launcher.as_ref(), Arc::clone(&self.classifier))
            .with_capture_timeout(self.capture_timeout)
            .with_deadline(deadline)
            .run()
            .await
    }
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    metadata: Arc<dyn MetadataProvider>,
    extractor: Arc<dyn Extractor>,
    deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        metadata: Arc<dyn MetadataProvider>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            registry,
            metadata,
            extractor,
            deadline: None,
        }
    }

    /// Bound every request by `deadline` across all sources.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Resolve `request` into whatever the sources can deliver.
    #[instrument(skip(self), fields(key = %request.content_key()))]
    pub async fn resolve(&self, request: &ContentRequest) -> AggregatedResult {
        let Some(id) = self
            .metadata
            .resolve_provider_id(request.external_id(), request.media_type())
            .await
        else {
            info!(
                "{}",
                ResolveError::UpstreamIdUnresolved {
                    external_id: request.external_id().to_string(),
                }
            );
            return AggregatedResult::new();
        };

        let target = request.target(id);
        let deadline = self.deadline.map(|d| Instant::now() + d);
        info!(id = %id, sources = self.registry.len(), "extracting");

        let outcomes = join_all(
            self.registry
                .iter()
                .map(|source| self.extractor.extract(source, &target, deadline)),
        )
        .await;

        merge(self.registry.iter().zip(outcomes))
    }
}

/// Merge successes in registry order; log everything else.
fn merge<'a>(
    outcomes: impl Iterator<Item = (&'a SourceDescriptor, ExtractionOutcome)>,
) -> AggregatedResult {
    let mut result = AggregatedResult::new();
    for (source, outcome) in outcomes {
        match outcome {
            ExtractionOutcome::Success(stream) => {
                info!(source = source.name, url = %stream.url, "stream found");
                if let Some(previous) = result.insert(stream.source_label, stream.url) {
                    warn!(source = source.name, %previous, "label collision, keeping later URL");
                }
            }
            failed => {
                if let Some(reason) = failed.failure() {
                    warn!(source = source.name, "{reason}");
                }
            }
        }
    }
    info!(found = result.len(), "extraction finished");
    result
}
