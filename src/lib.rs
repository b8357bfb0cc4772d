//! `ByteWatch` - multi-source stream URL extraction
//!
//! # Features
//!
//! - **Fan-out extraction**: every source is queried concurrently, each in its
//!   own isolated headless Chromium; one source failing never affects another
//! - **Request classification**: ad/tracker requests are blocked, the first
//!   HLS manifest or MP4 request is captured
//! - **Metadata**: IMDb ids resolved to TMDB ids, titles from OMDb
//! - **Caching**: in-memory TTL cache per content key
//!
//! # Example
//!
//! ```rust,no_run
//! use bytewatch::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let service = bytewatch::build_service(&config)?;
//!     for stream in service.handle("movie", "tt0111161").await {
//!         println!("{}: {}", stream.name, stream.url);
//!     }
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod request;
pub mod stream;

use std::sync::Arc;

use anyhow::Result;

pub use config::Config;
pub use error::{RequestError, ResolveError, SourceError};
pub use metadata::{MetadataClient, MetadataProvider, TitleInfo};
pub use request::{ContentRequest, MediaType, ResolvedId};
pub use stream::{
    AggregatedResult, MemoryCache, Orchestrator, RequestClassifier, SourceRegistry, StreamEntry,
    StreamService,
};

/// Version of bytewatch
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire the production stack together from configuration: Chromium sessions,
/// TMDB/OMDb metadata and an in-memory cache with a background sweeper.
///
/// Must be called inside a Tokio runtime.
pub fn build_service(config: &Config) -> Result<StreamService> {
    let registry = Arc::new(SourceRegistry::builtin());
    let classifier = Arc::new(
        RequestClassifier::new(&registry)
            .with_blocked(config.classifier.extra_blocked.iter().cloned()),
    );
    let launcher = Arc::new(browser::ChromeLauncher::new(&config.browser)?);
    let extractor = Arc::new(
        stream::BrowserExtractor::new(launcher, classifier)
            .with_capture_timeout(config.extraction.capture_timeout()),
    );
    let metadata: Arc<dyn MetadataProvider> = Arc::new(MetadataClient::new(&config.metadata)?);

    let orchestrator = Orchestrator::new(registry, Arc::clone(&metadata), extractor)
        .with_deadline(config.extraction.request_deadline());

    let cache = Arc::new(MemoryCache::new());
    cache.spawn_sweeper(config.cache.sweep_interval());

    Ok(StreamService::new(
        orchestrator,
        metadata,
        cache,
        config.cache.policy(),
    ))
}
