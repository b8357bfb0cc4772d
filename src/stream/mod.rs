//! Stream extraction engine.
//!
//! A request flows through the layers in this order:
//!
//! 1. [`service`] parses it and checks the [`cache`].
//! 2. [`orchestrator`] resolves the provider id and fans out, one
//!    [`session`] per entry in the [`source`] registry.
//! 3. Each session drives a browser whose outbound requests are judged by the
//!    [`classifier`]; the first media URL ends the session.

pub mod cache;
pub mod classifier;
pub mod orchestrator;
pub mod service;
pub mod session;
pub mod source;
pub mod sources;

pub use cache::{CachePolicy, MemoryCache, StreamCache};
pub use classifier::{RequestClassifier, Verdict};
pub use orchestrator::{AggregatedResult, BrowserExtractor, Extractor, Orchestrator};
pub use service::{StreamEntry, StreamService};
pub use session::{CapturedStream, ExtractionOutcome, ExtractionSession};
pub use source::{SourceDescriptor, SourceRegistry};
