//! Error taxonomy for stream resolution.
//!
//! None of these reach the caller of `StreamService::get_streams`: source
//! errors are absorbed (logged) by the orchestrator, an unresolved upstream
//! id yields an empty result, and a malformed request yields an empty stream
//! list at the service boundary.

use thiserror::Error;

/// Why a single source contributed nothing. Local to one extraction session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("no stream URL detected within {0:?}")]
    Timeout(std::time::Duration),

    #[error("session ended without observing a stream request")]
    NoCapture,

    #[error("session fault: {0}")]
    SessionFault(String),

    #[error("ignored {count} decoy stream request(s) from {domain}")]
    Excluded { domain: String, count: usize },
}

/// The metadata collaborator could not map an external id to a provider id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no provider id found for {external_id}")]
    UpstreamIdUnresolved { external_id: String },
}

/// Malformed inbound request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("unknown media type: {0}")]
    UnknownMediaType(String),

    #[error("invalid external id '{0}' (expected tt followed by digits)")]
    InvalidExternalId(String),

    #[error("missing or invalid {field} in '{id}'")]
    MissingEpisode { field: &'static str, id: String },
}
