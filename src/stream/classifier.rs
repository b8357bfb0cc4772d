//! Outbound request classification.
//!
//! Every request a browsing session issues is shown to
//! [`RequestClassifier::classify`] before it leaves the browser:
//!
//! - [`Verdict::Block`]: advertising, tracking or analytics. Never sent.
//! - [`Verdict::Capture`]: carries a media file or manifest location. The
//!   session records it and stops.
//! - [`Verdict::Pass`]: forwarded unchanged.
//!
//! Blocking takes precedence over capture. The only per-source rule is the
//! decoy exclusion: a source may name a domain whose media-looking URLs are
//! never captured for that source.

use url::{Position, Url};

use crate::stream::source::SourceRegistry;

/// Substrings that mark a request as ad/tracker traffic.
pub const DEFAULT_BLOCKED: &[&str] = &[
    "analytics",
    "ads",
    "social",
    "disable-devtool",
    "cloudflareinsights",
    "ainouzaudre",
    "pixel.embed",
    "histats",
];

/// Path/query markers of MP4 files and HLS manifests.
pub const MEDIA_MARKERS: &[&str] = &[".mp4", ".m3u8", "/mp4"];

/// Stream CDN markers, matched anywhere in the URL.
pub const CDN_MARKERS: &[&str] = &["kendrickl"];

/// Decision for one outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Block,
    Capture,
    Pass,
}

/// Stateless predicate set shared by every session.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    blocked: Vec<String>,
    decoys: Vec<(String, String)>,
}

impl RequestClassifier {
    /// Default rules, with decoy domains taken from the registry.
    #[must_use]
    pub fn new(registry: &SourceRegistry) -> Self {
        Self {
            blocked: DEFAULT_BLOCKED.iter().map(ToString::to_string).collect(),
            decoys: registry
                .decoys()
                .map(|(source, domain)| (source.to_string(), domain.to_string()))
                .collect(),
        }
    }

    /// Add block substrings on top of the defaults.
    #[must_use]
    pub fn with_blocked<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked.extend(
            extra
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty()),
        );
        self
    }

    /// Classify `url` for a session driving `source`.
    #[must_use]
    pub fn classify(&self, url: &str, source: &str) -> Verdict {
        if self.is_blocked(url) {
            return Verdict::Block;
        }
        if looks_like_media(url) && !self.is_decoy(url, source) {
            return Verdict::Capture;
        }
        Verdict::Pass
    }

    #[must_use]
    pub fn is_blocked(&self, url: &str) -> bool {
        self.blocked.iter().any(|b| url.contains(b.as_str()))
    }

    /// Media-looking URL on `source`'s decoy domain.
    #[must_use]
    pub fn is_decoy(&self, url: &str, source: &str) -> bool {
        let Some(domain) = self.decoy_domain(source) else {
            return false;
        };
        if !looks_like_media(url) {
            return false;
        }
        match Url::parse(url) {
            Ok(parsed) => parsed.host_str().is_some_and(|h| h.contains(domain)),
            Err(_) => url.contains(domain),
        }
    }

    #[must_use]
    pub fn decoy_domain(&self, source: &str) -> Option<&str> {
        self.decoys
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, domain)| domain.as_str())
    }
}

impl Default for RequestClassifier {
    fn default() -> Self {
        Self::new(&SourceRegistry::builtin())
    }
}

fn looks_like_media(url: &str) -> bool {
    if CDN_MARKERS.iter().any(|m| url.contains(m)) {
        return true;
    }
    match Url::parse(url) {
        Ok(parsed) => {
            let tail = &parsed[Position::BeforePath..];
            MEDIA_MARKERS.iter().any(|m| tail.contains(m))
        }
        Err(_) => MEDIA_MARKERS.iter().any(|m| url.contains(m)),
    }
}
