//! Source descriptors and the registry that holds them.
//!
//! A [`SourceDescriptor`] is pure data: a URL template keyed on media type
//! plus the quirks an [`ExtractionSession`](super::session::ExtractionSession)
//! needs to drive the page (how to wait for navigation, what to click, how
//! long to wait for a stream). Adding a source means adding one descriptor to
//! [`SourceRegistry::builtin`]; nothing else changes.

use std::time::Duration;

use crate::request::ExtractionTarget;

/// Builds the player page URL for a target. Must be pure.
pub type UrlBuilder = fn(&ExtractionTarget) -> String;

/// Page lifecycle milestone that ends the navigation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationWait {
    /// Initial HTML parsed.
    DomContentLoaded,
    /// `load` event fired.
    Load,
    /// No more than two requests in flight for 500 ms.
    NetworkAlmostIdle,
    /// No requests in flight for 500 ms.
    NetworkIdle,
}

impl NavigationWait {
    /// Name of the matching `Page.lifecycleEvent`.
    #[must_use]
    pub fn lifecycle_event(&self) -> &'static str {
        match self {
            NavigationWait::DomContentLoaded => "DOMContentLoaded",
            NavigationWait::Load => "load",
            NavigationWait::NetworkAlmostIdle => "networkAlmostIdle",
            NavigationWait::NetworkIdle => "networkIdle",
        }
    }
}

/// How a source's player page is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationPolicy {
    pub wait: NavigationWait,
    /// `None` means no ceiling: wait as long as the page takes.
    pub timeout: Option<Duration>,
}

/// Session-level action applied after navigation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionStep {
    /// Find the first frame matching `frame`, then click `element` inside it.
    ClickInFrame {
        frame: &'static str,
        element: &'static str,
    },
}

/// One external content provider.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub name: &'static str,
    pub build_url: UrlBuilder,
    pub navigation: NavigationPolicy,
    pub interaction: &'static [InteractionStep],
    /// Overrides the default capture timeout.
    pub capture_timeout: Option<Duration>,
    /// Domain whose media-looking URLs must never be captured for this source.
    pub decoy_domain: Option<&'static str>,
}

impl SourceDescriptor {
    /// Player page URL for `target`.
    #[must_use]
    pub fn url_for(&self, target: &ExtractionTarget) -> String {
        (self.build_url)(target)
    }

    /// Label used for this source's entry in an aggregated result.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} Link", self.name)
    }
}

/// Fixed, ordered table of sources. Iteration order is the merge order.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new(sources: Vec<SourceDescriptor>) -> Self {
        Self { sources }
    }

    /// The built-in source table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(super::sources::builtin_sources())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// `(source name, decoy domain)` pairs, for the request classifier.
    pub fn decoys(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.sources
            .iter()
            .filter_map(|s| s.decoy_domain.map(|d| (s.name, d)))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_event_names() {
        assert_eq!(
            NavigationWait::DomContentLoaded.lifecycle_event(),
            "DOMContentLoaded"
        );
        assert_eq!(NavigationWait::Load.lifecycle_event(), "load");
        assert_eq!(
            NavigationWait::NetworkAlmostIdle.lifecycle_event(),
            "networkAlmostIdle"
        );
        assert_eq!(NavigationWait::NetworkIdle.lifecycle_event(), "networkIdle");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = SourceRegistry::builtin();
        assert_eq!(registry.get("VidSrc").map(|s| s.name), Some("vidsrc"));
        assert!(registry.get("streamhub").is_none());
    }

    #[test]
    fn label_format() {
        let registry = SourceRegistry::builtin();
        let source = registry.get("wooflix").unwrap();
        assert_eq!(source.label(), "wooflix Link");
    }

    #[test]
    fn decoys_come_from_descriptors() {
        let registry = SourceRegistry::builtin();
        let decoys: Vec<_> = registry.decoys().collect();
        assert_eq!(decoys, vec![("vidjoy", "vidjoy")]);
    }
}
