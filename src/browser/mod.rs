//! Browsing sessions.
//!
//! The extraction engine talks to a browser only through two traits:
//! [`BrowserLauncher`] opens an isolated [`BrowsingSession`] with an
//! [`InterceptionPolicy`] installed, and the session is driven through
//! navigation and interaction steps until it is closed. The production
//! implementation drives headless Chromium over the DevTools protocol
//! ([`chrome::ChromeLauncher`]).

pub mod cdp;
pub mod chrome;
pub mod page;
#[cfg(test)]
pub mod scripted;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::stream::classifier::{RequestClassifier, Verdict};
use crate::stream::source::{InteractionStep, NavigationPolicy};

pub use chrome::ChromeLauncher;

/// Something the page did that ends the wait for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// A request was classified as a media stream.
    Captured(String),
    /// The page or its connection broke (crash, detach).
    Fault(String),
}

/// What the transport must do with an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Continue,
    Block,
    /// Stream URL recorded; the request itself is dropped.
    Captured,
}

/// Classifier verdicts applied to one session's outbound requests.
///
/// Captures and faults are reported on the signal channel handed to the
/// launcher; the extraction session owns the receiving end.
#[derive(Debug, Clone)]
pub struct InterceptionPolicy {
    classifier: Arc<RequestClassifier>,
    source: &'static str,
    signals: mpsc::Sender<SessionSignal>,
    excluded: Arc<AtomicUsize>,
}

impl InterceptionPolicy {
    #[must_use]
    pub fn new(
        classifier: Arc<RequestClassifier>,
        source: &'static str,
        signals: mpsc::Sender<SessionSignal>,
    ) -> Self {
        Self {
            classifier,
            source,
            signals,
            excluded: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Classify `url` and report a capture if there is one.
    pub fn decide(&self, url: &str) -> RequestAction {
        match self.classifier.classify(url, self.source) {
            Verdict::Block => {
                debug!(source = self.source, %url, "blocked");
                RequestAction::Block
            }
            Verdict::Capture => {
                info!(source = self.source, "stream URL detected in request");
                // a full channel means a capture is already queued
                let _ = self
                    .signals
                    .try_send(SessionSignal::Captured(url.to_string()));
                RequestAction::Captured
            }
            Verdict::Pass => {
                if self.classifier.is_decoy(url, self.source) {
                    self.excluded.fetch_add(1, Ordering::Relaxed);
                    debug!(source = self.source, %url, "decoy stream URL ignored");
                }
                RequestAction::Continue
            }
        }
    }

    /// Report that the page can no longer produce a capture.
    pub fn fault(&self, reason: impl Into<String>) {
        let _ = self.signals.try_send(SessionSignal::Fault(reason.into()));
    }

    /// Handle for reading the decoy counter after the policy moved into a session.
    #[must_use]
    pub fn excluded_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.excluded)
    }
}

/// Navigation failure, split so the session can tell slow from broken.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("navigation timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Opens isolated browsing sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Open a session with `policy` deciding every outbound request.
    ///
    /// Popups must be suppressed and dialogs accepted before this returns.
    async fn launch(&self, policy: InterceptionPolicy) -> Result<Box<dyn BrowsingSession>>;
}

/// One page in one isolated browser, exclusively owned by one extraction.
#[async_trait]
pub trait BrowsingSession: Send {
    /// Load `url` and wait for the policy's lifecycle milestone.
    async fn navigate(&mut self, url: &str, policy: NavigationPolicy)
        -> Result<(), NavigationError>;

    /// Apply one interaction step.
    async fn perform(&mut self, step: &InteractionStep) -> Result<()>;

    /// Release the page and everything behind it. Consumes the session, so
    /// it can only happen once.
    async fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(source: &'static str) -> (InterceptionPolicy, mpsc::Receiver<SessionSignal>) {
        let (tx, rx) = mpsc::channel(4);
        let classifier = Arc::new(RequestClassifier::default());
        (InterceptionPolicy::new(classifier, source, tx), rx)
    }

    #[test]
    fn decide_reports_capture() {
        let (policy, mut rx) = policy("vidsrc");
        assert_eq!(
            policy.decide("https://cdn.example.net/master.m3u8"),
            RequestAction::Captured
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionSignal::Captured("https://cdn.example.net/master.m3u8".into())
        );
    }

    #[test]
    fn decide_blocks_and_passes_silently() {
        let (policy, mut rx) = policy("vidsrc");
        assert_eq!(
            policy.decide("https://www.google-analytics.com/g/collect"),
            RequestAction::Block
        );
        assert_eq!(
            policy.decide("https://vidsrc.xyz/embed/movie/278"),
            RequestAction::Continue
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn decide_counts_decoys() {
        let (policy, mut rx) = policy("vidjoy");
        let counter = policy.excluded_counter();
        assert_eq!(
            policy.decide("https://vidjoy.pro/decoy/index.m3u8"),
            RequestAction::Continue
        );
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fault_is_signalled() {
        let (policy, mut rx) = policy("vidify");
        policy.fault("target crashed");
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionSignal::Fault("target crashed".into())
        );
    }
}
