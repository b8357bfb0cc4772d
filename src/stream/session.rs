//! Per-source extraction session.
//!
//! ```text
//! Init -> Navigating -> AwaitingCapture -> {Captured | TimedOut | NoUrl | SessionError} -> Closed
//! ```
//!
//! A session drives one isolated browsing session through a source's player
//! page and resolves to exactly one [`ExtractionOutcome`]. The browser is
//! released exactly once on every path, including timeouts, faults and the
//! optional request deadline.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::browser::{
    BrowserLauncher, BrowsingSession, InterceptionPolicy, NavigationError, SessionSignal,
};
use crate::error::SourceError;
use crate::request::ExtractionTarget;
use crate::stream::classifier::RequestClassifier;
use crate::stream::source::SourceDescriptor;

/// How long a session waits for a stream request once the page is loaded.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pending signals per session. One capture is enough, the rest is slack.
const SIGNAL_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Navigating,
    AwaitingCapture,
    Captured,
    TimedOut,
    NoUrl,
    SessionError,
    Closed,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_become(self, next: SessionState) -> bool {
        use SessionState::{
            AwaitingCapture, Captured, Closed, Init, Navigating, NoUrl, SessionError, TimedOut,
        };
        match (self, next) {
            (Init, Navigating | SessionError) => true,
            // a capture may arrive before navigation settles
            (Navigating, AwaitingCapture | Captured | TimedOut | NoUrl | SessionError) => true,
            (AwaitingCapture, Captured | TimedOut | NoUrl | SessionError) => true,
            (Captured | TimedOut | NoUrl | SessionError, Closed) => true,
            _ => false,
        }
    }
}

/// A stream URL recorded by one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStream {
    pub source_label: String,
    pub url: String,
}

/// Terminal result of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success(CapturedStream),
    Timeout(Duration),
    NoUrlFound,
    SessionError(String),
}

impl ExtractionOutcome {
    /// The failure this outcome stands for, `None` on success.
    #[must_use]
    pub fn failure(&self) -> Option<SourceError> {
        match self {
            ExtractionOutcome::Success(_) => None,
            ExtractionOutcome::Timeout(limit) => Some(SourceError::Timeout(*limit)),
            ExtractionOutcome::NoUrlFound => Some(SourceError::NoCapture),
            ExtractionOutcome::SessionError(reason) => {
                Some(SourceError::SessionFault(reason.clone()))
            }
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }
}

/// One source, one request, one browser.
pub struct ExtractionSession<'a> {
    source: &'a SourceDescriptor,
    target: &'a ExtractionTarget,
    launcher: &'a dyn BrowserLauncher,
    classifier: Arc<RequestClassifier>,
    capture_timeout: Duration,
    deadline: Option<Instant>,
    state: SessionState,
}

impl<'a> ExtractionSession<'a> {
    pub fn new(
        source: &'a SourceDescriptor,
        target: &'a ExtractionTarget,
        launcher: &'a dyn BrowserLauncher,
        classifier: Arc<RequestClassifier>,
    ) -> Self {
        Self {
            source,
            target,
            launcher,
            classifier,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            deadline: None,
            state: SessionState::Init,
        }
    }

    /// Capture timeout for sources that do not set their own.
    #[must_use]
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Hard stop for the whole session, browser release excluded.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the session to completion.
    #[instrument(skip_all, fields(source = self.source.name))]
    pub async fn run(mut self) -> ExtractionOutcome {
        let started = Instant::now();
        let url = self.source.url_for(self.target);

        let (signal_tx, mut signals) = mpsc::channel(SIGNAL_CAPACITY);
        let policy =
            InterceptionPolicy::new(Arc::clone(&self.classifier), self.source.name, signal_tx);
        let excluded = policy.excluded_counter();

        let mut browsing = match self.launcher.launch(policy).await {
            Ok(browsing) => browsing,
            Err(e) => {
                self.transition(SessionState::SessionError);
                self.transition(SessionState::Closed);
                return ExtractionOutcome::SessionError(format!("launch failed: {e:#}"));
            }
        };

        let outcome = match self.deadline {
            Some(deadline) => {
                let driven = self.drive(browsing.as_mut(), &mut signals, &url);
                match tokio::time::timeout_at(deadline, driven).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!("request deadline reached");
                        self.transition(SessionState::TimedOut);
                        ExtractionOutcome::Timeout(deadline.saturating_duration_since(started))
                    }
                }
            }
            None => self.drive(browsing.as_mut(), &mut signals, &url).await,
        };

        self.release(browsing).await;

        let ignored = excluded.load(Ordering::Relaxed);
        if ignored > 0 && !outcome.is_success() {
            if let Some(domain) = self.source.decoy_domain {
                info!(
                    "{}",
                    SourceError::Excluded {
                        domain: domain.to_string(),
                        count: ignored,
                    }
                );
            }
        }
        outcome
    }

    async fn drive(
        &mut self,
        browsing: &mut dyn BrowsingSession,
        signals: &mut mpsc::Receiver<SessionSignal>,
        url: &str,
    ) -> ExtractionOutcome {
        let source = self.source;
        self.transition(SessionState::Navigating);

        let prepare = async {
            browsing.navigate(url, source.navigation).await?;
            for step in source.interaction {
                debug!(?step, "interaction");
                browsing.perform(step).await?;
            }
            Ok::<(), NavigationError>(())
        };
        tokio::pin!(prepare);

        let prepared = tokio::select! {
            biased;
            signal = signals.recv() => return self.conclude(signal),
            prepared = &mut prepare => prepared,
        };

        if let Err(e) = prepared {
            // a capture that raced the failure still wins
            if let Ok(signal) = signals.try_recv() {
                return self.conclude(Some(signal));
            }
            return match e {
                NavigationError::TimedOut(limit) => {
                    self.transition(SessionState::TimedOut);
                    ExtractionOutcome::Timeout(limit)
                }
                NavigationError::Failed(cause) => {
                    self.transition(SessionState::SessionError);
                    ExtractionOutcome::SessionError(format!("{cause:#}"))
                }
            };
        }

        self.transition(SessionState::AwaitingCapture);
        let limit = source.capture_timeout.unwrap_or(self.capture_timeout);
        tokio::select! {
            biased;
            signal = signals.recv() => self.conclude(signal),
            () = tokio::time::sleep(limit) => {
                self.transition(SessionState::TimedOut);
                ExtractionOutcome::Timeout(limit)
            }
        }
    }

    fn conclude(&mut self, signal: Option<SessionSignal>) -> ExtractionOutcome {
        match signal {
            Some(SessionSignal::Captured(url)) => {
                self.transition(SessionState::Captured);
                ExtractionOutcome::Success(CapturedStream {
                    source_label: self.source.label(),
                    url,
                })
            }
            Some(SessionSignal::Fault(reason)) => {
                self.transition(SessionState::SessionError);
                ExtractionOutcome::SessionError(reason)
            }
            None => {
                self.transition(SessionState::NoUrl);
                ExtractionOutcome::NoUrlFound
            }
        }
    }

    async fn release(&mut self, browsing: Box<dyn BrowsingSession>) {
        self.transition(SessionState::Closed);
        if let Err(e) = browsing.close().await {
            debug!("close: {e:#}");
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_become(next) {
            warn!(from = ?self.state, to = ?next, "unexpected session transition");
        }
        debug!(from = ?self.state, to = ?next, "transition");
        self.state = next;
    }
}
