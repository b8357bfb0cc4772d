//! Scripted browser for tests: replays canned request URLs through the
//! interception policy instead of loading real pages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{BrowserLauncher, BrowsingSession, InterceptionPolicy, NavigationError};
use crate::stream::source::{InteractionStep, NavigationPolicy};

/// What navigation does after its delay.
#[derive(Debug, Clone, Default)]
pub enum NavigationScript {
    #[default]
    Loads,
    Fails(String),
    /// Never settles; only the navigation ceiling ends it.
    Hangs,
}

/// Behaviour of one source's page.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub launch_error: Option<String>,
    /// Time the page takes before issuing its requests.
    pub delay: Duration,
    /// Requests issued during navigation, in order.
    pub requests: Vec<String>,
    pub navigation: NavigationScript,
    pub interaction_error: Option<String>,
    /// Requests issued once every interaction step succeeded.
    pub after_interaction: Vec<String>,
    /// Fault raised after navigation.
    pub fault: Option<String>,
    /// Drop the interception policy after navigation, as a page whose
    /// browser went away silently.
    pub hang_up: bool,
}

#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: HashMap<&'static str, PageScript>,
    pub launches: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub steps: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, source: &'static str, script: PageScript) -> Self {
        self.scripts.insert(source, script);
        self
    }

    pub fn launched(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, policy: InterceptionPolicy) -> Result<Box<dyn BrowsingSession>> {
        let script = self
            .scripts
            .get(policy.source())
            .cloned()
            .unwrap_or_default();
        if let Some(error) = &script.launch_error {
            bail!("{error}");
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            policy: Some(policy),
            script,
            closes: Arc::clone(&self.closes),
            steps: Arc::clone(&self.steps),
        }))
    }
}

struct ScriptedSession {
    policy: Option<InterceptionPolicy>,
    script: PageScript,
    closes: Arc<AtomicUsize>,
    steps: Arc<AtomicUsize>,
}

impl ScriptedSession {
    fn issue(&self, urls: &[String]) {
        if let Some(policy) = &self.policy {
            for url in urls {
                policy.decide(url);
            }
        }
    }

    async fn load(&mut self) -> Result<(), NavigationError> {
        tokio::time::sleep(self.script.delay).await;
        self.issue(&self.script.requests);
        match &self.script.navigation {
            NavigationScript::Loads => {}
            NavigationScript::Fails(reason) => {
                return Err(NavigationError::Failed(anyhow::anyhow!("{reason}")))
            }
            NavigationScript::Hangs => std::future::pending::<()>().await,
        }
        if let Some(reason) = &self.script.fault {
            if let Some(policy) = &self.policy {
                policy.fault(reason.clone());
            }
        }
        if self.script.hang_up {
            self.policy = None;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowsingSession for ScriptedSession {
    async fn navigate(
        &mut self,
        _url: &str,
        policy: NavigationPolicy,
    ) -> Result<(), NavigationError> {
        match policy.timeout {
            Some(limit) => tokio::time::timeout(limit, self.load())
                .await
                .unwrap_or(Err(NavigationError::TimedOut(limit))),
            None => self.load().await,
        }
    }

    async fn perform(&mut self, _step: &InteractionStep) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.script.interaction_error {
            bail!("{error}");
        }
        self.issue(&self.script.after_interaction);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
