//! One intercepted page on a DevTools-driven browser.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::cdp::{CdpConnection, CdpEvent};
use super::chrome::ChromeProcess;
use super::{BrowsingSession, InterceptionPolicy, NavigationError, RequestAction};
use crate::fingerprint;
use crate::stream::source::{InteractionStep, NavigationPolicy};

/// Installed on every new document before any page script runs.
const POPUP_GUARD: &str = "window.open = () => null;";

const ISOLATED_WORLD: &str = "bytewatch";

/// Lifecycle milestone of one navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub loader_id: String,
    pub name: String,
}

/// Events of interest for one page, decoded from the raw protocol stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    RequestPaused { request_id: String, url: String },
    Dialog,
    Lifecycle(Lifecycle),
    Popup { target_id: String },
    Fault(String),
}

/// Pick out the events that concern the page identified by `session_id` and
/// `target_id`.
#[must_use]
pub fn route(event: &CdpEvent, session_id: &str, target_id: &str) -> Option<PageEvent> {
    let ours = event.session_id.as_deref() == Some(session_id);
    let params = &event.params;
    let text = |v: &Value| v.as_str().map(ToString::to_string);

    match event.method.as_str() {
        "Fetch.requestPaused" if ours => Some(PageEvent::RequestPaused {
            request_id: text(&params["requestId"])?,
            url: text(&params["request"]["url"])?,
        }),
        "Page.javascriptDialogOpening" if ours => Some(PageEvent::Dialog),
        "Page.lifecycleEvent" if ours => Some(PageEvent::Lifecycle(Lifecycle {
            loader_id: text(&params["loaderId"])?,
            name: text(&params["name"])?,
        })),
        "Inspector.targetCrashed" if ours => Some(PageEvent::Fault("target crashed".into())),
        "Inspector.detached" if ours => Some(PageEvent::Fault(format!(
            "inspector detached: {}",
            params["reason"].as_str().unwrap_or("unknown")
        ))),
        "Target.detachedFromTarget" if params["sessionId"].as_str() == Some(session_id) => {
            Some(PageEvent::Fault("page detached".into()))
        }
        "Target.targetCreated" => {
            let info = &params["targetInfo"];
            (info["type"] == "page" && info["openerId"].as_str() == Some(target_id))
                .then(|| text(&info["targetId"]))
                .flatten()
                .map(|target_id| PageEvent::Popup { target_id })
        }
        _ => None,
    }
}

/// Click script for `selector`, evaluated inside the frame's isolated world.
/// Evaluates to whether the element existed.
#[must_use]
pub fn click_script(selector: &str) -> String {
    let selector = Value::String(selector.to_string());
    format!(
        "(() => {{ const el = document.querySelector({selector}); \
         if (!el) return false; el.click(); return true; }})()"
    )
}

/// [`BrowsingSession`] over a flattened DevTools target session.
pub struct CdpPage {
    connection: Arc<CdpConnection>,
    session_id: String,
    target_id: String,
    context_id: String,
    lifecycle: mpsc::UnboundedReceiver<Lifecycle>,
    events: JoinHandle<()>,
    process: Option<ChromeProcess>,
}

impl CdpPage {
    /// Create an isolated context with one page in it, wire `policy` into
    /// request interception, and install the popup and dialog guards.
    ///
    /// `process` is the browser this page owns, if any; it is shut down on
    /// [`close`](BrowsingSession::close).
    pub async fn open(
        connection: CdpConnection,
        events: mpsc::UnboundedReceiver<CdpEvent>,
        policy: InterceptionPolicy,
        process: Option<ChromeProcess>,
    ) -> Result<Self> {
        let connection = Arc::new(connection);

        let context_id = connection
            .call("Target.createBrowserContext", json!({ "disposeOnDetach": true }), None)
            .await?["browserContextId"]
            .as_str()
            .ok_or_else(|| anyhow!("createBrowserContext returned no id"))?
            .to_string();

        let setup = Self::attach(&connection, &context_id).await;
        let (target_id, session_id) = match setup {
            Ok(ids) => ids,
            Err(e) => {
                dispose(&connection, &context_id, process.is_some()).await;
                release(connection, process).await;
                return Err(e);
            }
        };

        let (lifecycle_tx, lifecycle) = mpsc::unbounded_channel();
        let events = tokio::spawn(drive_events(
            Arc::clone(&connection),
            events,
            session_id.clone(),
            target_id.clone(),
            policy.clone(),
            lifecycle_tx,
        ));

        let page = Self {
            connection,
            session_id,
            target_id,
            context_id,
            lifecycle,
            events,
            process,
        };

        if let Err(e) = page.prepare().await {
            let source = policy.source();
            warn!(source, "Page setup failed: {e:#}");
            if let Err(close_err) = Box::new(page).close().await {
                debug!(source, "Close after failed setup: {close_err:#}");
            }
            return Err(e);
        }
        Ok(page)
    }

    async fn attach(connection: &CdpConnection, context_id: &str) -> Result<(String, String)> {
        connection
            .call("Target.setDiscoverTargets", json!({ "discover": true }), None)
            .await?;

        let target_id = connection
            .call(
                "Target.createTarget",
                json!({ "url": "about:blank", "browserContextId": context_id }),
                None,
            )
            .await?["targetId"]
            .as_str()
            .ok_or_else(|| anyhow!("createTarget returned no id"))?
            .to_string();

        let session_id = connection
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow!("attachToTarget returned no session"))?
            .to_string();

        Ok((target_id, session_id))
    }

    async fn prepare(&self) -> Result<()> {
        let profile = fingerprint::chrome_profile();

        self.call("Page.enable", json!({})).await?;
        self.call("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        self.call("Network.enable", json!({})).await?;
        self.call(
            "Emulation.setUserAgentOverride",
            json!({
                "userAgent": profile.user_agent,
                "acceptLanguage": profile.accept_language,
                "platform": profile.platform.navigator_platform(),
            }),
        )
        .await?;
        self.call(
            "Network.setExtraHTTPHeaders",
            json!({ "headers": profile.navigation_headers() }),
        )
        .await?;
        self.call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": POPUP_GUARD }),
        )
        .await?;
        self.call("Fetch.enable", json!({ "patterns": [{ "urlPattern": "*" }] }))
            .await?;
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.connection
            .call(method, params, Some(&self.session_id))
            .await
    }

    async fn wait_for_lifecycle(&mut self, loader_id: &str, event: &str) -> Result<()> {
        while let Some(seen) = self.lifecycle.recv().await {
            trace!(loader = %seen.loader_id, "lifecycle {}", seen.name);
            if seen.loader_id == loader_id && seen.name == event {
                return Ok(());
            }
        }
        bail!("browser connection closed during navigation")
    }

    async fn click_in_frame(&self, frame: &str, element: &str) -> Result<()> {
        let document = self.call("DOM.getDocument", json!({ "depth": 0 })).await?;
        let root = document["root"]["nodeId"]
            .as_i64()
            .ok_or_else(|| anyhow!("document has no root node"))?;

        let node = self
            .call(
                "DOM.querySelector",
                json!({ "nodeId": root, "selector": frame }),
            )
            .await?["nodeId"]
            .as_i64()
            .unwrap_or(0);
        if node == 0 {
            bail!("frame '{frame}' not found");
        }

        let described = self.call("DOM.describeNode", json!({ "nodeId": node })).await?;
        let frame_id = described["node"]["frameId"]
            .as_str()
            .ok_or_else(|| anyhow!("'{frame}' is not a frame"))?
            .to_string();

        let world = self
            .call(
                "Page.createIsolatedWorld",
                json!({ "frameId": frame_id, "worldName": ISOLATED_WORLD }),
            )
            .await?;
        let context = world["executionContextId"]
            .as_i64()
            .ok_or_else(|| anyhow!("no execution context for frame '{frame}'"))?;

        let evaluated = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": click_script(element),
                    "contextId": context,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;
        if let Some(exception) = evaluated.get("exceptionDetails") {
            bail!("click in '{frame}' threw: {}", exception["text"]);
        }
        if evaluated["result"]["value"] != json!(true) {
            bail!("element '{element}' not found in frame '{frame}'");
        }
        Ok(())
    }
}

#[async_trait]
impl BrowsingSession for CdpPage {
    async fn navigate(
        &mut self,
        url: &str,
        policy: NavigationPolicy,
    ) -> Result<(), NavigationError> {
        let milestone = policy.wait.lifecycle_event();
        debug!(%url, milestone, "navigating");

        let navigation = async {
            // bounded by the policy below, or not at all
            let response = self
                .connection
                .call_within(
                    "Page.navigate",
                    json!({ "url": url }),
                    Some(&self.session_id),
                    None,
                )
                .await?;
            if let Some(error) = response["errorText"].as_str() {
                bail!("navigation to {url} failed: {error}");
            }
            match response["loaderId"].as_str() {
                Some(loader_id) => {
                    let loader_id = loader_id.to_string();
                    self.wait_for_lifecycle(&loader_id, milestone).await
                }
                // same-document navigation, nothing to wait for
                None => Ok(()),
            }
        };

        match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, navigation).await {
                Ok(result) => result.map_err(NavigationError::from),
                Err(_) => Err(NavigationError::TimedOut(limit)),
            },
            None => navigation.await.map_err(NavigationError::from),
        }
    }

    async fn perform(&mut self, step: &InteractionStep) -> Result<()> {
        match step {
            InteractionStep::ClickInFrame { frame, element } => {
                self.click_in_frame(frame, element)
                    .await
                    .with_context(|| format!("click {element} in {frame}"))
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.events.abort();
        // the event task holds a connection handle until it has unwound
        let _ = (&mut this.events).await;

        let owned = this.process.is_some();
        let closed = this
            .connection
            .call(
                "Target.closeTarget",
                json!({ "targetId": this.target_id }),
                None,
            )
            .await
            .map(|_| ());
        dispose(&this.connection, &this.context_id, owned).await;
        release(this.connection, this.process).await;
        closed
    }
}

/// Drop the browser context; shut the whole browser down when we own it.
async fn dispose(connection: &CdpConnection, context_id: &str, owned: bool) {
    if let Err(e) = connection
        .call(
            "Target.disposeBrowserContext",
            json!({ "browserContextId": context_id }),
            None,
        )
        .await
    {
        debug!("disposeBrowserContext: {e:#}");
    }
    if owned {
        if let Err(e) = connection.send("Browser.close", json!({}), None) {
            debug!("Browser.close: {e:#}");
        }
    }
}

async fn release(connection: Arc<CdpConnection>, process: Option<ChromeProcess>) {
    match Arc::try_unwrap(connection) {
        Ok(connection) => connection.close().await,
        Err(_) => debug!("DevTools connection still shared at close"),
    }
    if let Some(process) = process {
        process.shutdown().await;
    }
}

/// Apply the interception policy and page guards to every event of the page
/// until the connection closes.
async fn drive_events(
    connection: Arc<CdpConnection>,
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    session_id: String,
    target_id: String,
    policy: InterceptionPolicy,
    lifecycle: mpsc::UnboundedSender<Lifecycle>,
) {
    let source = policy.source();
    while let Some(event) = events.recv().await {
        let Some(event) = route(&event, &session_id, &target_id) else {
            continue;
        };
        let sent = match event {
            PageEvent::RequestPaused { request_id, url } => {
                let (method, params) = match policy.decide(&url) {
                    RequestAction::Continue => {
                        ("Fetch.continueRequest", json!({ "requestId": request_id }))
                    }
                    RequestAction::Block => (
                        "Fetch.failRequest",
                        json!({ "requestId": request_id, "errorReason": "BlockedByClient" }),
                    ),
                    RequestAction::Captured => (
                        "Fetch.failRequest",
                        json!({ "requestId": request_id, "errorReason": "Aborted" }),
                    ),
                };
                connection.send(method, params, Some(&session_id))
            }
            PageEvent::Dialog => {
                debug!(source, "accepting dialog");
                connection.send(
                    "Page.handleJavaScriptDialog",
                    json!({ "accept": true }),
                    Some(&session_id),
                )
            }
            PageEvent::Lifecycle(milestone) => {
                // the page stops listening once navigation is over
                let _ = lifecycle.send(milestone);
                Ok(())
            }
            PageEvent::Popup { target_id } => {
                debug!(source, "closing popup {target_id}");
                connection.send("Target.closeTarget", json!({ "targetId": target_id }), None)
            }
            PageEvent::Fault(reason) => {
                policy.fault(reason);
                Ok(())
            }
        };
        if let Err(e) = sent {
            debug!(source, "{e:#}");
        }
    }
    policy.fault("browser connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::classifier::RequestClassifier;
    use crate::stream::source::NavigationWait;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    fn event(method: &str, params: Value, session: Option<&str>) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
            session_id: session.map(ToString::to_string),
        }
    }

    #[test]
    fn routes_paused_requests_of_own_session() {
        let paused = event(
            "Fetch.requestPaused",
            json!({
                "requestId": "interception-job-1.0",
                "request": { "url": "https://a.test/x.m3u8" },
            }),
            Some("S1"),
        );
        assert_eq!(
            route(&paused, "S1", "T1"),
            Some(PageEvent::RequestPaused {
                request_id: "interception-job-1.0".into(),
                url: "https://a.test/x.m3u8".into(),
            })
        );
        assert_eq!(route(&paused, "S2", "T2"), None);
    }

    #[test]
    fn routes_lifecycle() {
        let lifecycle = event(
            "Page.lifecycleEvent",
            json!({
                "frameId": "T1",
                "loaderId": "L7",
                "name": "networkAlmostIdle",
                "timestamp": 1.0,
            }),
            Some("S1"),
        );
        assert_eq!(
            route(&lifecycle, "S1", "T1"),
            Some(PageEvent::Lifecycle(Lifecycle {
                loader_id: "L7".into(),
                name: "networkAlmostIdle".into(),
            }))
        );
    }

    #[test]
    fn routes_popups_opened_by_our_page_only() {
        let ours = event(
            "Target.targetCreated",
            json!({ "targetInfo": { "targetId": "P1", "type": "page", "openerId": "T1" } }),
            None,
        );
        assert_eq!(
            route(&ours, "S1", "T1"),
            Some(PageEvent::Popup {
                target_id: "P1".into()
            })
        );

        let theirs = event(
            "Target.targetCreated",
            json!({ "targetInfo": { "targetId": "P2", "type": "page", "openerId": "T9" } }),
            None,
        );
        assert_eq!(route(&theirs, "S1", "T1"), None);

        let worker = event(
            "Target.targetCreated",
            json!({
                "targetInfo": { "targetId": "W1", "type": "service_worker", "openerId": "T1" },
            }),
            None,
        );
        assert_eq!(route(&worker, "S1", "T1"), None);
    }

    #[test]
    fn routes_faults() {
        let crashed = event("Inspector.targetCrashed", json!({}), Some("S1"));
        assert!(matches!(route(&crashed, "S1", "T1"), Some(PageEvent::Fault(_))));

        let detached = event(
            "Target.detachedFromTarget",
            json!({ "sessionId": "S1", "targetId": "T1" }),
            None,
        );
        assert_eq!(
            route(&detached, "S1", "T1"),
            Some(PageEvent::Fault("page detached".into()))
        );

        let other = event(
            "Target.detachedFromTarget",
            json!({ "sessionId": "S5" }),
            None,
        );
        assert_eq!(route(&other, "S1", "T1"), None);
    }

    #[test]
    fn routes_dialogs() {
        let dialog = event(
            "Page.javascriptDialogOpening",
            json!({ "type": "alert", "message": "hi" }),
            Some("S1"),
        );
        assert_eq!(route(&dialog, "S1", "T1"), Some(PageEvent::Dialog));
    }

    #[test]
    fn ignores_malformed_and_unrelated() {
        let malformed = event("Fetch.requestPaused", json!({ "requestId": 5 }), Some("S1"));
        assert_eq!(route(&malformed, "S1", "T1"), None);

        let unrelated = event("Network.requestWillBeSent", json!({}), Some("S1"));
        assert_eq!(route(&unrelated, "S1", "T1"), None);
    }

    #[test]
    fn click_script_quotes_selector() {
        let script = click_script("#pl_but");
        assert!(script.contains(r##"document.querySelector("#pl_but")"##));
        assert!(script.contains("el.click()"));

        let tricky = click_script(r#"a[title="x"]"#);
        assert!(tricky.contains(r#"document.querySelector("a[title=\"x\"]")"#));
    }

    /// DevTools endpoint that answers every command except `Page.navigate`.
    async fn unresponsive_navigation_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = socket.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let command: Value = serde_json::from_str(&text).unwrap();
                let result = match command["method"].as_str().unwrap_or_default() {
                    "Page.navigate" => continue,
                    "Target.createBrowserContext" => json!({ "browserContextId": "C1" }),
                    "Target.createTarget" => json!({ "targetId": "T1" }),
                    "Target.attachToTarget" => json!({ "sessionId": "S1" }),
                    _ => json!({}),
                };
                let reply = json!({ "id": command["id"], "result": result });
                if socket.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
        });
        format!("ws://{addr}")
    }

    async fn open_page(command_timeout: Duration) -> CdpPage {
        let url = unresponsive_navigation_endpoint().await;
        let (connection, events) = CdpConnection::connect(&url).await.unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let classifier = Arc::new(RequestClassifier::default());
        let policy = InterceptionPolicy::new(classifier, "vidify", tx);
        CdpPage::open(connection.with_command_timeout(command_timeout), events, policy, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn navigation_without_ceiling_outlasts_command_timeout() {
        let mut page = open_page(Duration::from_millis(250)).await;
        let policy = NavigationPolicy {
            wait: NavigationWait::Load,
            timeout: None,
        };

        let outcome = tokio::time::timeout(
            Duration::from_millis(1500),
            page.navigate("https://vidify.top/embed/movie/278", policy),
        )
        .await;

        assert!(outcome.is_err(), "navigation gave up by itself: {outcome:?}");
        Box::new(page).close().await.unwrap();
    }

    #[tokio::test]
    async fn navigation_ceiling_reports_timed_out() {
        let mut page = open_page(Duration::from_secs(5)).await;
        let limit = Duration::from_millis(100);
        let policy = NavigationPolicy {
            wait: NavigationWait::NetworkAlmostIdle,
            timeout: Some(limit),
        };

        let result = page
            .navigate("https://vidsrc.xyz/embed/movie/278", policy)
            .await;

        assert!(matches!(result, Err(NavigationError::TimedOut(l)) if l == limit));
        Box::new(page).close().await.unwrap();
    }
}
