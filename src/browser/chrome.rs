//! Chromium process management.
//!
//! Every session gets its own browser: a headless Chromium with a throwaway
//! profile directory, or, when a remote DevTools endpoint is configured, a
//! fresh browser context on that shared browser.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::cdp::CdpConnection;
use super::page::CdpPage;
use super::{BrowserLauncher, BrowsingSession, InterceptionPolicy};
use crate::config::BrowserConfig;

/// How long Chromium gets to print its DevTools banner.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// How long Chromium gets to exit after `Browser.close`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const BANNER_PREFIX: &str = "DevTools listening on ";

/// Executable names tried, in order, when none is configured.
const CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "headless_shell",
];

#[cfg(target_os = "macos")]
const MACOS_BUNDLES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// Flags every launched browser gets.
const BASE_ARGS: &[&str] = &[
    "--remote-debugging-port=0",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-web-security",
    "--disable-dev-shm-usage",
    "--disable-features=IsolateOrigins,site-per-process",
    "--enable-popup-blocking",
    "--no-first-run",
    "--no-default-browser-check",
    "--mute-audio",
];

#[derive(Debug, Clone)]
enum Backend {
    Local {
        executable: PathBuf,
        args: Vec<String>,
    },
    Remote {
        endpoint: String,
    },
}

/// [`BrowserLauncher`] backed by Chromium.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    backend: Backend,
    client: reqwest::Client,
}

impl ChromeLauncher {
    /// Build a launcher from configuration.
    ///
    /// Fails when no endpoint is configured and no Chromium executable can be
    /// found.
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        let backend = match &config.endpoint {
            Some(endpoint) => Backend::Remote {
                endpoint: endpoint.clone(),
            },
            None => {
                let executable = match &config.executable {
                    Some(path) => path.clone(),
                    None => find_chrome()?,
                };
                info!("Using browser at {}", executable.display());
                Backend::Local {
                    executable,
                    args: chrome_args(config.headless, &config.extra_args),
                }
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { backend, client })
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, policy: InterceptionPolicy) -> Result<Box<dyn BrowsingSession>> {
        match &self.backend {
            Backend::Local { executable, args } => {
                let (process, ws_url) = ChromeProcess::spawn(executable, args).await?;
                let (connection, events) = CdpConnection::connect(&ws_url).await?;
                let page = CdpPage::open(connection, events, policy, Some(process)).await?;
                Ok(Box::new(page))
            }
            Backend::Remote { endpoint } => {
                let ws_url = resolve_endpoint(&self.client, endpoint).await?;
                let (connection, events) = CdpConnection::connect(&ws_url).await?;
                let page = CdpPage::open(connection, events, policy, None).await?;
                Ok(Box::new(page))
            }
        }
    }
}

/// A running Chromium and its profile directory.
///
/// The process is killed if this is dropped without [`shutdown`](Self::shutdown).
pub struct ChromeProcess {
    child: Child,
    profile_dir: PathBuf,
}

impl ChromeProcess {
    /// Start Chromium and wait for its DevTools WebSocket URL.
    pub async fn spawn(executable: &Path, args: &[String]) -> Result<(Self, String)> {
        let profile_dir = std::env::temp_dir().join(format!("bytewatch-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .with_context(|| format!("Failed to create profile dir {}", profile_dir.display()))?;

        let mut child = Command::new(executable)
            .args(args)
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", executable.display()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Browser stderr was not captured"))?;

        // From here on the profile dir is cleaned up by Drop on every path.
        let mut process = Self { child, profile_dir };

        let ws_url = match tokio::time::timeout(STARTUP_TIMEOUT, wait_for_banner(stderr)).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                process.kill().await;
                return Err(e);
            }
            Err(_) => {
                process.kill().await;
                bail!("Browser did not report a DevTools endpoint within {STARTUP_TIMEOUT:?}");
            }
        };

        debug!(pid = process.child.id(), "Browser started: {ws_url}");
        Ok((process, ws_url))
    }

    /// Wait for a graceful exit, kill if it does not come, then remove the
    /// profile directory.
    pub async fn shutdown(mut self) {
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Browser exited: {status}"),
            Ok(Err(e)) => warn!("Failed to wait for browser: {e}"),
            Err(_) => {
                debug!("Browser still running after {SHUTDOWN_GRACE:?}, killing");
                self.kill().await;
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!("Profile dir {} not removed: {e}", self.profile_dir.display());
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("Failed to kill browser: {e}");
        }
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        let _ = std::fs::remove_dir_all(&self.profile_dir);
    }
}

/// Read stderr until the DevTools banner shows up, then keep draining it in
/// the background so the browser never blocks on a full pipe.
async fn wait_for_banner(stderr: ChildStderr) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = parse_devtools_banner(&line) {
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(target: "bytewatch::chrome", "{line}");
                }
            });
            return Ok(url);
        }
        trace!(target: "bytewatch::chrome", "{line}");
    }
    bail!("Browser exited before reporting a DevTools endpoint")
}

/// Extract the WebSocket URL from a `DevTools listening on ws://...` line.
#[must_use]
pub fn parse_devtools_banner(line: &str) -> Option<String> {
    let url = line.trim().strip_prefix(BANNER_PREFIX)?.trim();
    (url.starts_with("ws://") || url.starts_with("wss://")).then(|| url.to_string())
}

/// Command line for a local browser. `--user-data-dir` is added per launch.
#[must_use]
pub fn chrome_args(headless: bool, extra: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(BASE_ARGS.len() + extra.len() + 1);
    if headless {
        args.push("--headless=new".to_string());
    }
    args.extend(BASE_ARGS.iter().map(ToString::to_string));
    args.extend(extra.iter().cloned());
    args
}

/// Locate a Chromium executable on `PATH` (or in the usual app bundles on
/// macOS).
pub fn find_chrome() -> Result<PathBuf> {
    for name in CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    #[cfg(target_os = "macos")]
    for bundle in MACOS_BUNDLES {
        let path = Path::new(bundle);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    bail!(
        "No Chromium executable found (tried {}); set browser.executable or browser.endpoint",
        CANDIDATES.join(", ")
    )
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Turn a configured endpoint into a browser WebSocket URL.
///
/// `ws://`/`wss://` URLs are used as given; `http(s)://` endpoints are asked
/// via `/json/version`.
pub async fn resolve_endpoint(client: &reqwest::Client, endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }

    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to query {url}"))?;
    if !response.status().is_success() {
        bail!("{url} returned HTTP {}", response.status());
    }
    let info: VersionInfo = response
        .json()
        .await
        .with_context(|| format!("Unexpected response from {url}"))?;
    Ok(info.web_socket_debugger_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_parsing() {
        assert_eq!(
            parse_devtools_banner(
                "DevTools listening on ws://127.0.0.1:40123/devtools/browser/2f1c-aa"
            ),
            Some("ws://127.0.0.1:40123/devtools/browser/2f1c-aa".to_string())
        );
        assert_eq!(
            parse_devtools_banner("  DevTools listening on ws://127.0.0.1:1/x \r"),
            Some("ws://127.0.0.1:1/x".to_string())
        );
        let noise = "[0101/000000.000:ERROR:gpu_init.cc] Passthrough is not supported";
        assert_eq!(parse_devtools_banner(noise), None);
        assert_eq!(parse_devtools_banner("DevTools listening on nowhere"), None);
    }

    #[test]
    fn args_headless() {
        let args = chrome_args(true, &[]);
        assert_eq!(args[0], "--headless=new");
        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.contains(&"--enable-popup-blocking".to_string()));
        assert!(args.contains(&"--mute-audio".to_string()));
    }

    #[test]
    fn args_headful_with_extras() {
        let extra = vec!["--proxy-server=socks5://127.0.0.1:9050".to_string()];
        let args = chrome_args(false, &extra);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert_eq!(args.last(), Some(&extra[0]));
    }

    #[test]
    fn launcher_uses_configured_executable() {
        let config = BrowserConfig {
            executable: Some(PathBuf::from("/opt/chromium/chrome")),
            ..BrowserConfig::default()
        };
        let launcher = ChromeLauncher::new(&config).unwrap();
        match launcher.backend {
            Backend::Local { executable, .. } => {
                assert_eq!(executable, PathBuf::from("/opt/chromium/chrome"));
            }
            Backend::Remote { .. } => panic!("expected local backend"),
        }
    }

    #[test]
    fn launcher_prefers_endpoint() {
        let config = BrowserConfig {
            endpoint: Some("http://127.0.0.1:9222".to_string()),
            ..BrowserConfig::default()
        };
        let launcher = ChromeLauncher::new(&config).unwrap();
        assert!(matches!(launcher.backend, Backend::Remote { .. }));
    }

    #[tokio::test]
    async fn resolve_ws_endpoint_is_passthrough() {
        let client = reqwest::Client::new();
        let url = resolve_endpoint(&client, "ws://10.0.0.2:9222/devtools/browser/abc")
            .await
            .unwrap();
        assert_eq!(url, "ws://10.0.0.2:9222/devtools/browser/abc");
    }

    #[tokio::test]
    async fn resolve_http_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/json/version")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"Browser":"HeadlessChrome/131.0.0.0","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/xyz"}"#,
            )
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let url = resolve_endpoint(&client, &format!("{}/", server.url()))
            .await
            .unwrap();
        assert_eq!(url, "ws://127.0.0.1:9222/devtools/browser/xyz");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resolve_http_endpoint_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/json/version")
            .with_status(404)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        assert!(resolve_endpoint(&client, &server.url()).await.is_err());
    }
}
