//! Chrome DevTools Protocol transport.
//!
//! Features:
//! - `ws://` for a locally launched browser, `wss://` with TLS 1.3 for
//!   remote endpoints
//! - Concurrent commands, correlated with their responses by id
//! - Flattened target sessions (`sessionId` on every message)
//! - Events delivered in order on a channel, separate from responses
//!
//! A reader task owns the socket's receiving half and a writer task owns the
//! sending half, so event handlers can issue commands without waiting for
//! the reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    Connector,
};
use tracing::{debug, trace, warn};

/// Ceiling for commands that have no timeout of their own.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// Protocol event, e.g. `Fetch.requestPaused`.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    /// Target session the event belongs to; `None` for browser-level events.
    pub session_id: Option<String>,
}

/// One decoded frame from the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    Event(CdpEvent),
}

#[derive(Deserialize)]
struct RawMessage {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<Value>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl Inbound {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage =
            serde_json::from_str(text).context("Invalid JSON in DevTools message")?;

        if let Some(id) = raw.id {
            let result = match raw.error {
                Some(error) => Err(error
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| error.to_string(), ToString::to_string)),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            return Ok(Inbound::Response { id, result });
        }

        let method = raw
            .method
            .ok_or_else(|| anyhow!("DevTools message has neither id nor method"))?;
        Ok(Inbound::Event(CdpEvent {
            method,
            params: raw.params,
            session_id: raw.session_id,
        }))
    }
}

/// Command payload as sent on the wire.
#[must_use]
pub fn command_payload(id: u64, method: &str, params: Value, session_id: Option<&str>) -> String {
    let mut command = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(session_id) = session_id {
        command["sessionId"] = json!(session_id);
    }
    command.to_string()
}

/// Live connection to a browser's DevTools endpoint.
pub struct CdpConnection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    url: String,
    command_timeout: Duration,
}

impl CdpConnection {
    /// Connect to a browser WebSocket URL (`ws://` or `wss://`).
    ///
    /// Returns the connection and the receiving end of its event stream. The
    /// event stream ends when the socket closes.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<CdpEvent>)> {
        let request = url
            .into_client_request()
            .context("Invalid DevTools WebSocket URL")?;

        let connector = if url.starts_with("wss://") {
            Some(tls_connector())
        } else {
            None
        };

        let (stream, response) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .with_context(|| format!("DevTools connection to {url} failed"))?;
        debug!("DevTools connected: {:?}", response.status());

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!("DevTools send failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let outgoing = outgoing.clone();
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match Inbound::parse(&text) {
                            Ok(Inbound::Response { id, result }) => {
                                let waiter = pending
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .remove(&id);
                                if let Some(waiter) = waiter {
                                    let _ = waiter.send(result);
                                }
                            }
                            Ok(Inbound::Event(event)) => {
                                trace!(method = %event.method, "DevTools event");
                                if events_tx.send(event).is_err() {
                                    // nobody listens to events any more; keep serving responses
                                    continue;
                                }
                            }
                            Err(e) => warn!("Dropping DevTools message: {e:#}"),
                        },
                        Ok(Message::Ping(data)) => {
                            let _ = outgoing.send(Message::Pong(data));
                        }
                        Ok(Message::Close(frame)) => {
                            debug!("DevTools socket closed: {frame:?}");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            debug!("DevTools receive failed: {e}");
                            break;
                        }
                    }
                }
                // wake every caller still waiting
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            })
        };

        Ok((
            Self {
                outgoing,
                pending,
                next_id: AtomicU64::new(0),
                reader,
                writer,
                url: url.to_string(),
                command_timeout: COMMAND_TIMEOUT,
            },
            events_rx,
        ))
    }

    /// Replace the [`COMMAND_TIMEOUT`] ceiling used by [`call`](Self::call).
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Send a command and wait up to the command ceiling for its result.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        self.call_within(method, params, session_id, Some(self.command_timeout))
            .await
    }

    /// Send a command and wait for its result; `None` waits indefinitely.
    pub async fn call_within(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        if self
            .outgoing
            .send(Message::Text(command_payload(id, method, params, session_id)))
            .is_err()
        {
            self.forget(id);
            bail!("DevTools connection closed before sending '{method}'");
        }

        let response = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(response) => response,
                Err(_) => {
                    self.forget(id);
                    bail!("Timeout ({limit:?}) waiting for DevTools response to '{method}'");
                }
            },
            None => rx.await,
        };

        response
            .map_err(|_| anyhow!("DevTools connection closed while waiting for '{method}'"))?
            .map_err(|e| anyhow!("'{method}' failed: {e}"))
    }

    /// Send a command without waiting for its result.
    pub fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.outgoing
            .send(Message::Text(command_payload(id, method, params, session_id)))
            .map_err(|_| anyhow!("DevTools connection closed before sending '{method}'"))
    }

    /// Close the socket and stop both tasks.
    pub async fn close(self) {
        let _ = self.outgoing.send(Message::Close(None));
        if tokio::time::timeout(Duration::from_secs(2), self.writer)
            .await
            .is_err()
        {
            debug!("DevTools writer did not finish in time");
        }
        self.reader.abort();
        debug!("DevTools connection to {} closed", self.url);
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// TLS connector trusting the platform's root certificates.
fn tls_connector() -> Connector {
    // Ensure crypto provider is installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    Connector::Rustls(Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates({
                let mut roots = rustls::RootCertStore::empty();
                let certs = rustls_native_certs::load_native_certs();
                for cert in certs.certs {
                    let _ = roots.add(cert);
                }
                roots
            })
            .with_no_client_auth(),
    ))
}
