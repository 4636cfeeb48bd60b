//! A minimal Chrome DevTools Protocol client.
//!
//! One WebSocket per browser. Commands are matched to their responses by
//! id; events fan out to every subscriber. Page-level commands carry the
//! flat-mode `sessionId` of the tab they target.

use futures_util::{SinkExt, StreamExt};
use quire_render_core::RenderError;
use quire_types::RenderMethod;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const EVENT_BUFFER: usize = 1024;

type Reply = Result<Value, String>;

/// An unsolicited message from the browser.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub method: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<Failure>,
    method: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct Failure {
    code: i64,
    message: String,
}

struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    events: Mutex<Option<broadcast::Sender<Event>>>,
    closed: AtomicBool,
}

impl Shared {
    fn route(&self, text: &str) {
        let incoming: Incoming = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                log::debug!("[RENDER] Ignoring malformed DevTools message: {}", e);
                return;
            }
        };

        if let Some(id) = incoming.id {
            let waiter = self.pending.lock().ok().and_then(|mut p| p.remove(&id));
            if let Some(waiter) = waiter {
                let reply = match incoming.error {
                    Some(failure) => Err(format!("{} ({})", failure.message, failure.code)),
                    None => Ok(incoming.result.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(reply);
            }
            return;
        }

        if let Some(method) = incoming.method {
            let events = self.events.lock().ok().and_then(|e| e.clone());
            if let Some(events) = events {
                let _ = events.send(Event {
                    method,
                    session_id: incoming.session_id,
                    params: incoming.params,
                });
            }
        }
    }

    /// Fails every outstanding command and ends every subscription.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        if let Ok(mut events) = self.events.lock() {
            events.take();
        }
    }
}

pub struct CdpConnection {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpConnection")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn closed() -> RenderError {
    RenderError::failed(RenderMethod::Browser, "browser connection closed")
}

impl CdpConnection {
    /// Connects to a browser's DevTools WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self, RenderError> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            RenderError::failed(RenderMethod::Browser, format!("cannot reach DevTools at {}: {}", url, e))
        })?;

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
        });
        let (outgoing, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(socket, rx, shared.clone()));

        Ok(Self {
            next_id: AtomicU64::new(1),
            outgoing,
            shared,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Subscribe before sending the command whose events you need.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Event>, RenderError> {
        self.shared
            .events
            .lock()
            .ok()
            .and_then(|events| events.as_ref().map(broadcast::Sender::subscribe))
            .ok_or_else(closed)
    }

    /// Sends a command and waits for its result.
    pub async fn call(&self, session: Option<&str>, method: &str, params: Value) -> Result<Value, RenderError> {
        if self.is_closed() {
            return Err(closed());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.insert(id, tx);
        }
        if self.send(id, session, method, params).is_err() {
            self.forget(id);
            return Err(closed());
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(RenderError::failed(
                RenderMethod::Browser,
                format!("{} failed: {}", method, message),
            )),
            Ok(Err(_)) => Err(closed()),
            Err(_) => {
                self.forget(id);
                Err(RenderError::Timeout {
                    method: RenderMethod::Browser,
                    after: COMMAND_TIMEOUT,
                })
            }
        }
    }

    /// Sends a command without waiting. Its response is dropped.
    pub fn notify(&self, session: Option<&str>, method: &str, params: Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.send(id, session, method, params);
    }

    fn send(&self, id: u64, session: Option<&str>, method: &str, params: Value) -> Result<(), RenderError> {
        let mut command = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session {
            command["sessionId"] = Value::from(session);
        }
        self.outgoing
            .send(Message::Text(command.to_string()))
            .map_err(|_| closed())
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.remove(&id);
        }
    }
}

/// Waits for the next `method` event of `session`.
pub async fn next_event(
    events: &mut broadcast::Receiver<Event>,
    session: &str,
    method: &str,
) -> Result<Event, RenderError> {
    loop {
        match events.recv().await {
            Ok(event) if event.method == method && event.session_id.as_deref() == Some(session) => {
                return Ok(event);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("[RENDER] Skipped {} DevTools events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Err(closed()),
        }
    }
}

/// Pumps the socket until either side goes away.
async fn drive<S>(mut socket: S, mut outgoing: mpsc::UnboundedReceiver<Message>, shared: Arc<Shared>)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => {
                    if let Err(e) = socket.send(message).await {
                        log::warn!("[RENDER] DevTools send failed: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = socket.close().await;
                    break;
                }
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.route(&text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("[RENDER] DevTools connection failed: {}", e);
                    break;
                }
            },
        }
    }
    shared.close();
    log::debug!("[RENDER] DevTools connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (Shared, broadcast::Receiver<Event>) {
        let (events, rx) = broadcast::channel(8);
        let shared = Shared {
            pending: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
        };
        (shared, rx)
    }

    #[tokio::test]
    async fn responses_reach_their_caller() {
        let (shared, _events) = shared();
        let (ok_tx, ok_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();
        shared.pending.lock().unwrap().extend([(1, ok_tx), (2, err_tx)]);

        shared.route(r#"{"id":2,"error":{"code":-32000,"message":"No target"}}"#);
        shared.route(r#"{"id":1,"result":{"targetId":"T1"}}"#);

        assert_eq!(ok_rx.await.unwrap().unwrap()["targetId"], "T1");
        assert_eq!(err_rx.await.unwrap().unwrap_err(), "No target (-32000)");
        assert!(shared.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_are_filtered_by_session() {
        let (shared, mut events) = shared();
        shared.route(r#"{"method":"Page.loadEventFired","sessionId":"other","params":{}}"#);
        shared.route(r#"not json"#);
        shared.route(r#"{"method":"Page.loadEventFired","sessionId":"S1","params":{"timestamp":1.5}}"#);

        let event = next_event(&mut events, "S1", "Page.loadEventFired").await.unwrap();
        assert_eq!(event.params["timestamp"], 1.5);
    }

    #[tokio::test]
    async fn closing_ends_waiters() {
        let (shared, mut events) = shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(7, tx);

        shared.close();
        assert!(rx.await.is_err());
        assert!(next_event(&mut events, "S1", "Page.loadEventFired").await.is_err());
    }
}
