//! WebSocket push channel with bounded reconnect backoff

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::api::SystemHealth;
use crate::state::SystemMetrics;

pub const SYSTEM_METRICS: &str = "system_metrics";

/// `{type, payload}` message. The backend names the body `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
}

/// Metrics carried by a `system_metrics` push
pub fn metrics_from_payload(payload: &Value) -> Option<SystemMetrics> {
    serde_json::from_value::<SystemHealth>(payload.clone())
        .ok()
        .map(SystemMetrics::from)
}

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max_attempts: u32,
    attempts: u32,
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 1.5, 5)
    }
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max_attempts,
            attempts: 0,
            delay: base,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.attempts += 1;
        self.delay = self.delay.mul_f64(self.factor);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.base;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Per-type subscriber registry, shared between the socket task and callers
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<HashMap<String, Vec<(ListenerId, Callback)>>>>,
    next_id: Arc<AtomicU64>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .entry(kind.to_string())
                .or_default()
                .push((id, Arc::new(callback)));
        }
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        for callbacks in inner.values_mut() {
            if let Some(pos) = callbacks.iter().position(|(cid, _)| *cid == id) {
                callbacks.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver to every listener of the envelope's type. Returns how many ran.
    pub fn emit(&self, envelope: &Envelope) -> usize {
        // Callbacks run without the lock held so they may subscribe or unsubscribe
        let callbacks: Vec<Callback> = match self.inner.lock() {
            Ok(inner) => inner
                .get(&envelope.kind)
                .map(|cbs| cbs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };
        for callback in &callbacks {
            callback(&envelope.payload);
        }
        callbacks.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    GaveUp,
}

/// Handle to the background socket task. Dropping it closes the channel.
pub struct PushClient {
    outbound: mpsc::UnboundedSender<Envelope>,
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PushClient {
    pub fn spawn<F>(url: String, backoff: Backoff, listeners: Listeners, on_status: F) -> Self
    where
        F: Fn(PushEvent) + Send + Sync + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(
            url,
            backoff,
            listeners,
            open.clone(),
            outbound_rx,
            on_status,
        ));
        Self {
            outbound,
            open,
            task,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a message. Dropped unless the socket is currently open.
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        if !self.is_open() {
            debug!(kind, "push channel closed, dropping outbound message");
            return false;
        }
        self.outbound
            .send(Envelope {
                kind: kind.to_string(),
                payload,
            })
            .is_ok()
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<F>(
    url: String,
    mut backoff: Backoff,
    listeners: Listeners,
    open: Arc<AtomicBool>,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    on_status: F,
) where
    F: Fn(PushEvent) + Send + Sync + 'static,
{
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(%url, "push channel connected");
                backoff.reset();
                // Anything queued against the previous socket is stale
                while outbound_rx.try_recv().is_ok() {}
                open.store(true, Ordering::SeqCst);
                on_status(PushEvent::Connected);

                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        incoming = source.next() => match incoming {
                            Some(Ok(Message::Text(text))) => dispatch(&listeners, &text),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("push channel read error: {e}");
                                break;
                            }
                        },
                        outgoing = outbound_rx.recv() => match outgoing {
                            Some(envelope) => {
                                let text = match serde_json::to_string(&envelope) {
                                    Ok(text) => text,
                                    Err(e) => {
                                        warn!("failed to encode push message: {e}");
                                        continue;
                                    }
                                };
                                if let Err(e) = sink.send(Message::Text(text)).await {
                                    warn!("push channel write error: {e}");
                                    break;
                                }
                            }
                            None => {
                                let _ = sink.close().await;
                                open.store(false, Ordering::SeqCst);
                                return;
                            }
                        },
                    }
                }

                open.store(false, Ordering::SeqCst);
                info!("push channel disconnected");
                on_status(PushEvent::Disconnected);
            }
            Err(e) => warn!(%url, "push channel connect failed: {e}"),
        }

        match backoff.next_delay() {
            Some(delay) => {
                let attempt = backoff.attempts();
                debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting push channel");
                on_status(PushEvent::Reconnecting { attempt, delay });
                tokio::time::sleep(delay).await;
            }
            None => {
                info!("push channel gave up after {} attempts", backoff.attempts());
                on_status(PushEvent::GaveUp);
                return;
            }
        }
    }
}

fn dispatch(listeners: &Listeners, text: &str) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => {
            let delivered = listeners.emit(&envelope);
            debug!(kind = %envelope.kind, delivered, "push message");
        }
        Err(e) => debug!("ignoring malformed push message: {e}"),
    }
}
