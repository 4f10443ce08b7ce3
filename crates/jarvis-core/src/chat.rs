//! Chat dispatch
//!
//! `ChatPanel` holds the visible message log and the single-flight `loading`
//! flag. Requests run on a tokio task; the result is delivered through a
//! completion callback that is guaranteed to fire exactly once, even if the
//! task is aborted or panics.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{ChatReply, JarvisClient};
use crate::state::ChatMessage;

/// A user message accepted by the panel and waiting to be dispatched
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: u64,
    pub message: String,
    pub is_voice: bool,
}

/// Result of one round trip, `Err` carrying the display reason
pub type ChatOutcome = Result<ChatReply, String>;

#[derive(Debug, Default)]
pub struct ChatPanel {
    messages: Vec<ChatMessage>,
    loading: bool,
    next_request: u64,
    in_flight: Option<u64>,
}

impl ChatPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Accept a message for sending. Whitespace-only input and submissions
    /// while a request is in flight are refused.
    pub fn submit(&mut self, text: &str, is_voice: bool) -> Option<PendingRequest> {
        let message = text.trim();
        if message.is_empty() || self.loading {
            return None;
        }

        self.messages.push(ChatMessage::user(message, is_voice));
        self.loading = true;
        self.next_request += 1;
        self.in_flight = Some(self.next_request);

        Some(PendingRequest {
            id: self.next_request,
            message: message.to_string(),
            is_voice,
        })
    }

    /// Record the outcome of request `id`. Returns the appended message, or
    /// `None` if the outcome belongs to a request that is no longer current.
    pub fn complete(&mut self, id: u64, outcome: ChatOutcome) -> Option<&ChatMessage> {
        if self.in_flight != Some(id) {
            warn!(request = id, "discarding stale chat reply");
            return None;
        }
        self.in_flight = None;
        self.loading = false;

        let message = match outcome {
            Ok(reply) => ChatMessage::assistant(reply.text, reply.plugin_used),
            Err(reason) => ChatMessage::error(format!("Error: {reason}")),
        };
        self.messages.push(message);
        self.messages.last()
    }

    /// Forget the in-flight request; its reply will be discarded
    pub fn cancel(&mut self) {
        self.in_flight = None;
        self.loading = false;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.cancel();
    }
}

/// Calls `finish` exactly once. Dropping an unfinished guard reports the
/// request as cancelled.
pub struct CompletionGuard<F: FnOnce(ChatOutcome)> {
    finish: Option<F>,
}

impl<F: FnOnce(ChatOutcome)> CompletionGuard<F> {
    pub fn new(finish: F) -> Self {
        Self {
            finish: Some(finish),
        }
    }

    pub fn complete(mut self, outcome: ChatOutcome) {
        if let Some(finish) = self.finish.take() {
            finish(outcome);
        }
    }
}

impl<F: FnOnce(ChatOutcome)> Drop for CompletionGuard<F> {
    fn drop(&mut self) {
        if let Some(finish) = self.finish.take() {
            finish(Err("request cancelled".to_string()));
        }
    }
}

/// Send `request` to the backend on a new task
pub fn spawn_chat<F>(
    client: JarvisClient,
    request: &PendingRequest,
    session_id: Option<String>,
    finish: F,
) -> JoinHandle<()>
where
    F: FnOnce(ChatOutcome) + Send + 'static,
{
    // Built outside the future so an abort before first poll still reports
    let guard = CompletionGuard::new(finish);
    let message = request.message.clone();
    let id = request.id;

    tokio::spawn(async move {
        let outcome = client
            .chat(&message, session_id.as_deref())
            .await
            .map_err(|e| e.to_string());
        match &outcome {
            Ok(reply) => info!(request = id, plugin = ?reply.plugin_used, "chat reply received"),
            Err(e) => warn!(request = id, "chat request failed: {e}"),
        }
        guard.complete(outcome);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;
    use std::sync::{Arc, Mutex};

    fn reply(text: &str) -> ChatOutcome {
        Ok(ChatReply {
            text: text.to_string(),
            plugin_used: None,
        })
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let mut panel = ChatPanel::new();
        assert!(panel.submit("", false).is_none());
        assert!(panel.submit("   \t\n", false).is_none());
        assert!(panel.messages().is_empty());
        assert!(!panel.is_loading());
    }

    #[test]
    fn test_single_flight() {
        let mut panel = ChatPanel::new();
        let first = panel.submit("  status report ", false).unwrap();
        assert_eq!(first.message, "status report");
        assert!(panel.is_loading());
        assert!(panel.submit("another", false).is_none());
        assert_eq!(panel.messages().len(), 1);

        panel.complete(first.id, reply("All systems nominal"));
        assert!(!panel.is_loading());
        assert!(panel.submit("another", false).is_some());
    }

    #[test]
    fn test_failure_appends_one_error() {
        let mut panel = ChatPanel::new();
        let request = panel.submit("hello", false).unwrap();
        let appended = panel.complete(request.id, Err("HTTP 500".to_string())).unwrap();
        assert_eq!(appended.role, ChatRole::Error);
        assert_eq!(appended.content, "Error: HTTP 500");

        let errors = panel.messages().iter().filter(|m| m.role == ChatRole::Error).count();
        assert_eq!(errors, 1);
        assert!(!panel.is_loading());
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let mut panel = ChatPanel::new();
        let request = panel.submit("hello", false).unwrap();
        panel.cancel();
        assert!(panel.complete(request.id, reply("late")).is_none());
        assert_eq!(panel.messages().len(), 1);
    }

    #[test]
    fn test_guard_reports_cancellation_on_drop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let guard = CompletionGuard::new(move |outcome: ChatOutcome| sink.lock().unwrap().push(outcome));
        drop(guard);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Err("request cancelled".to_string()));
    }

    #[test]
    fn test_guard_fires_once() {
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let guard = CompletionGuard::new(move |_: ChatOutcome| *counter.lock().unwrap() += 1);
        guard.complete(reply("ok"));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_clears_loading() {
        let mut panel = ChatPanel::new();
        let request = panel.submit("hello", false).unwrap();
        // Port 9 (discard) is closed on test hosts, so the connect fails fast
        let client = JarvisClient::new("http://127.0.0.1:9/api/v1").unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_chat(client, &request, None, move |outcome| {
            let _ = tx.send(outcome);
        })
        .await
        .unwrap();

        let outcome = rx.await.unwrap();
        assert!(outcome.is_err());
        panel.complete(request.id, outcome);
        assert!(!panel.is_loading());
        assert_eq!(panel.messages().last().unwrap().role, ChatRole::Error);
    }

    #[tokio::test]
    async fn test_aborted_request_still_completes() {
        let mut panel = ChatPanel::new();
        let request = panel.submit("hello", false).unwrap();
        let client = JarvisClient::new("http://10.255.255.1/api/v1").unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = spawn_chat(client, &request, None, move |outcome| {
            let _ = tx.send(outcome);
        });
        handle.abort();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome, Err("request cancelled".to_string()));
        panel.complete(request.id, outcome);
        assert!(!panel.is_loading());
    }
}
