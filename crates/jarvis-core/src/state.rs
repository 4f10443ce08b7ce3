//! UI-agnostic application state types
//!
//! This module contains data structures that are shared between the chat log,
//! the persisted store and whatever front-end renders them. None of them depend
//! on a specific UI framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Error,
}

/// A single entry in the chat log. Messages are appended and never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_voice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_used: Option<String>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_voice: false,
            plugin_used: None,
        }
    }

    pub fn user(content: impl Into<String>, is_voice: bool) -> Self {
        Self {
            is_voice,
            ..Self::new(ChatRole::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>, plugin_used: Option<String>) -> Self {
        Self {
            plugin_used,
            ..Self::new(ChatRole::Assistant, content)
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Error, content)
    }
}

/// An ordered exchange with the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub timestamp: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Short label for history lists: the first user utterance, truncated
    pub fn title(&self) -> String {
        let first = self
            .messages
            .iter()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(empty)");
        let mut title: String = first.chars().take(40).collect();
        if first.chars().count() > 40 {
            title.push_str("...");
        }
        title
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Reachability of the assistant backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendStatus {
    #[default]
    Checking,
    Online,
    Offline,
}

impl BackendStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BackendStatus::Checking => "CHECKING",
            BackendStatus::Online => "ONLINE",
            BackendStatus::Offline => "OFFLINE",
        }
    }
}

/// Latest host metrics reported by the backend. Each sample replaces the last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub timestamp: DateTime<Utc>,
}

impl SystemMetrics {
    pub fn new(cpu: f64, memory: f64, disk: f64) -> Self {
        Self {
            cpu: clamp_percent(cpu),
            memory: clamp_percent(memory),
            disk: clamp_percent(disk),
            timestamp: Utc::now(),
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// A backend plugin as listed by `GET /plugins`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
}

impl Plugin {
    /// The backend keys plugins by name and may omit `id`
    pub fn normalized(mut self) -> Self {
        if self.id.is_empty() {
            self.id = self.name.clone();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Info,
    Warning,
    Error,
}

/// Dismissible toast shown over the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_clamped_to_percentages() {
        let metrics = SystemMetrics::new(120.0, -3.0, f64::NAN);
        assert_eq!(metrics.cpu, 100.0);
        assert_eq!(metrics.memory, 0.0);
        assert_eq!(metrics.disk, 0.0);
    }

    #[test]
    fn test_plugin_without_id_uses_name() {
        let plugin: Plugin = serde_json::from_str(
            r#"{"name": "WeatherPlugin", "description": "Weather information", "enabled": true, "version": "1.0.0"}"#,
        )
        .unwrap();
        let plugin = plugin.normalized();
        assert_eq!(plugin.id, "WeatherPlugin");
        assert!(plugin.enabled);
        assert!(plugin.author.is_empty());
    }

    #[test]
    fn test_conversation_title_truncates() {
        let mut conversation = Conversation::new();
        conversation.messages.push(ChatMessage::user("x".repeat(50), false));
        assert_eq!(conversation.title(), format!("{}...", "x".repeat(40)));
    }

    #[test]
    fn test_message_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::error("Error: HTTP 500")).unwrap();
        assert!(json.contains(r#""role":"error""#));
        assert!(!json.contains("plugin_used"));
    }
}
