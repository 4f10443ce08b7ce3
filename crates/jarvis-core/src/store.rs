//! Application state store
//!
//! A single owned object holding conversations, plugins, preferences and
//! notifications. Front-ends receive it by reference; there is no global
//! instance. The durable subset is written to a JSON file, which plays the role
//! browser local storage played for the web client.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::state::{ChatMessage, Conversation, Notification, NotificationKind, Plugin};

pub const DEFAULT_CONVERSATION_CAP: usize = 100;
pub const MAX_NOTIFICATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub voice_enabled: bool,
    pub animations: bool,
    pub notifications: bool,
    pub auto_save: bool,
    pub language: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            voice_enabled: true,
            animations: true,
            notifications: true,
            auto_save: true,
            language: "en-US".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Persisted {
    preferences: Preferences,
    conversations: Vec<Conversation>,
    plugins: Vec<Plugin>,
}

pub struct Store {
    path: Option<PathBuf>,
    conversation_cap: usize,
    preferences: Preferences,
    /// Most recent first
    conversations: VecDeque<Conversation>,
    current_conversation: Option<Uuid>,
    plugins: Vec<Plugin>,
    notifications: Vec<Notification>,
}

impl Store {
    /// A store that never touches disk
    pub fn in_memory(conversation_cap: usize) -> Self {
        Self {
            path: None,
            conversation_cap: conversation_cap.max(1),
            preferences: Preferences::default(),
            conversations: VecDeque::new(),
            current_conversation: None,
            plugins: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>, conversation_cap: usize) -> Self {
        let path = path.into();
        let mut store = Self::in_memory(conversation_cap);

        match Self::read(&path) {
            Ok(Some(persisted)) => {
                store.preferences = persisted.preferences;
                store.plugins = persisted.plugins;
                store.conversations = persisted.conversations.into();
                store.conversations.truncate(store.conversation_cap);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), "ignoring unreadable store: {e}"),
        }

        store.path = Some(path);
        store
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Config::data_dir()?.join("store.json"))
    }

    fn read(path: &Path) -> Result<Option<Persisted>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let persisted = Persisted {
            preferences: self.preferences.clone(),
            conversations: self.conversations.iter().cloned().collect(),
            plugins: self.plugins.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&persisted)?)?;
        Ok(())
    }

    fn autosave(&self) {
        if self.preferences.auto_save {
            if let Err(e) = self.save() {
                warn!("failed to persist store: {e}");
            }
        }
    }

    // Conversations

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub fn conversation(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current_conversation.and_then(|id| self.conversation(id))
    }

    /// Insert at the front, dropping the oldest entries beyond the cap
    pub fn add_conversation(&mut self, conversation: Conversation) {
        self.conversations.retain(|c| c.id != conversation.id);
        self.conversations.push_front(conversation);
        self.conversations.truncate(self.conversation_cap);
    }

    /// Append to the active conversation, creating one on first send.
    /// Returns the conversation id, which doubles as the backend session id.
    pub fn record(&mut self, message: ChatMessage) -> Uuid {
        let id = match self.current_conversation.filter(|id| self.conversation(*id).is_some()) {
            Some(id) => id,
            None => {
                let conversation = Conversation::new();
                let id = conversation.id;
                self.add_conversation(conversation);
                self.current_conversation = Some(id);
                id
            }
        };

        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.messages.push(message);
        }
        self.autosave();
        id
    }

    /// The next recorded message opens a fresh conversation
    pub fn new_conversation(&mut self) {
        self.current_conversation = None;
    }

    pub fn clear_conversations(&mut self) {
        self.conversations.clear();
        self.current_conversation = None;
        self.autosave();
    }

    // Plugins

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn set_plugins(&mut self, plugins: Vec<Plugin>) {
        self.plugins = plugins.into_iter().map(Plugin::normalized).collect();
        self.autosave();
    }

    /// Optimistic local toggle. Returns false if no plugin has that id.
    pub fn toggle_plugin(&mut self, id: &str, enabled: bool) -> bool {
        let Some(plugin) = self.plugins.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        plugin.enabled = enabled;
        self.autosave();
        true
    }

    pub fn remove_plugin(&mut self, id: &str) {
        self.plugins.retain(|p| p.id != id);
        self.autosave();
    }

    // Preferences

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
        self.autosave();
    }

    // Notifications

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn notify(
        &mut self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Option<Uuid> {
        if !self.preferences.notifications && kind != NotificationKind::Error {
            return None;
        }
        let notification = Notification::new(kind, title, message);
        let id = notification.id;
        self.notifications.push(notification);
        if self.notifications.len() > MAX_NOTIFICATIONS {
            let overflow = self.notifications.len() - MAX_NOTIFICATIONS;
            self.notifications.drain(..overflow);
        }
        Some(id)
    }

    pub fn dismiss(&mut self, id: Uuid) {
        self.notifications.retain(|n| n.id != id);
    }

    pub fn dismiss_oldest(&mut self) {
        if !self.notifications.is_empty() {
            self.notifications.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;
    use tempfile::TempDir;

    fn plugin(id: &str, enabled: bool) -> Plugin {
        Plugin {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            enabled,
            category: "system".to_string(),
            version: "1.0.0".to_string(),
            author: String::new(),
        }
    }

    #[test]
    fn test_conversation_cap_drops_oldest() {
        let mut store = Store::in_memory(100);
        let mut ids = Vec::new();
        for _ in 0..150 {
            let conversation = Conversation::new();
            ids.push(conversation.id);
            store.add_conversation(conversation);
            assert!(store.conversation_count() <= 100);
        }

        assert_eq!(store.conversation_count(), 100);
        // Most recent first, and the first 50 added are gone
        assert_eq!(store.conversations().next().unwrap().id, ids[149]);
        assert_eq!(store.conversations().last().unwrap().id, ids[50]);
        assert!(store.conversation(ids[49]).is_none());
    }

    #[test]
    fn test_record_creates_then_appends() {
        let mut store = Store::in_memory(10);
        let first = store.record(ChatMessage::user("hello", false));
        let second = store.record(ChatMessage::assistant("hi", None));
        assert_eq!(first, second);
        assert_eq!(store.conversation_count(), 1);
        let roles: Vec<ChatRole> = store
            .current_conversation()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);

        store.new_conversation();
        let third = store.record(ChatMessage::user("again", false));
        assert_ne!(first, third);
        assert_eq!(store.conversation_count(), 2);
    }

    #[test]
    fn test_record_after_active_conversation_evicted() {
        let mut store = Store::in_memory(1);
        let active = store.record(ChatMessage::user("one", false));
        store.add_conversation(Conversation::new());
        let next = store.record(ChatMessage::user("two", false));
        assert_ne!(active, next);
        assert_eq!(store.conversation_count(), 1);
    }

    #[test]
    fn test_toggle_plugin() {
        let mut store = Store::in_memory(10);
        store.set_plugins(vec![plugin("weather", false), plugin("system", true)]);
        assert!(store.toggle_plugin("weather", true));
        assert!(store.plugins()[0].enabled);
        assert!(!store.toggle_plugin("missing", true));
        store.remove_plugin("system");
        assert_eq!(store.plugins().len(), 1);
    }

    #[test]
    fn test_notifications_keep_newest_five() {
        let mut store = Store::in_memory(10);
        for i in 0..7 {
            store.notify(NotificationKind::Info, format!("n{i}"), "");
        }
        let titles: Vec<&str> = store.notifications().iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["n2", "n3", "n4", "n5", "n6"]);

        let id = store.notifications()[0].id;
        store.dismiss(id);
        store.dismiss_oldest();
        assert_eq!(store.notifications().len(), 3);
    }

    #[test]
    fn test_muted_notifications_still_show_errors() {
        let mut store = Store::in_memory(10);
        store.set_preferences(Preferences {
            notifications: false,
            ..Preferences::default()
        });
        assert!(store.notify(NotificationKind::Success, "ok", "").is_none());
        assert!(store.notify(NotificationKind::Error, "bad", "").is_some());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jarvis").join("store.json");

        let mut store = Store::open(&path, 10);
        store.set_plugins(vec![plugin("weather", true)]);
        store.record(ChatMessage::user("what time is it", false));
        store.notify(NotificationKind::Info, "transient", "");
        drop(store);

        let reopened = Store::open(&path, 10);
        assert_eq!(reopened.plugins().len(), 1);
        assert_eq!(reopened.conversation_count(), 1);
        assert!(reopened.notifications().is_empty());
        // A reopened store starts a fresh active conversation
        assert!(reopened.current_conversation().is_none());
    }

    #[test]
    fn test_saved_file_holds_only_durable_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let mut store = Store::open(&path, 10);
        store.record(ChatMessage::user("hello", false));
        store.notify(NotificationKind::Info, "transient", "");
        store.save().unwrap();

        let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let mut keys: Vec<&str> = saved.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        // Endpoint and other settings belong to Config
        assert_eq!(keys, vec!["conversations", "plugins", "preferences"]);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();

        let store = Store::open(&path, 10);
        assert_eq!(store.conversation_count(), 0);
        assert_eq!(store.preferences(), &Preferences::default());
    }
}
