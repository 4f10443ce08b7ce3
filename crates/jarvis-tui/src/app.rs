use std::collections::VecDeque;
use std::time::Instant;

use jarvis_core::speech::{RecognitionEvent, SpeechRecognizer, SpeechSynthesizer, SynthesisError};
use jarvis_core::ws::{metrics_from_payload, SYSTEM_METRICS};
use jarvis_core::{
    spawn_chat, AudioLevel, Backoff, BackendStatus, BootSequence, ChatMessage, ChatOutcome, ChatPanel,
    ChatRole, Config, Conversation, JarvisClient, Listeners, NotificationKind, PendingRequest, PollEvent, Pollers,
    PushClient, PushEvent, Scene, Store, SystemMetrics, VoiceEffect, VoiceMachine, VoiceState,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::widgets::ListState;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tui::{AppEvent, EventSender};

/// Samples kept for the metrics sparklines
pub const METRICS_HISTORY: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Boot,
    Dashboard,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub config: Config,
    client: JarvisClient,
    events: EventSender,

    // Backend
    pub status: BackendStatus,
    pub metrics: Option<SystemMetrics>,
    pub cpu_history: VecDeque<u64>,
    pub memory_history: VecDeque<u64>,
    _pollers: Option<Pollers>,
    push: Option<PushClient>,

    // Chat
    pub chat: ChatPanel,
    pub store: Store,
    pending: Option<PendingRequest>,
    chat_task: Option<JoinHandle<()>>,
    pub input: String,
    pub cursor: usize,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Voice
    pub voice: VoiceMachine,
    recognizer: Box<dyn SpeechRecognizer>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    recognition_session: u64,
    utterance: u64,
    mic_level: Option<f32>,
    pub level: AudioLevel,
    rng: StdRng,

    // Animation
    pub boot: BootSequence,
    pub scene: Scene,
    started: Instant,
    last_tick: Instant,
    pub animation_frame: u8,

    // Popups
    pub alert: Option<String>,
    pub show_plugins: bool,
    pub plugins_state: ListState,
    pub show_history: bool,
    pub history_state: ListState,
    /// Saved conversation shown read-only in place of the live chat
    pub viewing: Option<Conversation>,
}

impl App {
    pub fn new(
        config: Config,
        store: Store,
        client: JarvisClient,
        recognizer: Box<dyn SpeechRecognizer>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        events: EventSender,
    ) -> Self {
        let audio_enabled = config.audio_enabled && store.preferences().voice_enabled;
        let voice = VoiceMachine::new(recognizer.is_supported(), audio_enabled);
        let mut boot = BootSequence::new();
        let screen = if config.skip_boot {
            boot.skip();
            Screen::Dashboard
        } else {
            Screen::Boot
        };
        let now = Instant::now();

        let mut app = Self {
            should_quit: false,
            screen,
            config,
            client,
            events,

            status: BackendStatus::Checking,
            metrics: None,
            cpu_history: VecDeque::with_capacity(METRICS_HISTORY),
            memory_history: VecDeque::with_capacity(METRICS_HISTORY),
            _pollers: None,
            push: None,

            chat: ChatPanel::new(),
            store,
            pending: None,
            chat_task: None,
            input: String::new(),
            cursor: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            voice,
            recognizer,
            synthesizer,
            recognition_session: 0,
            utterance: 0,
            mic_level: None,
            level: AudioLevel::new(),
            rng: StdRng::from_entropy(),

            boot,
            scene: Scene::new(rand::random()),
            started: now,
            last_tick: now,
            animation_frame: 0,

            alert: None,
            show_plugins: false,
            plugins_state: ListState::default(),
            show_history: false,
            history_state: ListState::default(),
            viewing: None,
        };

        if !app.voice.recognizer_supported() && app.config.voice_enabled {
            app.notify(
                NotificationKind::Warning,
                "Voice Input",
                "No microphone available. Voice commands are disabled.",
            );
        }
        if !app.synthesizer.is_supported() && app.voice.audio_enabled() {
            app.notify(
                NotificationKind::Info,
                "Speech Output",
                "No text-to-speech command found. Replies will not be spoken.",
            );
        }
        app
    }

    /// Start health/metrics polling, the push channel and the plugin fetch
    pub fn connect(&mut self) {
        let events = self.events.clone();
        self._pollers = Some(Pollers::spawn(
            self.client.clone(),
            self.config.health_interval(),
            self.config.metrics_interval(),
            move |event| {
                let _ = events.send(AppEvent::Poll(event));
            },
        ));

        let listeners = Listeners::new();
        let events = self.events.clone();
        listeners.on(SYSTEM_METRICS, move |payload| match metrics_from_payload(payload) {
            Some(metrics) => {
                let _ = events.send(AppEvent::PushMetrics(metrics));
            }
            None => debug!("ignoring malformed metrics push"),
        });
        let events = self.events.clone();
        self.push = Some(PushClient::spawn(
            self.config.ws_url(),
            Backoff::default(),
            listeners,
            move |event| {
                let _ = events.send(AppEvent::Push(event));
            },
        ));

        self.load_plugins();
    }

    // Event dispatch for background results

    pub fn on_poll(&mut self, event: PollEvent) {
        match event {
            PollEvent::Status(status) => self.set_status(status),
            PollEvent::Metrics(metrics) => self.set_metrics(metrics),
        }
    }

    fn set_status(&mut self, status: BackendStatus) {
        let previous = self.status;
        self.status = status;
        match (previous, status) {
            (BackendStatus::Online, BackendStatus::Offline) => {
                self.notify(NotificationKind::Error, "Backend Offline", "Lost connection to the J.A.R.V.I.S. backend.");
            }
            (BackendStatus::Offline, BackendStatus::Online) => {
                self.notify(NotificationKind::Success, "Backend Online", "Connection restored.");
            }
            _ => {}
        }
        if status == BackendStatus::Online && previous != BackendStatus::Online && self.store.plugins().is_empty() {
            self.load_plugins();
        }
    }

    /// Replace the metrics snapshot and extend the sparkline window
    pub fn set_metrics(&mut self, metrics: SystemMetrics) {
        push_sample(&mut self.cpu_history, metrics.cpu);
        push_sample(&mut self.memory_history, metrics.memory);
        self.metrics = Some(metrics);
    }

    pub fn on_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected => info!("push channel connected"),
            PushEvent::Disconnected => debug!("push channel disconnected"),
            PushEvent::Reconnecting { attempt, delay } => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "push channel reconnecting");
            }
            PushEvent::GaveUp => {
                self.notify(NotificationKind::Warning, "Live Updates", "Push channel unavailable. Falling back to polling.");
            }
        }
    }

    pub fn push_open(&self) -> bool {
        self.push.as_ref().is_some_and(|push| push.is_open())
    }

    // Chat

    /// Send `text` to the backend. Returns false when nothing was sent.
    pub fn send_message(&mut self, text: &str, is_voice: bool) -> bool {
        let Some(request) = self.chat.submit(text, is_voice) else {
            return false;
        };
        if let Some(user) = self.chat.messages().last() {
            self.store.record(user.clone());
        }

        let session_id = self.store.current_conversation().map(|c| c.id.to_string());
        let events = self.events.clone();
        let id = request.id;
        self.chat_task = Some(spawn_chat(
            self.client.clone(),
            &request,
            session_id,
            move |outcome| {
                let _ = events.send(AppEvent::ChatDone { id, outcome });
            },
        ));
        self.pending = Some(request);
        self.scroll_chat_to_bottom();
        true
    }

    /// Submit the input line and clear it on success
    pub fn submit_input(&mut self) {
        let text = self.input.clone();
        if self.send_message(&text, false) {
            self.input.clear();
            self.cursor = 0;
        }
    }

    pub fn on_chat_done(&mut self, id: u64, outcome: ChatOutcome) {
        let failure = outcome.as_ref().err().cloned();
        let Some(appended) = self.chat.complete(id, outcome).cloned() else {
            return;
        };
        self.chat_task = None;
        let is_voice = self
            .pending
            .take()
            .is_some_and(|request| request.id == id && request.is_voice);
        self.store.record(appended.clone());

        if let Some(reason) = failure {
            self.notify(NotificationKind::Error, "Request Failed", reason);
        }

        let reply = (appended.role == ChatRole::Assistant).then_some(appended.content.as_str());
        let effects = if is_voice {
            self.voice.on_response_ready(reply)
        } else {
            reply.map(|text| self.voice.speak_reply(text)).unwrap_or_default()
        };
        self.apply_effects(effects);
        self.scroll_chat_to_bottom();
    }

    /// Drop the in-flight request, if any
    fn cancel_chat(&mut self) {
        if let Some(task) = self.chat_task.take() {
            task.abort();
        }
        self.chat.cancel();
        if self.pending.take().is_some_and(|request| request.is_voice) {
            let effects = self.voice.on_response_ready(None);
            self.apply_effects(effects);
        }
    }

    pub fn new_conversation(&mut self) {
        self.cancel_chat();
        self.chat.clear();
        self.store.new_conversation();
        self.viewing = None;
        self.chat_scroll = 0;
        info!("started new conversation");
    }

    pub fn clear_history(&mut self) {
        self.new_conversation();
        self.store.clear_conversations();
        self.history_state.select(None);
        self.notify(NotificationKind::Info, "History Cleared", "All saved conversations were removed.");
    }

    // Voice

    pub fn toggle_microphone(&mut self) {
        let effects = self.voice.toggle_microphone();
        self.apply_effects(effects);
    }

    pub fn stop_speaking(&mut self) {
        let effects = self.voice.stop_speaking();
        self.apply_effects(effects);
    }

    pub fn close_voice_overlay(&mut self) {
        let effects = self.voice.close();
        self.apply_effects(effects);
    }

    pub fn toggle_audio(&mut self) {
        let enabled = !self.voice.audio_enabled();
        let effects = self.voice.set_audio_enabled(enabled);
        self.apply_effects(effects);

        let mut preferences = self.store.preferences().clone();
        preferences.voice_enabled = enabled;
        self.store.set_preferences(preferences);
        info!(enabled, "speech output toggled");
    }

    fn apply_effects(&mut self, effects: Vec<VoiceEffect>) {
        for effect in effects {
            match effect {
                VoiceEffect::StartRecognition => self.start_recognition(),
                VoiceEffect::AbortRecognition => self.recognizer.abort(),
                VoiceEffect::Submit(command) => {
                    info!(%command, "voice command");
                    if !self.send_message(&command, true) {
                        // A request is already in flight
                        self.notify(
                            NotificationKind::Warning,
                            "Busy",
                            format!("Previous request still running. Dropped \"{command}\"."),
                        );
                        let effects = self.voice.on_response_ready(None);
                        self.apply_effects(effects);
                    }
                }
                VoiceEffect::Speak(text) => self.speak(&text),
                VoiceEffect::CancelSpeech => self.synthesizer.cancel(),
                VoiceEffect::Alert(message) => self.alert = Some(message),
            }
        }
    }

    fn start_recognition(&mut self) {
        self.recognition_session += 1;
        let session = self.recognition_session;
        let (tx, mut rx) = mpsc::unbounded_channel();

        if let Err(e) = self.recognizer.start(tx) {
            warn!("failed to start recognition: {e}");
            self.on_recognition(session, RecognitionEvent::Error(e));
            self.on_recognition(session, RecognitionEvent::Ended);
            return;
        }

        // Tag events so late ones from an earlier session can be ignored
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events.send(AppEvent::Recognition { session, event }).is_err() {
                    break;
                }
            }
        });
    }

    pub fn on_recognition(&mut self, session: u64, event: RecognitionEvent) {
        if session != self.recognition_session {
            debug!(session, current = self.recognition_session, "dropping stale recognition event");
            return;
        }
        match event {
            RecognitionEvent::Started => self.voice.on_recognition_started(),
            RecognitionEvent::Transcript { text, is_final } => {
                let effects = self.voice.on_transcript(&text, is_final);
                self.apply_effects(effects);
            }
            RecognitionEvent::Level(level) => self.mic_level = Some(level),
            RecognitionEvent::Error(error) => {
                warn!("recognition error: {error}");
                let effects = self.voice.on_recognition_error(&error);
                if effects.is_empty() {
                    self.notify(NotificationKind::Error, "Voice Input", error.to_string());
                }
                self.apply_effects(effects);
            }
            RecognitionEvent::Ended => {
                self.mic_level = None;
                self.voice.on_recognition_end();
            }
        }
    }

    fn speak(&mut self, text: &str) {
        self.utterance += 1;
        let utterance = self.utterance;
        let events = self.events.clone();
        self.synthesizer.speak(
            text,
            Box::new(move |result: Result<(), SynthesisError>| {
                let _ = events.send(AppEvent::SpeechFinished { utterance, result });
            }),
        );
    }

    pub fn on_speech_finished(&mut self, utterance: u64, result: Result<(), SynthesisError>) {
        if utterance != self.utterance {
            return;
        }
        match result {
            Ok(()) => {}
            Err(SynthesisError::Unavailable) => debug!("speech output unavailable"),
            Err(e) => warn!("speech output failed: {e}"),
        }
        self.voice.on_speech_finished();
    }

    // Plugins

    pub fn load_plugins(&self) {
        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = client.list_plugins().await.map_err(|e| e.to_string());
            let _ = events.send(AppEvent::PluginsLoaded(result));
        });
    }

    pub fn on_plugins_loaded(&mut self, result: Result<Vec<jarvis_core::Plugin>, String>) {
        match result {
            Ok(plugins) => {
                info!(count = plugins.len(), "plugins loaded");
                self.store.set_plugins(plugins);
                self.clamp_plugin_selection();
            }
            Err(e) => warn!("failed to load plugins: {e}"),
        }
    }

    pub fn open_plugins(&mut self) {
        self.show_plugins = true;
        if self.plugins_state.selected().is_none() && !self.store.plugins().is_empty() {
            self.plugins_state.select(Some(0));
        }
    }

    pub fn plugins_nav_down(&mut self) {
        let len = self.store.plugins().len();
        if len == 0 {
            return;
        }
        let next = self.plugins_state.selected().map_or(0, |i| (i + 1).min(len - 1));
        self.plugins_state.select(Some(next));
    }

    pub fn plugins_nav_up(&mut self) {
        let prev = self.plugins_state.selected().map_or(0, |i| i.saturating_sub(1));
        if !self.store.plugins().is_empty() {
            self.plugins_state.select(Some(prev));
        }
    }

    fn clamp_plugin_selection(&mut self) {
        let len = self.store.plugins().len();
        match self.plugins_state.selected() {
            _ if len == 0 => self.plugins_state.select(None),
            Some(i) if i >= len => self.plugins_state.select(Some(len - 1)),
            None if self.show_plugins => self.plugins_state.select(Some(0)),
            _ => {}
        }
    }

    /// Flip the selected plugin locally, then confirm with the backend
    pub fn toggle_selected_plugin(&mut self) {
        let Some(plugin) = self
            .plugins_state
            .selected()
            .and_then(|i| self.store.plugins().get(i))
            .cloned()
        else {
            return;
        };
        let enabled = !plugin.enabled;
        self.store.toggle_plugin(&plugin.id, enabled);

        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = client
                .toggle_plugin(&plugin.id, enabled)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(AppEvent::PluginToggled {
                id: plugin.id,
                enabled,
                result,
            });
        });
    }

    pub fn on_plugin_toggled(&mut self, id: &str, enabled: bool, result: Result<(), String>) {
        if let Err(e) = result {
            warn!(plugin = id, "toggle rejected: {e}");
            self.store.toggle_plugin(id, !enabled);
            self.notify(NotificationKind::Error, "Plugin Error", format!("Could not update {id}: {e}"));
        }
    }

    pub fn uninstall_selected_plugin(&mut self) {
        let Some(id) = self
            .plugins_state
            .selected()
            .and_then(|i| self.store.plugins().get(i))
            .map(|p| p.id.clone())
        else {
            return;
        };
        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = client.uninstall_plugin(&id).await.map_err(|e| e.to_string());
            let _ = events.send(AppEvent::PluginRemoved { id, result });
        });
    }

    pub fn on_plugin_removed(&mut self, id: &str, result: Result<(), String>) {
        match result {
            Ok(()) => {
                self.store.remove_plugin(id);
                self.clamp_plugin_selection();
                self.notify(NotificationKind::Success, "Plugin Removed", format!("{id} was uninstalled."));
            }
            Err(e) => {
                self.notify(NotificationKind::Error, "Plugin Error", format!("Could not uninstall {id}: {e}"));
            }
        }
    }

    // History

    pub fn open_history(&mut self) {
        self.show_history = true;
        let len = self.store.conversation_count();
        match self.history_state.selected() {
            _ if len == 0 => self.history_state.select(None),
            Some(i) if i >= len => self.history_state.select(Some(len - 1)),
            None => self.history_state.select(Some(0)),
            _ => {}
        }
    }

    pub fn history_nav_down(&mut self) {
        let len = self.store.conversation_count();
        if len == 0 {
            return;
        }
        let next = self.history_state.selected().map_or(0, |i| (i + 1).min(len - 1));
        self.history_state.select(Some(next));
    }

    pub fn history_nav_up(&mut self) {
        let prev = self.history_state.selected().map_or(0, |i| i.saturating_sub(1));
        if self.store.conversation_count() > 0 {
            self.history_state.select(Some(prev));
        }
    }

    /// Show the selected conversation in the chat pane
    pub fn view_selected_conversation(&mut self) {
        let Some(conversation) = self
            .history_state
            .selected()
            .and_then(|i| self.store.conversations().nth(i))
            .cloned()
        else {
            return;
        };
        debug!(id = %conversation.id, "viewing saved conversation");
        self.show_history = false;
        self.viewing = Some(conversation);
        self.chat_scroll = 0;
    }

    /// Return from a saved conversation to the live chat
    pub fn close_history_view(&mut self) {
        self.viewing = None;
        self.scroll_chat_to_bottom();
    }

    /// Messages in the chat pane: the saved conversation when one is open
    pub fn displayed_messages(&self) -> &[ChatMessage] {
        match &self.viewing {
            Some(conversation) => &conversation.messages,
            None => self.chat.messages(),
        }
    }

    // Notifications

    pub fn notify(&mut self, kind: NotificationKind, title: &str, message: impl Into<String>) {
        self.store.notify(kind, title, message);
    }

    // Animation

    pub fn tick(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick);
        self.last_tick = now;

        if self.screen == Screen::Boot {
            self.boot.advance(dt);
        }
        let sample = self.mic_level.filter(|_| self.voice.state() == VoiceState::Listening);
        self.level.tick(self.voice.state(), sample, &mut self.rng);
        self.animation_frame = self.animation_frame.wrapping_add(1);
    }

    /// Seconds driving the scene; frozen when animations are turned off
    pub fn scene_time(&self) -> f64 {
        if self.store.preferences().animations {
            self.started.elapsed().as_secs_f64()
        } else {
            0.0
        }
    }

    /// Dots after "Thinking", cycling 1..=3
    pub fn thinking_dots(&self) -> usize {
        (self.animation_frame as usize / 6) % 3 + 1
    }

    pub fn enter_dashboard(&mut self) {
        self.boot.skip();
        self.screen = Screen::Dashboard;
    }

    pub fn scroll_chat_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(3);
    }

    pub fn scroll_chat_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(3);
    }

    /// Scroll chat to bottom so the newest message is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Leave the reader's position alone in a saved conversation
        if self.viewing.is_some() {
            return;
        }
        let wrap_width = if self.chat_width > 0 { self.chat_width as usize } else { 50 };

        let mut total_lines: u16 = 0;
        for msg in self.chat.messages() {
            total_lines = total_lines.saturating_add(1);
            for line in msg.content.lines() {
                let char_count = line.chars().count();
                total_lines = total_lines.saturating_add((char_count / wrap_width + 1) as u16);
            }
            total_lines = total_lines.saturating_add(1);
        }
        if self.chat.is_loading() {
            total_lines = total_lines.saturating_add(2);
        }

        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(task) = self.chat_task.take() {
            task.abort();
        }
        self.recognizer.abort();
        self.synthesizer.cancel();
    }
}

fn push_sample(history: &mut VecDeque<u64>, value: f64) {
    if history.len() == METRICS_HISTORY {
        history.pop_front();
    }
    history.push_back(value.round() as u64);
}

#[cfg(test)]
pub(crate) fn test_app() -> (App, mpsc::UnboundedReceiver<AppEvent>) {
    use jarvis_core::speech::{NullRecognizer, NullSynthesizer};

    let (tx, rx) = mpsc::unbounded_channel();
    let config = Config {
        api_url: "http://127.0.0.1:9".to_string(),
        skip_boot: true,
        voice_enabled: false,
        audio_enabled: false,
        ..Config::default()
    };
    let client = JarvisClient::new(&config.api_base()).unwrap();
    let app = App::new(
        config,
        Store::in_memory(100),
        client,
        Box::new(NullRecognizer),
        Box::new(NullSynthesizer),
        tx,
    );
    (app, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarvis_core::api::ChatReply;
    use jarvis_core::speech::{RecognitionError, RecognitionSender, SpeechDone};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        starts: usize,
        aborts: usize,
        spoken: Vec<String>,
        cancels: usize,
    }

    struct FakeRecognizer(Arc<Mutex<Calls>>);

    impl SpeechRecognizer for FakeRecognizer {
        fn is_supported(&self) -> bool {
            true
        }

        fn start(&mut self, _events: RecognitionSender) -> Result<(), RecognitionError> {
            self.0.lock().unwrap().starts += 1;
            Ok(())
        }

        fn stop(&mut self) {}

        fn abort(&mut self) {
            self.0.lock().unwrap().aborts += 1;
        }
    }

    struct FakeSynthesizer(Arc<Mutex<Calls>>);

    impl SpeechSynthesizer for FakeSynthesizer {
        fn is_supported(&self) -> bool {
            true
        }

        fn speak(&mut self, text: &str, _done: SpeechDone) {
            self.0.lock().unwrap().spoken.push(text.to_string());
        }

        fn cancel(&mut self) {
            self.0.lock().unwrap().cancels += 1;
        }
    }

    fn voice_app() -> (App, Arc<Mutex<Calls>>, mpsc::UnboundedReceiver<AppEvent>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let config = Config {
            api_url: "http://127.0.0.1:9".to_string(),
            skip_boot: true,
            ..Config::default()
        };
        let client = JarvisClient::new(&config.api_base()).unwrap();
        let app = App::new(
            config,
            Store::in_memory(100),
            client,
            Box::new(FakeRecognizer(calls.clone())),
            Box::new(FakeSynthesizer(calls.clone())),
            tx,
        );
        (app, calls, rx)
    }

    fn reply(text: &str) -> ChatOutcome {
        Ok(ChatReply {
            text: text.to_string(),
            plugin_used: None,
        })
    }

    #[tokio::test]
    async fn test_voice_command_round_trip() {
        let (mut app, calls, _rx) = voice_app();

        app.toggle_microphone();
        assert_eq!(app.voice.state(), VoiceState::Listening);
        assert_eq!(calls.lock().unwrap().starts, 1);

        app.on_recognition(1, RecognitionEvent::Started);
        app.on_recognition(1, RecognitionEvent::Transcript {
            text: "Jarvis what is the weather".to_string(),
            is_final: true,
        });
        assert_eq!(app.voice.state(), VoiceState::Processing);
        assert_eq!(calls.lock().unwrap().aborts, 1);
        let sent = &app.chat.messages()[0];
        assert_eq!(sent.content, "what is the weather");
        assert!(sent.is_voice);

        // Capture ends after the transcript; processing is unaffected
        app.on_recognition(1, RecognitionEvent::Ended);
        assert_eq!(app.voice.state(), VoiceState::Processing);

        let id = app.chat.in_flight().unwrap();
        app.on_chat_done(id, reply("Sunny, sir."));
        assert_eq!(app.voice.state(), VoiceState::Speaking);
        assert_eq!(calls.lock().unwrap().spoken, vec!["Sunny, sir."]);

        app.on_speech_finished(app.utterance, Ok(()));
        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert_eq!(app.store.current_conversation().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_recognition_session_is_ignored() {
        let (mut app, _calls, _rx) = voice_app();
        app.toggle_microphone();
        app.toggle_microphone();
        app.toggle_microphone();
        assert_eq!(app.voice.state(), VoiceState::Listening);

        // The first session ending late must not close the second
        app.on_recognition(1, RecognitionEvent::Ended);
        assert_eq!(app.voice.state(), VoiceState::Listening);
        app.on_recognition(2, RecognitionEvent::Ended);
        assert_eq!(app.voice.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_permission_denied_raises_alert() {
        let (mut app, _calls, _rx) = voice_app();
        app.toggle_microphone();
        app.on_recognition(1, RecognitionEvent::Error(RecognitionError::NotAllowed));
        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert!(app.alert.as_deref().unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn test_failed_voice_request_returns_to_idle_silently() {
        let (mut app, calls, _rx) = voice_app();
        app.toggle_microphone();
        app.on_recognition(1, RecognitionEvent::Transcript {
            text: "jarvis status".to_string(),
            is_final: true,
        });
        let id = app.chat.in_flight().unwrap();
        app.on_chat_done(id, Err("HTTP 500".to_string()));

        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert!(calls.lock().unwrap().spoken.is_empty());
        assert_eq!(app.chat.messages().last().unwrap().role, ChatRole::Error);
        assert_eq!(app.store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_typed_reply_spoken_unless_muted() {
        let (mut app, calls, _rx) = voice_app();
        assert!(app.send_message("hello", false));
        let id = app.chat.in_flight().unwrap();
        app.on_chat_done(id, reply("Good evening."));
        assert_eq!(app.voice.state(), VoiceState::Speaking);

        app.toggle_audio();
        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert!(!app.store.preferences().voice_enabled);
        assert!(app.send_message("again", false));
        let id = app.chat.in_flight().unwrap();
        app.on_chat_done(id, reply("Quiet now."));
        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert_eq!(calls.lock().unwrap().spoken, vec!["Good evening."]);
    }

    #[tokio::test]
    async fn test_new_conversation_drops_in_flight_request() {
        let (mut app, _rx) = test_app();
        assert!(app.send_message("hello", false));
        let id = app.chat.in_flight().unwrap();
        app.new_conversation();
        assert!(!app.chat.is_loading());
        assert!(app.chat.messages().is_empty());

        app.on_chat_done(id, reply("late"));
        assert!(app.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_history_is_capped() {
        let (mut app, _rx) = test_app();
        for i in 0..(METRICS_HISTORY + 10) {
            app.set_metrics(SystemMetrics::new(i as f64 % 100.0, 50.0, 10.0));
        }
        assert_eq!(app.cpu_history.len(), METRICS_HISTORY);
        assert_eq!(app.metrics.unwrap().memory, 50.0);
    }

    #[tokio::test]
    async fn test_offline_transition_notifies() {
        let (mut app, _rx) = test_app();
        app.on_poll(PollEvent::Status(BackendStatus::Online));
        app.on_poll(PollEvent::Status(BackendStatus::Offline));
        assert_eq!(app.status, BackendStatus::Offline);
        let last = app.store.notifications().last().unwrap();
        assert_eq!(last.kind, NotificationKind::Error);
    }

    #[tokio::test]
    async fn test_voice_command_while_busy_notifies() {
        let (mut app, calls, _rx) = voice_app();
        assert!(app.send_message("long question", false));

        app.toggle_microphone();
        app.on_recognition(1, RecognitionEvent::Transcript {
            text: "jarvis open the pod bay doors".to_string(),
            is_final: true,
        });

        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert_eq!(app.chat.messages().len(), 1);
        assert_eq!(calls.lock().unwrap().aborts, 1);
        let last = app.store.notifications().last().unwrap();
        assert_eq!(last.title, "Busy");
        assert!(last.message.contains("open the pod bay doors"));
    }

    #[tokio::test]
    async fn test_cancel_listening_aborts_capture() {
        let (mut app, calls, _rx) = voice_app();
        app.toggle_microphone();
        app.toggle_microphone();
        assert_eq!(app.voice.state(), VoiceState::Idle);
        assert_eq!(calls.lock().unwrap().aborts, 1);
    }

    #[tokio::test]
    async fn test_view_saved_conversation() {
        let (mut app, _rx) = test_app();
        assert!(app.send_message("first question", false));
        let id = app.chat.in_flight().unwrap();
        app.on_chat_done(id, reply("first answer"));
        app.new_conversation();
        assert!(app.send_message("second question", false));

        app.open_history();
        assert!(app.show_history);
        assert_eq!(app.history_state.selected(), Some(0));
        app.history_nav_down();
        app.history_nav_down();
        assert_eq!(app.history_state.selected(), Some(1));

        // Most recent first, so index 1 is the older conversation
        app.view_selected_conversation();
        assert!(!app.show_history);
        let shown: Vec<&str> = app.displayed_messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(shown, vec!["first question", "first answer"]);
        // The live request is untouched
        assert!(app.chat.is_loading());

        app.close_history_view();
        assert!(app.viewing.is_none());
        assert_eq!(app.displayed_messages()[0].content, "second question");
    }

    #[tokio::test]
    async fn test_history_with_no_conversations() {
        let (mut app, _rx) = test_app();
        app.open_history();
        assert_eq!(app.history_state.selected(), None);
        app.history_nav_down();
        app.view_selected_conversation();
        assert!(app.viewing.is_none());
        assert!(app.show_history);
    }
}
