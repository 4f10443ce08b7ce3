pub mod api;
pub mod boot;
pub mod chat;
pub mod config;
pub mod level;
pub mod poller;
pub mod speech;
pub mod state;
pub mod store;
pub mod visuals;
pub mod voice;
pub mod ws;

// Re-export main types for convenience
pub use api::{ChatReply, JarvisClient, Transcription};
pub use boot::BootSequence;
pub use chat::{ChatOutcome, ChatPanel, PendingRequest, spawn_chat};
pub use config::Config;
pub use level::AudioLevel;
pub use poller::{PollEvent, Pollers, Probe};
pub use speech::{
    RecognitionError, RecognitionEvent, SpeechRecognizer, SpeechSynthesizer, SynthesisError,
};
pub use state::{
    BackendStatus, ChatMessage, ChatRole, Conversation, Notification, NotificationKind, Plugin,
    SystemMetrics,
};
pub use store::{Preferences, Store};
pub use visuals::{Scene, SceneFrame};
pub use voice::{VoiceEffect, VoiceMachine, VoiceState};
pub use ws::{Backoff, Envelope, Listeners, PushClient, PushEvent};
