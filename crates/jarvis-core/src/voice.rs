//! Voice interaction state machine
//!
//! `VoiceMachine` owns the single `VoiceState` and never performs I/O itself.
//! Every transition returns the side effects the caller has to run against the
//! speech capabilities and the chat dispatcher.

use tracing::debug;

use crate::speech::RecognitionError;

pub const WAKE_WORD: &str = "jarvis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl VoiceState {
    pub fn label(&self) -> &'static str {
        match self {
            VoiceState::Idle => "IDLE",
            VoiceState::Listening => "LISTENING",
            VoiceState::Processing => "PROCESSING",
            VoiceState::Speaking => "SPEAKING",
        }
    }

    /// States in which the audio level is driven up rather than decaying
    pub fn is_audible(&self) -> bool {
        matches!(self, VoiceState::Listening | VoiceState::Speaking)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEffect {
    StartRecognition,
    AbortRecognition,
    /// Send the extracted command to the chat backend
    Submit(String),
    Speak(String),
    CancelSpeech,
    /// Blocking message for the user
    Alert(String),
}

/// Strip the wake word from a final transcript.
///
/// Returns `None` when the transcript does not start with the wake word or
/// nothing follows it.
pub fn extract_command(transcript: &str) -> Option<String> {
    let normalized = transcript.trim();
    let prefix = normalized.get(..WAKE_WORD.len())?;
    if !prefix.eq_ignore_ascii_case(WAKE_WORD) {
        return None;
    }
    let command = normalized[WAKE_WORD.len()..].trim();
    if command.is_empty() {
        None
    } else {
        Some(command.to_string())
    }
}

#[derive(Debug)]
pub struct VoiceMachine {
    state: VoiceState,
    transcript: String,
    recognizer_supported: bool,
    audio_enabled: bool,
}

impl VoiceMachine {
    pub fn new(recognizer_supported: bool, audio_enabled: bool) -> Self {
        Self {
            state: VoiceState::Idle,
            transcript: String::new(),
            recognizer_supported,
            audio_enabled,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Latest interim or final text heard by the recognizer
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn recognizer_supported(&self) -> bool {
        self.recognizer_supported
    }

    /// The overlay is shown whenever the machine is not idle
    pub fn overlay_visible(&self) -> bool {
        self.state != VoiceState::Idle
    }

    fn transition(&mut self, next: VoiceState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "voice transition");
            self.state = next;
        }
    }

    pub fn toggle_microphone(&mut self) -> Vec<VoiceEffect> {
        if !self.recognizer_supported {
            return vec![VoiceEffect::Alert(
                "Voice recognition is not available: no microphone or transcription backend."
                    .to_string(),
            )];
        }

        match self.state {
            VoiceState::Idle => {
                self.transcript.clear();
                self.transition(VoiceState::Listening);
                vec![VoiceEffect::StartRecognition]
            }
            // Cancelling discards the capture rather than transcribing it
            VoiceState::Listening => {
                self.transition(VoiceState::Idle);
                vec![VoiceEffect::AbortRecognition]
            }
            // No barge-in: speech has to be stopped explicitly first
            VoiceState::Processing | VoiceState::Speaking => Vec::new(),
        }
    }

    pub fn on_recognition_started(&mut self) {
        if self.state == VoiceState::Idle {
            self.transition(VoiceState::Listening);
        }
    }

    pub fn on_transcript(&mut self, text: &str, is_final: bool) -> Vec<VoiceEffect> {
        if self.state != VoiceState::Listening {
            return Vec::new();
        }
        self.transcript = text.to_string();
        if !is_final {
            return Vec::new();
        }

        match extract_command(text) {
            Some(command) => {
                // Capture must be fully stopped before processing begins
                self.transition(VoiceState::Processing);
                vec![VoiceEffect::AbortRecognition, VoiceEffect::Submit(command)]
            }
            None => Vec::new(),
        }
    }

    pub fn on_recognition_error(&mut self, error: &RecognitionError) -> Vec<VoiceEffect> {
        if self.state != VoiceState::Listening {
            return Vec::new();
        }
        self.transition(VoiceState::Idle);
        match error {
            RecognitionError::NotAllowed => vec![VoiceEffect::Alert(
                "Microphone access denied. Please allow microphone access.".to_string(),
            )],
            _ => Vec::new(),
        }
    }

    pub fn on_recognition_end(&mut self) {
        if self.state == VoiceState::Listening {
            self.transition(VoiceState::Idle);
        }
    }

    /// The chat round trip for a voice command finished.
    ///
    /// `None` means the call failed or was refused; the error is already in the
    /// chat log and nothing is spoken.
    pub fn on_response_ready(&mut self, reply: Option<&str>) -> Vec<VoiceEffect> {
        if self.state != VoiceState::Processing {
            return Vec::new();
        }
        match reply {
            Some(text) if self.audio_enabled => {
                self.transition(VoiceState::Speaking);
                vec![VoiceEffect::Speak(text.to_string())]
            }
            _ => {
                self.transition(VoiceState::Idle);
                Vec::new()
            }
        }
    }

    /// Speak a reply to a typed message. A running utterance is replaced.
    pub fn speak_reply(&mut self, text: &str) -> Vec<VoiceEffect> {
        if !self.audio_enabled {
            return Vec::new();
        }
        match self.state {
            VoiceState::Idle => {
                self.transition(VoiceState::Speaking);
                vec![VoiceEffect::Speak(text.to_string())]
            }
            VoiceState::Speaking => vec![VoiceEffect::CancelSpeech, VoiceEffect::Speak(text.to_string())],
            VoiceState::Listening | VoiceState::Processing => Vec::new(),
        }
    }

    /// Synthesis finished or failed
    pub fn on_speech_finished(&mut self) {
        if self.state == VoiceState::Speaking {
            self.transition(VoiceState::Idle);
        }
    }

    pub fn stop_speaking(&mut self) -> Vec<VoiceEffect> {
        if self.state == VoiceState::Speaking {
            self.transition(VoiceState::Idle);
        }
        vec![VoiceEffect::CancelSpeech]
    }

    /// Close the overlay from any state
    pub fn close(&mut self) -> Vec<VoiceEffect> {
        let effects = match self.state {
            VoiceState::Listening => vec![VoiceEffect::AbortRecognition],
            VoiceState::Speaking => vec![VoiceEffect::CancelSpeech],
            VoiceState::Idle | VoiceState::Processing => Vec::new(),
        };
        self.transition(VoiceState::Idle);
        self.transcript.clear();
        effects
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) -> Vec<VoiceEffect> {
        self.audio_enabled = enabled;
        if !enabled && self.state == VoiceState::Speaking {
            self.transition(VoiceState::Idle);
            return vec![VoiceEffect::CancelSpeech];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_command() {
        assert_eq!(extract_command("Jarvis what time is it").as_deref(), Some("what time is it"));
        assert_eq!(extract_command("  JARVIS   open the pod bay doors ").as_deref(), Some("open the pod bay doors"));
        assert_eq!(extract_command("jarvis"), None);
        assert_eq!(extract_command("jarvis    "), None);
        assert_eq!(extract_command("hey jarvis do this"), None);
        assert_eq!(extract_command("jar"), None);
        assert_eq!(extract_command(""), None);
    }

    #[test]
    fn test_extract_command_non_ascii_prefix() {
        // Byte index 6 falls inside a multi-byte char
        assert_eq!(extract_command("jarvi\u{00e9} hello"), None);
        assert_eq!(extract_command("ñññ"), None);
    }

    #[test]
    fn test_full_voice_scenario() {
        let mut voice = VoiceMachine::new(true, true);
        assert_eq!(voice.state(), VoiceState::Idle);

        assert_eq!(voice.toggle_microphone(), vec![VoiceEffect::StartRecognition]);
        voice.on_recognition_started();
        assert_eq!(voice.state(), VoiceState::Listening);

        assert!(voice.on_transcript("Jarvis what is", false).is_empty());
        assert_eq!(voice.transcript(), "Jarvis what is");

        let effects = voice.on_transcript("Jarvis what is the cpu usage", true);
        assert_eq!(
            effects,
            vec![
                VoiceEffect::AbortRecognition,
                VoiceEffect::Submit("what is the cpu usage".to_string())
            ]
        );
        assert_eq!(voice.state(), VoiceState::Processing);

        // A late end event from the aborted recognizer changes nothing
        voice.on_recognition_end();
        assert_eq!(voice.state(), VoiceState::Processing);

        let effects = voice.on_response_ready(Some("CPU usage is 12%"));
        assert_eq!(effects, vec![VoiceEffect::Speak("CPU usage is 12%".to_string())]);
        assert_eq!(voice.state(), VoiceState::Speaking);

        voice.on_speech_finished();
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_non_wake_word_transcript_stays_listening() {
        let mut voice = VoiceMachine::new(true, true);
        voice.toggle_microphone();
        assert!(voice.on_transcript("what time is it", true).is_empty());
        assert_eq!(voice.state(), VoiceState::Listening);
        assert!(voice.on_transcript("jarvis", true).is_empty());
        assert_eq!(voice.state(), VoiceState::Listening);

        voice.on_recognition_end();
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_muted_response_goes_idle() {
        let mut voice = VoiceMachine::new(true, false);
        voice.toggle_microphone();
        voice.on_transcript("jarvis hello", true);
        assert!(voice.on_response_ready(Some("hi")).is_empty());
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_failed_response_goes_idle() {
        let mut voice = VoiceMachine::new(true, true);
        voice.toggle_microphone();
        voice.on_transcript("jarvis hello", true);
        assert!(voice.on_response_ready(None).is_empty());
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_permission_denied_alerts() {
        let mut voice = VoiceMachine::new(true, true);
        voice.toggle_microphone();
        let effects = voice.on_recognition_error(&RecognitionError::NotAllowed);
        assert!(matches!(effects.as_slice(), [VoiceEffect::Alert(_)]));
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_unsupported_recognizer_is_noop() {
        let mut voice = VoiceMachine::new(false, true);
        let effects = voice.toggle_microphone();
        assert!(matches!(effects.as_slice(), [VoiceEffect::Alert(_)]));
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_no_barge_in_while_speaking() {
        let mut voice = VoiceMachine::new(true, true);
        voice.speak_reply("hello there");
        assert_eq!(voice.state(), VoiceState::Speaking);

        assert!(voice.toggle_microphone().is_empty());
        assert_eq!(voice.state(), VoiceState::Speaking);

        assert_eq!(voice.stop_speaking(), vec![VoiceEffect::CancelSpeech]);
        assert_eq!(voice.toggle_microphone(), vec![VoiceEffect::StartRecognition]);
        assert_eq!(voice.state(), VoiceState::Listening);
    }

    #[test]
    fn test_close_cancels_active_capability() {
        let mut voice = VoiceMachine::new(true, true);
        voice.toggle_microphone();
        voice.on_transcript("partial", false);
        assert_eq!(voice.close(), vec![VoiceEffect::AbortRecognition]);
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(voice.transcript().is_empty());

        voice.speak_reply("hi");
        assert_eq!(voice.close(), vec![VoiceEffect::CancelSpeech]);
        assert!(!voice.overlay_visible());
    }

    #[test]
    fn test_cancel_listening_discards_capture() {
        let mut voice = VoiceMachine::new(true, true);
        voice.toggle_microphone();
        voice.on_transcript("jarvis what", false);
        assert_eq!(voice.toggle_microphone(), vec![VoiceEffect::AbortRecognition]);
        assert_eq!(voice.state(), VoiceState::Idle);

        // Anything the aborted session still reports is ignored
        assert!(voice.on_transcript("jarvis what time is it", true).is_empty());
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[test]
    fn test_muting_cancels_speech() {
        let mut voice = VoiceMachine::new(true, true);
        voice.speak_reply("hi");
        assert_eq!(voice.set_audio_enabled(false), vec![VoiceEffect::CancelSpeech]);
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(voice.speak_reply("again").is_empty());
    }
}
