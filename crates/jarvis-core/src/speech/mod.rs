//! Speech capabilities
//!
//! Recognition and synthesis sit behind traits so the voice flow can run
//! against native devices, a headless null implementation, or test doubles.
//! Support is probed once when an implementation is constructed.

pub mod recognizer;
pub mod synthesizer;

use thiserror::Error;
use tokio::sync::mpsc;

pub use recognizer::{MicrophoneRecognizer, RecognizerSettings};
pub use synthesizer::{CommandSynthesizer, TtsProgram};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("microphone access denied")]
    NotAllowed,
    #[error("no audio input device available")]
    NoInputDevice,
    #[error("audio capture failed: {0}")]
    Audio(String),
    #[error("transcription failed: {0}")]
    Transcription(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("no speech synthesizer available")]
    Unavailable,
    #[error("failed to start synthesizer: {0}")]
    Spawn(String),
    #[error("synthesizer exited with {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Started,
    Transcript { text: String, is_final: bool },
    /// Input level in `[0, 1]` while capturing
    Level(f32),
    Error(RecognitionError),
    Ended,
}

pub type RecognitionSender = mpsc::UnboundedSender<RecognitionEvent>;

/// Completion callback for one utterance. Not called when cancelled.
pub type SpeechDone = Box<dyn FnOnce(Result<(), SynthesisError>) + Send>;

pub trait SpeechRecognizer: Send {
    fn is_supported(&self) -> bool;

    /// Begin capturing. Events for this session are sent to `events` and the
    /// session always ends with `Ended`.
    fn start(&mut self, events: RecognitionSender) -> Result<(), RecognitionError>;

    /// Finish the utterance and deliver whatever was heard
    fn stop(&mut self);

    /// Discard the session without a transcript
    fn abort(&mut self);
}

pub trait SpeechSynthesizer: Send {
    fn is_supported(&self) -> bool;

    fn speak(&mut self, text: &str, done: SpeechDone);

    fn cancel(&mut self);
}

/// Recognizer for hosts without a microphone
#[derive(Debug, Default)]
pub struct NullRecognizer;

impl SpeechRecognizer for NullRecognizer {
    fn is_supported(&self) -> bool {
        false
    }

    fn start(&mut self, _events: RecognitionSender) -> Result<(), RecognitionError> {
        Err(RecognitionError::NoInputDevice)
    }

    fn stop(&mut self) {}

    fn abort(&mut self) {}
}

/// Synthesizer that reports every utterance as unavailable
#[derive(Debug, Default)]
pub struct NullSynthesizer;

impl SpeechSynthesizer for NullSynthesizer {
    fn is_supported(&self) -> bool {
        false
    }

    fn speak(&mut self, _text: &str, done: SpeechDone) {
        done(Err(SynthesisError::Unavailable));
    }

    fn cancel(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_null_recognizer_is_unsupported() {
        let mut recognizer = NullRecognizer;
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!recognizer.is_supported());
        assert_eq!(recognizer.start(tx), Err(RecognitionError::NoInputDevice));
    }

    #[test]
    fn test_null_synthesizer_finishes_immediately() {
        let result = Arc::new(Mutex::new(None));
        let slot = result.clone();
        let mut synth = NullSynthesizer;
        synth.speak("hello", Box::new(move |r: Result<(), SynthesisError>| *slot.lock().unwrap() = Some(r)));
        assert_eq!(*result.lock().unwrap(), Some(Err(SynthesisError::Unavailable)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(RecognitionError::NotAllowed.to_string(), "microphone access denied");
        assert_eq!(
            SynthesisError::Failed("exit status: 1".into()).to_string(),
            "synthesizer exited with exit status: 1"
        );
    }
}
