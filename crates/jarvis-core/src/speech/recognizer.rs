//! Microphone capture with end-of-utterance detection and backend transcription

use std::io::Cursor;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{RecognitionError, RecognitionEvent, RecognitionSender, SpeechRecognizer};
use crate::api::JarvisClient;
use crate::level::rms_to_level;

const RUNNING: u8 = 0;
const FINISH: u8 = 1;
const ABORT: u8 = 2;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerSettings {
    /// RMS below which a chunk counts as silence
    pub silence_threshold: f32,
    /// Trailing silence that ends an utterance once speech was heard
    pub silence_duration: Duration,
    /// Give up if nothing is heard for this long
    pub no_speech_timeout: Duration,
    pub max_duration: Duration,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            silence_threshold: 0.02,
            silence_duration: Duration::from_millis(1200),
            no_speech_timeout: Duration::from_secs(8),
            max_duration: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Speech followed by enough silence
    Utterance,
    NoSpeech,
    MaxDuration,
}

/// Tracks speech and trailing silence across capture chunks
#[derive(Debug)]
pub struct SilenceDetector {
    settings: RecognizerSettings,
    heard_speech: bool,
    last_voice: Duration,
}

impl SilenceDetector {
    pub fn new(settings: RecognizerSettings) -> Self {
        Self {
            settings,
            heard_speech: false,
            last_voice: Duration::ZERO,
        }
    }

    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    /// Feed the RMS of the chunk ending at `elapsed` since capture start
    pub fn observe(&mut self, rms: f32, elapsed: Duration) -> Option<Endpoint> {
        if rms >= self.settings.silence_threshold {
            self.heard_speech = true;
            self.last_voice = elapsed;
        }

        if elapsed >= self.settings.max_duration {
            return Some(Endpoint::MaxDuration);
        }
        if self.heard_speech {
            if elapsed.saturating_sub(self.last_voice) >= self.settings.silence_duration {
                return Some(Endpoint::Utterance);
            }
        } else if elapsed >= self.settings.no_speech_timeout {
            return Some(Endpoint::NoSpeech);
        }
        None
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// 16-bit mono PCM WAV, the format the transcription endpoint expects
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: WavSampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn classify_build_error(err: BuildStreamError) -> RecognitionError {
    match err {
        BuildStreamError::DeviceNotAvailable => RecognitionError::NoInputDevice,
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
                RecognitionError::NotAllowed
            } else {
                RecognitionError::Audio(message)
            }
        }
    }
}

struct Session {
    control: Arc<AtomicU8>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Records from an input device until the speaker pauses, then sends the
/// audio to `/speech/transcribe`
pub struct MicrophoneRecognizer {
    client: JarvisClient,
    device_name: Option<String>,
    settings: RecognizerSettings,
    supported: bool,
    session: Option<Session>,
}

impl MicrophoneRecognizer {
    pub fn new(client: JarvisClient, device_name: Option<String>, settings: RecognizerSettings) -> Self {
        let supported = match find_device(device_name.as_deref()) {
            Ok(device) => {
                info!(device = %device.name().unwrap_or_else(|_| "unknown".to_string()), "microphone available");
                true
            }
            Err(e) => {
                warn!("voice input disabled: {e}");
                false
            }
        };
        Self {
            client,
            device_name,
            settings,
            supported,
            session: None,
        }
    }

    fn signal(&mut self, value: u8) {
        if let Some(session) = &self.session {
            // Never downgrade an abort into a finish
            let _ = session
                .control
                .compare_exchange(RUNNING, value, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

impl SpeechRecognizer for MicrophoneRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn start(&mut self, events: RecognitionSender) -> Result<(), RecognitionError> {
        if !self.supported {
            return Err(RecognitionError::NoInputDevice);
        }
        // One capture session at a time
        self.abort();
        if let Some(previous) = self.session.take() {
            if previous.thread.is_some_and(|handle| !handle.is_finished()) {
                debug!("previous recognition session still winding down");
            }
        }

        let runtime = Handle::try_current()
            .map_err(|e| RecognitionError::Audio(format!("no async runtime: {e}")))?;
        let control = Arc::new(AtomicU8::new(RUNNING));
        let capture = Capture {
            client: self.client.clone(),
            device_name: self.device_name.clone(),
            settings: self.settings.clone(),
            control: control.clone(),
            events,
            runtime,
        };

        let thread = thread::Builder::new()
            .name("jarvis-capture".to_string())
            .spawn(move || capture.run())
            .map_err(|e| RecognitionError::Audio(e.to_string()))?;

        self.session = Some(Session {
            control,
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.signal(FINISH);
    }

    fn abort(&mut self) {
        if let Some(session) = &self.session {
            session.control.store(ABORT, Ordering::SeqCst);
        }
    }
}

impl Drop for MicrophoneRecognizer {
    fn drop(&mut self) {
        self.abort();
    }
}

fn find_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .with_context(|| format!("audio device '{name}' not found")),
        None => host
            .default_input_device()
            .context("no default input device available"),
    }
}

/// State moved onto the capture thread. `cpal::Stream` is not `Send` on every
/// platform, so the stream is created and dropped on that thread.
struct Capture {
    client: JarvisClient,
    device_name: Option<String>,
    settings: RecognizerSettings,
    control: Arc<AtomicU8>,
    events: RecognitionSender,
    runtime: Handle,
}

impl Capture {
    fn run(self) {
        match self.record() {
            Ok(Some((samples, sample_rate))) => self.transcribe(samples, sample_rate),
            Ok(None) => {}
            Err(e) => {
                let _ = self.events.send(RecognitionEvent::Error(e));
            }
        }
        let _ = self.events.send(RecognitionEvent::Ended);
    }

    fn aborted(&self) -> bool {
        self.control.load(Ordering::SeqCst) == ABORT
    }

    /// Capture until an endpoint or a control signal. `None` means there is
    /// nothing to transcribe.
    fn record(&self) -> Result<Option<(Vec<f32>, u32)>, RecognitionError> {
        let device = find_device(self.device_name.as_deref()).map_err(|_| RecognitionError::NoInputDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| RecognitionError::Audio(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let samples = Arc::new(Mutex::new(Vec::<f32>::new()));
        let stream = match format {
            SampleFormat::I8 => build_stream::<i8>(&device, &config, channels, samples.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, samples.clone()),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, channels, samples.clone()),
            SampleFormat::U8 => build_stream::<u8>(&device, &config, channels, samples.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, samples.clone()),
            SampleFormat::U32 => build_stream::<u32>(&device, &config, channels, samples.clone()),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, samples.clone()),
            SampleFormat::F64 => build_stream::<f64>(&device, &config, channels, samples.clone()),
            other => return Err(RecognitionError::Audio(format!("unsupported sample format {other:?}"))),
        }
        .map_err(classify_build_error)?;

        stream.play().map_err(|e| RecognitionError::Audio(e.to_string()))?;
        let _ = self.events.send(RecognitionEvent::Started);
        debug!(sample_rate, channels, "capture started");

        let started = Instant::now();
        let mut detector = SilenceDetector::new(self.settings.clone());
        let mut consumed = 0;

        let endpoint = loop {
            thread::sleep(POLL_INTERVAL);
            match self.control.load(Ordering::SeqCst) {
                ABORT => {
                    debug!("capture aborted");
                    return Ok(None);
                }
                FINISH => break None,
                _ => {}
            }

            let chunk_rms = match samples.lock() {
                Ok(buffer) => {
                    let chunk_rms = rms(&buffer[consumed..]);
                    consumed = buffer.len();
                    chunk_rms
                }
                Err(_) => return Err(RecognitionError::Audio("capture buffer poisoned".to_string())),
            };
            let _ = self.events.send(RecognitionEvent::Level(rms_to_level(chunk_rms)));

            if let Some(endpoint) = detector.observe(chunk_rms, started.elapsed()) {
                break Some(endpoint);
            }
        };
        drop(stream);

        debug!(?endpoint, "capture finished");
        if endpoint == Some(Endpoint::NoSpeech) || !detector.heard_speech() {
            return Ok(None);
        }

        let captured = samples
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .map_err(|_| RecognitionError::Audio("capture buffer poisoned".to_string()))?;
        Ok(Some((captured, sample_rate)))
    }

    fn transcribe(&self, samples: Vec<f32>, sample_rate: u32) {
        let result = encode_wav(&samples, sample_rate).and_then(|wav| {
            self.runtime.block_on(self.client.transcribe(wav))
        });
        if self.aborted() {
            return;
        }

        match result {
            Ok(transcription) => {
                info!(confidence = transcription.confidence, "transcription received");
                let _ = self.events.send(RecognitionEvent::Transcript {
                    text: transcription.text,
                    is_final: true,
                });
            }
            Err(e) => {
                warn!("transcription failed: {e}");
                let _ = self
                    .events
                    .send(RecognitionEvent::Error(RecognitionError::Transcription(e.to_string())));
            }
        }
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    channels: u16,
    samples: Arc<Mutex<Vec<f32>>>,
) -> Result<Stream, BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channel_count = channels.max(1) as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // First channel only
            let mono = data
                .chunks(channel_count)
                .filter_map(|frame| frame.first())
                .map(|&s| s.to_sample::<f32>());
            if let Ok(mut buffer) = samples.lock() {
                buffer.extend(mono);
            }
        },
        |err| warn!("audio stream error: {err}"),
        None,
    )
}
