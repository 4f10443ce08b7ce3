//! Text-to-speech through a system command

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{SpeechDone, SpeechSynthesizer, SynthesisError};

/// Known TTS commands, in probe order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProgram {
    Say,
    EspeakNg,
    Espeak,
}

impl TtsProgram {
    pub const ALL: [TtsProgram; 3] = [TtsProgram::Say, TtsProgram::EspeakNg, TtsProgram::Espeak];

    pub fn binary(&self) -> &'static str {
        match self {
            TtsProgram::Say => "say",
            TtsProgram::EspeakNg => "espeak-ng",
            TtsProgram::Espeak => "espeak",
        }
    }

    /// Arguments for reading the utterance from stdin
    pub fn args(&self, voice: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(voice) = voice {
            args.push("-v".to_string());
            args.push(voice.to_string());
        }
        match self {
            TtsProgram::Say => {
                args.push("-f".to_string());
                args.push("-".to_string());
            }
            TtsProgram::EspeakNg | TtsProgram::Espeak => args.push("--stdin".to_string()),
        }
        args
    }

    /// First program found on `PATH`
    pub fn detect() -> Option<(TtsProgram, PathBuf)> {
        let path = std::env::var_os("PATH")?;
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
        Self::detect_in(&dirs)
    }

    pub fn detect_in(dirs: &[PathBuf]) -> Option<(TtsProgram, PathBuf)> {
        Self::ALL.iter().find_map(|program| {
            dirs.iter()
                .map(|dir| dir.join(program.binary()))
                .find(|candidate| is_executable(candidate))
                .map(|found| (*program, found))
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Speaks by piping text into `say`, `espeak-ng` or `espeak`. One utterance
/// at a time; a new `speak` replaces the running one.
pub struct CommandSynthesizer {
    program: Option<(TtsProgram, PathBuf)>,
    voice: Option<String>,
    cancel: Option<oneshot::Sender<()>>,
}

impl CommandSynthesizer {
    pub fn new(voice: Option<String>) -> Self {
        let program = TtsProgram::detect();
        match &program {
            Some((tts, path)) => info!(program = tts.binary(), path = %path.display(), "speech output available"),
            None => warn!("no TTS command found, speech output disabled"),
        }
        Self::with_program(program, voice)
    }

    pub fn with_program(program: Option<(TtsProgram, PathBuf)>, voice: Option<String>) -> Self {
        Self {
            program,
            voice,
            cancel: None,
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn is_supported(&self) -> bool {
        self.program.is_some()
    }

    fn speak(&mut self, text: &str, done: SpeechDone) {
        self.cancel();

        let Some((program, path)) = self.program.clone() else {
            done(Err(SynthesisError::Unavailable));
            return;
        };

        let mut command = Command::new(&path);
        command
            .args(program.args(self.voice.as_deref()))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = program.binary(), "failed to start TTS: {e}");
                done(Err(SynthesisError::Spawn(e.to_string())));
                return;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);
        let text = text.to_string();

        tokio::spawn(async move {
            let stdin = child.stdin.take();
            let spoken = async {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(text.as_bytes()).await {
                        debug!("failed to write TTS input: {e}");
                    }
                    // Closing stdin lets the program start speaking
                    drop(stdin);
                }
                child.wait().await
            };

            // Cancel wins even while the program is still being fed
            let status = tokio::select! {
                status = spoken => Some(status),
                _ = cancel_rx => None,
            };

            match status {
                Some(status) => {
                    let result = match status {
                        Ok(status) if status.success() => Ok(()),
                        Ok(status) => Err(SynthesisError::Failed(status.to_string())),
                        Err(e) => Err(SynthesisError::Failed(e.to_string())),
                    };
                    done(result);
                }
                None => {
                    if let Err(e) = child.kill().await {
                        debug!("failed to stop TTS: {e}");
                    }
                }
            }
        });
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for CommandSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}
