use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use futures_util::StreamExt;
use jarvis_core::speech::{
    CommandSynthesizer, MicrophoneRecognizer, NullRecognizer, RecognizerSettings,
};
use jarvis_core::{Config, JarvisClient, SpeechRecognizer, SpeechSynthesizer, Store};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, EventSender, TICK_RATE};

#[derive(Parser, Debug)]
#[command(name = "jarvis", version)]
#[command(about = "Terminal dashboard for the J.A.R.V.I.S. voice and chat assistant")]
struct Cli {
    /// Backend URL, overriding config and JARVIS_API_URL
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,
    /// Go straight to the dashboard
    #[arg(long)]
    no_boot: bool,
    /// Start with spoken replies turned off
    #[arg(long)]
    mute: bool,
    /// Disable microphone input
    #[arg(long)]
    no_voice: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if self.no_boot {
            config.skip_boot = true;
        }
        if self.mute {
            config.audio_enabled = false;
        }
        if self.no_voice {
            config.voice_enabled = false;
        }
    }
}

/// Log to a file; the terminal belongs to the UI
fn init_logging() -> Result<()> {
    let dir = Config::data_dir()?;
    fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("jarvis.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn build_app(config: Config, events: EventSender) -> Result<App> {
    let client = JarvisClient::new(&config.api_base())?;

    let store = match Store::default_path() {
        Ok(path) => Store::open(path, config.conversation_cap),
        Err(e) => {
            warn!("no data directory, history will not be saved: {e}");
            Store::in_memory(config.conversation_cap)
        }
    };

    let recognizer: Box<dyn SpeechRecognizer> = if config.voice_enabled {
        Box::new(MicrophoneRecognizer::new(
            client.clone(),
            config.microphone.clone(),
            RecognizerSettings::default(),
        ))
    } else {
        Box::new(NullRecognizer)
    };
    let synthesizer: Box<dyn SpeechSynthesizer> =
        Box::new(CommandSynthesizer::new(config.tts_voice.clone()));

    Ok(App::new(config, store, client, recognizer, synthesizer, events))
}

async fn run_session(config: Config) -> Result<()> {
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(TICK_RATE);
    let mut app = build_app(config, events.sender())?;
    app.connect();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;
        match events.next().await {
            Some(event) => handler::handle_event(&mut app, event),
            None => break,
        }
    }

    if let Err(e) = app.store.save() {
        warn!("failed to save state: {e}");
    }
    info!("session ended");
    Ok(())
}

/// Show the crash screen. Returns true to reboot.
async fn offer_reboot(reason: &str) -> Result<bool> {
    let mut terminal = tui::init()?;
    let mut reader = EventStream::new();

    let reboot = loop {
        terminal.draw(|frame| ui::render_reboot(frame, reason))?;
        match reader.next().await {
            Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('r') | KeyCode::Enter => break true,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break false,
                KeyCode::Char('q') | KeyCode::Esc => break false,
                _ => {}
            },
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("terminal event stream error: {e}");
                break false;
            }
            None => break false,
        }
    };

    tui::restore()?;
    Ok(reboot)
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown failure".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("warning: logging disabled: {e}");
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("could not read config, using defaults: {e}");
        Config::new()
    });
    config.apply_env();
    cli.apply(&mut config);
    info!(api = %config.api_base(), voice = config.voice_enabled, audio = config.audio_enabled, "starting");

    tui::install_panic_hook();

    // Top-level boundary: a panicking session can be rebooted in place
    loop {
        match tokio::spawn(run_session(config.clone())).await {
            Ok(result) => {
                tui::restore()?;
                return result;
            }
            Err(e) if e.is_panic() => {
                let reason = panic_reason(e.into_panic());
                error!("UI session crashed: {reason}");
                if !offer_reboot(&reason).await? {
                    return Ok(());
                }
                info!("rebooting");
                // Later sessions skip the boot sequence
                config.skip_boot = true;
            }
            Err(e) => {
                tui::restore()?;
                return Err(e.into());
            }
        }
    }
}
