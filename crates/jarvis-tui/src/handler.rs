use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, Screen};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
        AppEvent::Poll(event) => app.on_poll(event),
        AppEvent::Push(event) => app.on_push(event),
        AppEvent::PushMetrics(metrics) => app.set_metrics(metrics),
        AppEvent::ChatDone { id, outcome } => app.on_chat_done(id, outcome),
        AppEvent::Recognition { session, event } => app.on_recognition(session, event),
        AppEvent::SpeechFinished { utterance, result } => app.on_speech_finished(utterance, result),
        AppEvent::PluginsLoaded(result) => app.on_plugins_loaded(result),
        AppEvent::PluginToggled { id, enabled, result } => app.on_plugin_toggled(&id, enabled, result),
        AppEvent::PluginRemoved { id, result } => app.on_plugin_removed(&id, result),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any mode
    if ctrl && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }

    match app.screen {
        Screen::Boot => {
            if app.boot.accepts(key.code == KeyCode::Enter) {
                app.enter_dashboard();
            }
        }
        Screen::Dashboard => {
            // Alerts block everything else until acknowledged
            if app.alert.is_some() {
                if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
                    app.alert = None;
                }
                return;
            }
            if app.show_plugins {
                handle_plugins(app, key);
                return;
            }
            if app.show_history {
                handle_history(app, key);
                return;
            }
            handle_dashboard(app, key, ctrl);
        }
    }
}

fn handle_plugins(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.show_plugins = false,
        KeyCode::Char('j') | KeyCode::Down => app.plugins_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.plugins_nav_up(),
        KeyCode::Char(' ') | KeyCode::Enter => app.toggle_selected_plugin(),
        KeyCode::Char('d') => app.uninstall_selected_plugin(),
        KeyCode::Char('r') => app.load_plugins(),
        _ => {}
    }
}

fn handle_history(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.show_history = false,
        KeyCode::Char('j') | KeyCode::Down => app.history_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.history_nav_up(),
        KeyCode::Enter => app.view_selected_conversation(),
        _ => {}
    }
}

fn handle_dashboard(app: &mut App, key: KeyEvent, ctrl: bool) {
    if ctrl {
        match key.code {
            KeyCode::Char('v') => app.toggle_microphone(),
            KeyCode::Char('s') => app.stop_speaking(),
            KeyCode::Char('p') => app.open_plugins(),
            KeyCode::Char('o') => app.open_history(),
            KeyCode::Char('n') => app.new_conversation(),
            KeyCode::Char('l') => app.clear_history(),
            KeyCode::Char('u') => {
                app.input.clear();
                app.cursor = 0;
            }
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::F(2) => app.toggle_microphone(),
        KeyCode::F(3) => app.toggle_audio(),
        KeyCode::F(4) => app.stop_speaking(),
        KeyCode::F(5) => app.open_plugins(),
        KeyCode::F(6) => app.open_history(),
        KeyCode::Esc => {
            if app.voice.overlay_visible() {
                app.close_voice_overlay();
            } else if app.viewing.is_some() {
                app.close_history_view();
            } else {
                app.store.dismiss_oldest();
            }
        }
        KeyCode::PageUp => app.scroll_chat_up(),
        KeyCode::PageDown => app.scroll_chat_down(),
        // Saved conversations are read-only
        _ if app.viewing.is_some() => {}
        KeyCode::Enter => app.submit_input(),
        _ => edit_input(app, key.code),
    }
}

fn edit_input(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_idx = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_idx);
            }
        }
        KeyCode::Delete => {
            if app.cursor < app.input.chars().count() {
                let byte_idx = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_idx);
            }
        }
        KeyCode::Left => app.cursor = app.cursor.saturating_sub(1),
        KeyCode::Right => {
            if app.cursor < app.input.chars().count() {
                app.cursor += 1;
            }
        }
        KeyCode::Home => app.cursor = 0,
        KeyCode::End => app.cursor = app.input.chars().count(),
        KeyCode::Char(c) => {
            let byte_idx = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_idx, c);
            app.cursor += 1;
        }
        _ => {}
    }
}
