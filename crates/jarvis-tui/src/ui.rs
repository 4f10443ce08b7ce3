use std::f64::consts::TAU;

use jarvis_core::visuals::{RingFrame, SceneFrame, WAVEFORM_RADIUS};
use jarvis_core::boot::BOOT_MESSAGES;
use jarvis_core::{BackendStatus, ChatRole, NotificationKind, VoiceState};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::Marker,
    text::{Line, Span, Text},
    widgets::{
        canvas::{Canvas, Circle, Context, Line as CanvasLine, Points},
        Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Sparkline, Wrap,
    },
    Frame,
};

use crate::app::{App, Screen};

/// Tilt of the scene toward the viewer, in radians
const VIEW_TILT: f64 = 0.35;
/// Half height of the scene in canvas units
const SCENE_EXTENT: f64 = 5.5;
/// Smallest area the canvas is drawn in
const MIN_SCENE: (u16, u16) = (24, 8);

fn state_color(state: VoiceState) -> Color {
    match state {
        VoiceState::Idle => Color::Cyan,
        VoiceState::Listening => Color::Green,
        VoiceState::Processing => Color::Yellow,
        VoiceState::Speaking => Color::Magenta,
    }
}

fn status_color(status: BackendStatus) -> Color {
    match status {
        BackendStatus::Checking => Color::Yellow,
        BackendStatus::Online => Color::Green,
        BackendStatus::Offline => Color::Red,
    }
}

fn notification_color(kind: NotificationKind) -> Color {
    match kind {
        NotificationKind::Success => Color::Green,
        NotificationKind::Info => Color::Cyan,
        NotificationKind::Warning => Color::Yellow,
        NotificationKind::Error => Color::Red,
    }
}

/// Style `**bold**` and `` `code` `` spans in an assistant reply
fn styled_reply_line(text: &str) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, part) in text.split("**").enumerate() {
        let bold = i % 2 == 1;
        for (j, piece) in part.split('`').enumerate() {
            if piece.is_empty() {
                continue;
            }
            let mut style = Style::default();
            if bold {
                style = style.add_modifier(Modifier::BOLD);
            }
            if j % 2 == 1 {
                style = style.fg(Color::LightBlue);
            }
            spans.push(Span::styled(piece.to_string(), style));
        }
    }
    Line::from(spans)
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    Rect::new(
        area.x + (area.width.saturating_sub(width)) / 2,
        area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    )
}

pub fn render(app: &mut App, frame: &mut Frame) {
    match app.screen {
        Screen::Boot => render_boot(app, frame),
        Screen::Dashboard => render_dashboard(app, frame),
    }
}

fn render_boot(app: &App, frame: &mut Frame) {
    let area = frame.area();
    let [reactor_area, text_area] =
        Layout::vertical([Constraint::Percentage(45), Constraint::Min(0)]).areas(area);

    render_reactor(app, frame, reactor_area);

    let mut lines: Vec<Line> = app
        .boot
        .visible_lines()
        .iter()
        .map(|line| Line::from(Span::styled(*line, Style::default().fg(Color::Cyan))).centered())
        .collect();
    if app.boot.prompt_visible() {
        // Fade the prompt in and out with the reactor pulse
        let style = if app.boot.pulse() % 20 < 12 {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        lines.push(Line::default());
        lines.push(Line::from(Span::styled("[ PRESS ENTER TO INITIALIZE ]", style)).centered());
    }

    frame.render_widget(Paragraph::new(Text::from(lines)), text_area);
}

fn render_reactor(app: &App, frame: &mut Frame, area: Rect) {
    if area.width < MIN_SCENE.0 / 2 || area.height < MIN_SCENE.1 / 2 {
        return;
    }
    let progress = app.boot.visible_lines().len() as f64 / BOOT_MESSAGES.len() as f64;
    let reactor = jarvis_core::visuals::arc_reactor(
        app.scene_time(),
        0.5 + progress * 0.5,
        !app.boot.prompt_visible(),
        1.0,
    );
    let pulse = f64::from(app.boot.pulse()) / 100.0;
    let half_x = 1.2 * f64::from(area.width) / (2.0 * f64::from(area.height.max(1)));

    let canvas = Canvas::default()
        .marker(Marker::Braille)
        .x_bounds([-half_x, half_x])
        .y_bounds([-1.2, 1.2])
        .paint(move |ctx| {
            let glow = if reactor.intensity > 1.0 { Color::LightCyan } else { Color::Cyan };
            for &(radius, angle, scale) in &reactor.rings {
                let r = radius * scale;
                ctx.draw(&Circle { x: 0.0, y: 0.0, radius: r, color: Color::DarkGray });
                // Three bright notches per ring
                for k in 0..3 {
                    let a = angle + reactor.rotation + TAU / 3.0 * f64::from(k);
                    draw_arc(ctx, (0.0, 0.0), r, a, 0.6, 1.0, glow);
                }
            }
            ctx.draw(&Circle {
                x: 0.0,
                y: 0.0,
                radius: 0.15 * reactor.core_scale * (0.9 + pulse * 0.2),
                color: Color::White,
            });
        });
    frame.render_widget(canvas, area);
}

fn render_dashboard(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [visual_area, chat_area] =
        Layout::horizontal([Constraint::Percentage(55), Constraint::Percentage(45)]).areas(body_area);
    let [scene_area, metrics_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(8)]).areas(visual_area);

    render_scene(app, frame, scene_area);
    render_metrics(app, frame, metrics_area);
    render_chat(app, frame, chat_area);
    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if app.voice.overlay_visible() {
        render_voice_overlay(app, frame, scene_area);
    }
    render_notifications(app, frame, body_area);
    if app.alert.is_some() {
        render_alert(app, frame, area);
    } else if app.show_plugins {
        render_plugins(app, frame, area);
    } else if app.show_history {
        render_history(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.voice.state();
    let mut spans = vec![
        Span::styled(" J.A.R.V.I.S. ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!(" {} ", app.status.label()),
            Style::default().fg(Color::Black).bg(status_color(app.status)),
        ),
        Span::raw(" "),
        Span::styled(
            format!(" {} ", state.label()),
            Style::default().fg(Color::Black).bg(state_color(state)),
        ),
    ];
    if app.push_open() {
        spans.push(Span::styled(" LIVE", Style::default().fg(Color::Green)));
    }
    if !app.voice.audio_enabled() {
        spans.push(Span::styled(" MUTED", Style::default().fg(Color::Red)));
    }
    spans.push(Span::styled(
        format!("  {} conversations  v{}", app.store.conversation_count(), env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::DarkGray),
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black)), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let bindings: &[(&str, &str)] = if app.show_plugins {
        &[("j/k", "nav"), ("Space", "toggle"), ("d", "uninstall"), ("r", "reload"), ("Esc", "close")]
    } else if app.show_history {
        &[("j/k", "nav"), ("Enter", "view"), ("Esc", "close")]
    } else if app.voice.overlay_visible() {
        &[("F2", "mic"), ("F4", "stop"), ("Esc", "close"), ("^C", "quit")]
    } else if app.viewing.is_some() {
        &[("PgUp/PgDn", "scroll"), ("F6", "history"), ("Esc", "back to chat"), ("^C", "quit")]
    } else {
        &[
            ("Enter", "send"),
            ("F2", "mic"),
            ("F3", "mute"),
            ("F5", "plugins"),
            ("F6", "history"),
            ("^N", "new chat"),
            ("^L", "clear"),
            ("^C", "quit"),
        ]
    };

    let spans: Vec<Span> = bindings
        .iter()
        .flat_map(|(key, label)| {
            [
                Span::styled(format!(" {key} "), key_style),
                Span::styled(format!(" {label} "), label_style),
            ]
        })
        .collect();
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_scene(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.voice.state();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(state_color(state)))
        .title(" Holographic Interface ");

    let inner = block.inner(area);
    if inner.width < MIN_SCENE.0 || inner.height < MIN_SCENE.1 {
        let fallback = Paragraph::new("3D View Unavailable")
            .style(Style::default().fg(Color::DarkGray))
            .centered()
            .block(block);
        frame.render_widget(fallback, area);
        return;
    }

    let t = app.scene_time();
    let scene = app.scene.frame(t, app.level.value(), state);
    let twinkle: Vec<f64> = (0..scene.particles.len())
        .map(|i| app.scene.particles().twinkle(i, t))
        .collect();
    let color = state_color(state);

    // Braille dots are square, cells are twice as tall as wide
    let half_x = SCENE_EXTENT * f64::from(inner.width) / (2.0 * f64::from(inner.height));
    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([-half_x, half_x])
        .y_bounds([-SCENE_EXTENT, SCENE_EXTENT])
        .paint(move |ctx| paint_scene(ctx, &scene, &twinkle, color));
    frame.render_widget(canvas, area);
}

fn paint_scene(ctx: &mut Context, scene: &SceneFrame, twinkle: &[f64], color: Color) {
    let mut bright = Vec::new();
    let mut dim = Vec::new();
    for (point, glow) in scene.particles.iter().zip(twinkle) {
        let projected = point.project(VIEW_TILT);
        if *glow > 0.8 {
            bright.push(projected);
        } else {
            dim.push(projected);
        }
    }
    ctx.draw(&Points { coords: &dim, color: Color::DarkGray });
    ctx.draw(&Points { coords: &bright, color: Color::White });
    ctx.layer();

    for ring in &scene.rings {
        draw_ring(ctx, ring, color);
    }

    // Waveform bars around the core
    let bar_count = scene.bars.len().max(1) as f64;
    for (i, height) in scene.bars.iter().enumerate() {
        let angle = TAU * i as f64 / bar_count;
        let (sin, cos) = angle.sin_cos();
        let inner = WAVEFORM_RADIUS * 0.55;
        let outer = inner + height * 1.2;
        ctx.draw(&CanvasLine {
            x1: cos * inner,
            y1: sin * inner * VIEW_TILT.cos(),
            x2: cos * outer,
            y2: sin * outer * VIEW_TILT.cos(),
            color,
        });
    }
    ctx.layer();

    let core = &scene.core;
    let glow = if scene.active { Color::LightCyan } else { Color::Cyan };
    ctx.draw(&Circle {
        x: core.wobble,
        y: 0.0,
        radius: core.radius * 0.5 * core.glow_scale,
        color: glow,
    });
    ctx.draw(&Circle {
        x: core.wobble,
        y: 0.0,
        radius: core.radius * 0.3 * core.inner_scale,
        color: Color::White,
    });
}

fn draw_ring(ctx: &mut Context, ring: &RingFrame, color: Color) {
    let tilt = ring.tilt + VIEW_TILT;
    let squash = tilt.cos().abs().max(0.15);
    draw_arc(ctx, (0.0, 0.0), ring.radius, 0.0, TAU, squash, Color::DarkGray);
    for (start, length) in ring.arcs() {
        draw_arc(ctx, (0.0, 0.0), ring.radius, start, length, squash, color);
    }
}

/// Elliptical arc as short line segments
fn draw_arc(
    ctx: &mut Context,
    center: (f64, f64),
    radius: f64,
    start: f64,
    length: f64,
    squash: f64,
    color: Color,
) {
    let steps = ((length.abs() / TAU) * 48.0).ceil().max(2.0) as usize;
    let point = |angle: f64| {
        let (sin, cos) = angle.sin_cos();
        (center.0 + cos * radius, center.1 + sin * radius * squash)
    };
    let mut previous = point(start);
    for step in 1..=steps {
        let next = point(start + length * step as f64 / steps as f64);
        ctx.draw(&CanvasLine {
            x1: previous.0,
            y1: previous.1,
            x2: next.0,
            y2: next.1,
            color,
        });
        previous = next;
    }
}

fn render_metrics(app: &App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" System Metrics ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(metrics) = app.metrics else {
        let message = match app.status {
            BackendStatus::Offline => "Backend offline",
            _ => "Awaiting telemetry...",
        };
        frame.render_widget(
            Paragraph::new(message).style(Style::default().fg(Color::DarkGray)),
            inner,
        );
        return;
    };

    let [cpu_area, memory_area, disk_area, spark_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(0),
    ])
    .areas(inner);

    for (label, value, gauge_area) in [
        ("CPU", metrics.cpu, cpu_area),
        ("MEM", metrics.memory, memory_area),
        ("DISK", metrics.disk, disk_area),
    ] {
        let color = if value >= 90.0 {
            Color::Red
        } else if value >= 70.0 {
            Color::Yellow
        } else {
            Color::Cyan
        };
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(color).bg(Color::Black))
            .ratio((value / 100.0).clamp(0.0, 1.0))
            .label(format!("{label} {value:.1}%"));
        frame.render_widget(gauge, gauge_area);
    }

    let history: Vec<u64> = app.cpu_history.iter().copied().collect();
    let sparkline = Sparkline::default()
        .data(&history)
        .max(100)
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(sparkline, spark_area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [history_area, input_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = history_area.height.saturating_sub(2);
    app.chat_width = history_area.width.saturating_sub(2);

    let (title, border) = match &app.viewing {
        Some(conversation) => (format!(" History: {} (read only) ", conversation.title()), Color::Magenta),
        None => (" Conversation ".to_string(), Color::Cyan),
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title);
    let loading = app.viewing.is_none() && app.chat.is_loading();

    let chat_text = if app.displayed_messages().is_empty() && !loading {
        Text::from(Span::styled(
            "How may I assist you, sir? Say \"Jarvis\" followed by a command, or type below.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in app.displayed_messages() {
            let time = msg.timestamp.format("%H:%M").to_string();
            match msg.role {
                ChatRole::User => {
                    let mut header = vec![Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )];
                    if msg.is_voice {
                        header.push(Span::styled(" [voice]", Style::default().fg(Color::Green)));
                    }
                    header.push(Span::styled(format!(" {time}"), Style::default().fg(Color::DarkGray)));
                    lines.push(Line::from(header));
                    lines.push(Line::from(msg.content.as_str()));
                }
                ChatRole::Assistant => {
                    let mut header = vec![Span::styled(
                        "JARVIS:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )];
                    if let Some(plugin) = &msg.plugin_used {
                        header.push(Span::styled(format!(" via {plugin}"), Style::default().fg(Color::Magenta)));
                    }
                    header.push(Span::styled(format!(" {time}"), Style::default().fg(Color::DarkGray)));
                    lines.push(Line::from(header));
                    lines.extend(msg.content.lines().map(|l| -> Line<'_> { styled_reply_line(l) }));
                }
                ChatRole::Error => {
                    lines.push(Line::from(Span::styled(
                        msg.content.as_str(),
                        Style::default().fg(Color::Red),
                    )));
                }
            }
            lines.push(Line::default());
        }

        if loading {
            lines.push(Line::from(Span::styled(
                "JARVIS:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", ".".repeat(app.thinking_dots())),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, history_area);

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.chat.is_loading() { Color::DarkGray } else { Color::Yellow }))
        .title(" Message ");

    // Keep the cursor visible by scrolling the input horizontally
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width > 0 && app.cursor >= inner_width {
        app.cursor - inner_width + 1
    } else {
        0
    };
    let visible_text: String = app.input.chars().skip(scroll_offset).take(inner_width).collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, input_area);

    if app.alert.is_none() && !app.show_plugins && !app.show_history && app.viewing.is_none() {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}

fn render_voice_overlay(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.voice.state();
    let popup_area = centered(area, 48, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(state_color(state)))
        .title(" Voice ");

    let meter_width = popup_area.width.saturating_sub(4) as usize;
    let filled = (f64::from(app.level.value()) * meter_width as f64).round() as usize;
    let meter = format!("{}{}", "█".repeat(filled), "░".repeat(meter_width.saturating_sub(filled)));

    let transcript = if app.voice.transcript().is_empty() {
        match state {
            VoiceState::Listening => Span::styled(
                "Say \"Jarvis\" followed by a command",
                Style::default().fg(Color::DarkGray),
            ),
            _ => Span::raw(""),
        }
    } else {
        Span::styled(format!("\"{}\"", app.voice.transcript()), Style::default().fg(Color::White))
    };

    let text = Text::from(vec![
        Line::from(Span::styled(
            state.label(),
            Style::default().fg(state_color(state)).add_modifier(Modifier::BOLD),
        ))
        .centered(),
        Line::from(Span::styled(meter, Style::default().fg(state_color(state)))),
        Line::from(transcript),
        Line::from(Span::styled("Esc close   F4 stop speaking", Style::default().fg(Color::DarkGray))).centered(),
    ]);

    frame.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), popup_area);
}

fn render_notifications(app: &App, frame: &mut Frame, area: Rect) {
    let width = 40.min(area.width);
    let mut y = area.y;
    for notification in app.store.notifications().iter().rev() {
        if y + 3 > area.y + area.height {
            break;
        }
        let toast_area = Rect::new(area.x + area.width - width, y, width, 3);
        frame.render_widget(Clear, toast_area);
        let color = notification_color(notification.kind);
        let toast = Paragraph::new(notification.message.as_str())
            .style(Style::default().fg(Color::White))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color))
                    .title(Span::styled(format!(" {} ", notification.title), Style::default().fg(color).bold())),
            );
        frame.render_widget(toast, toast_area);
        y += 3;
    }
}

fn render_alert(app: &App, frame: &mut Frame, area: Rect) {
    let Some(message) = &app.alert else {
        return;
    };
    let popup_area = centered(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Alert ");
    let text = Text::from(vec![
        Line::from(message.as_str()),
        Line::default(),
        Line::from(Span::styled("Press Enter to continue", Style::default().fg(Color::DarkGray))),
    ]);
    frame.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), popup_area);
}

fn render_plugins(app: &mut App, frame: &mut Frame, area: Rect) {
    let plugins = app.store.plugins();
    let popup_area = centered(area, 70, plugins.len() as u16 * 2 + 4);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Plugins ");

    if plugins.is_empty() {
        frame.render_widget(
            Paragraph::new("No plugins installed.")
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            popup_area,
        );
        return;
    }

    let items: Vec<ListItem> = plugins
        .iter()
        .map(|plugin| {
            let (marker, style) = if plugin.enabled {
                ("[on] ", Style::default().fg(Color::Green))
            } else {
                ("[off]", Style::default().fg(Color::DarkGray))
            };
            ListItem::new(vec![
                Line::from(vec![
                    Span::styled(format!("{marker} "), style),
                    Span::styled(plugin.name.clone(), Style::default().bold()),
                    Span::styled(
                        format!("  {} v{}", plugin.category, plugin.version),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]),
                Line::from(Span::styled(
                    format!("      {}", plugin.description),
                    Style::default().fg(Color::Gray),
                )),
            ])
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Blue).fg(Color::White))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.plugins_state);
}

fn render_history(app: &mut App, frame: &mut Frame, area: Rect) {
    let count = app.store.conversation_count();
    let height = (count.min(10) as u16) * 2 + 4;
    let popup_area = centered(area, 70, height);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(format!(" Conversation History ({count}) "));

    if count == 0 {
        frame.render_widget(
            Paragraph::new("No saved conversations.")
                .style(Style::default().fg(Color::DarkGray))
                .block(block),
            popup_area,
        );
        return;
    }

    let items: Vec<ListItem> = app
        .store
        .conversations()
        .map(|conversation| {
            ListItem::new(vec![
                Line::from(Span::styled(conversation.title(), Style::default().bold())),
                Line::from(Span::styled(
                    format!(
                        "  {}  {} messages",
                        conversation.timestamp.format("%Y-%m-%d %H:%M"),
                        conversation.messages.len()
                    ),
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Blue).fg(Color::White))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.history_state);
}

/// Shown after the UI loop crashes
pub fn render_reboot(frame: &mut Frame, reason: &str) {
    let area = frame.area();
    let popup_area = centered(area, 64, 9);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" SYSTEM MALFUNCTION ");
    let text = Text::from(vec![
        Line::from(Span::styled(
            "J.A.R.V.I.S. encountered a critical error.",
            Style::default().fg(Color::Red).bold(),
        )),
        Line::default(),
        Line::from(Span::styled(reason.to_string(), Style::default().fg(Color::Gray))),
        Line::default(),
        Line::from(vec![
            Span::styled(" r ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(" reboot systems   "),
            Span::styled(" q ", Style::default().bg(Color::DarkGray).fg(Color::White)),
            Span::raw(" shut down"),
        ]),
    ]);
    frame.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_app;
    use jarvis_core::BootSequence;
    use ratatui::{backend::TestBackend, Terminal};

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_styled_reply_line() {
        let line = styled_reply_line("Power at **100%** via `arc`");
        let texts: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["Power at ", "100%", " via ", "arc"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style.fg, Some(Color::LightBlue));
    }

    #[tokio::test]
    async fn test_dashboard_renders_chat_and_status() {
        let (mut app, _rx) = test_app();
        app.send_message("status report", false);
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("J.A.R.V.I.S."));
        assert!(text.contains("CHECKING"));
        assert!(text.contains("status report"));
        assert!(text.contains("Thinking"));
    }

    #[tokio::test]
    async fn test_small_terminal_shows_fallback() {
        let (mut app, _rx) = test_app();
        let mut terminal = Terminal::new(TestBackend::new(60, 14)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        assert!(buffer_text(&terminal).contains("3D View Unavailable"));
    }

    #[tokio::test]
    async fn test_boot_screen_reveals_lines() {
        let (mut app, _rx) = test_app();
        app.screen = Screen::Boot;
        app.boot = BootSequence::new();
        app.boot.advance(std::time::Duration::from_millis(650));
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("STARK INDUSTRIES"));
        assert!(text.contains("INITIALIZING ARC REACTOR"));
        assert!(!text.contains("POWER LEVEL"));
    }

    #[tokio::test]
    async fn test_history_popup_and_read_only_view() {
        let (mut app, _rx) = test_app();
        app.send_message("diagnostics on the suit", false);
        app.new_conversation();
        app.open_history();

        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("Conversation History (1)"));
        assert!(text.contains("diagnostics on the suit"));
        assert!(text.contains("1 messages"));

        app.view_selected_conversation();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("(read only)"));
        assert!(text.contains("back to chat"));
        assert!(!text.contains("Conversation History"));
    }
}
