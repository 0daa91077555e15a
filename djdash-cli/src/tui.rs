//! Terminal host: draws the dashboard and feeds it keys and background
//! events from one loop.

use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Frame;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use tracing::{debug, warn};

use djdash_core::interact::{output_lines, sanitize_output_for_display};
use djdash_core::reducer::{UiReceiver, drain_pending};

use crate::app::{App, Mode};
use crate::ui::styles;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(3);

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

pub fn run(mut app: App, mut events: UiReceiver) -> io::Result<()> {
    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, &mut app, &mut events);
    app.dash.shutdown();
    restore_terminal(terminal)?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    events: &mut UiReceiver,
) -> io::Result<()> {
    let mut last_save = Instant::now();
    loop {
        if drain_pending(&mut app.dash, events) > 0 {
            app.after_events();
        }

        terminal.draw(|f| render(f, app))?;

        if app.should_quit() {
            return Ok(());
        }

        if last_save.elapsed() >= AUTOSAVE_INTERVAL {
            match app.dash.save_session() {
                Ok(true) => debug!("session saved"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "autosave failed"),
            }
            last_save = Instant::now();
        }

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let CEvent::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                app.handle_key(key);
            }
        }
    }
}

fn render(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3), Constraint::Length(1)])
        .split(f.area());

    render_tab_bar(f, app, chunks[0]);
    render_output(f, app, chunks[1]);
    render_footer(f, app, chunks[2]);

    if app.show_help {
        render_help(f, f.area());
    }
}

fn render_tab_bar(f: &mut Frame, app: &App, area: Rect) {
    let active = app.dash.tabs.active_id();
    let mut spans = Vec::new();
    for id in app.dash.tabs.order() {
        let Some(tab) = app.dash.tabs.get(id) else {
            continue;
        };
        let is_active = active == Some(id.as_str());
        spans.push(Span::styled(format!(" {} ", styles::route_icon(tab.route)), styles::route(tab.route)));
        spans.push(Span::styled(fit_title(&tab.title, 24), styles::tab(is_active)));
        spans.push(Span::raw("  "));
    }
    let (badge, badge_style) = styles::server_badge(app.dash.server_running());
    spans.push(Span::styled(badge, badge_style));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_output(f: &mut Frame, app: &mut App, area: Rect) {
    let focused = !matches!(app.mode, Mode::Normal) || app.dash.selection().is_some();
    let title = app
        .dash
        .active_tab()
        .map(|tab| {
            let follow = if tab.autoscroll { "follow" } else { "frozen" };
            format!(" {} [{}] ", tab.title, follow)
        })
        .unwrap_or_else(|| " no output ".to_string());
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(styles::border(focused))
        .title(title);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let height = inner.height as usize;
    app.viewport = height.max(1);
    let top = app.dash.view_top(app.viewport);
    let selection = app.dash.selection();

    let Some(tab) = app.dash.active_tab() else {
        return;
    };
    let display = sanitize_output_for_display(&tab.text);
    let lines: Vec<Line> = output_lines(&display)
        .into_iter()
        .enumerate()
        .skip(top)
        .take(height)
        .map(|(idx, line)| {
            let style = match selection {
                Some(sel) if sel.contains(idx) => styles::selection(),
                _ => styles::text(),
            };
            Line::styled(line.to_string(), style)
        })
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let line = match &app.mode {
        Mode::Prompt { kind, buffer } => Line::from(vec![
            Span::styled(kind.label(), styles::key_hint()),
            Span::styled(buffer.clone(), styles::text()),
        ]),
        // Input may be a password; never echo it.
        Mode::Input { buffer } => Line::from(vec![
            Span::styled("input: ", styles::key_hint()),
            Span::styled("*".repeat(buffer.chars().count()), styles::text()),
        ]),
        Mode::Normal => match app.dash.status() {
            Some(status) => Line::styled(status.to_string(), styles::status(app.status_is_error())),
            None => Line::styled(
                ": run  / search  tab next  s/S server  u/d containers  v select  ? help  q quit",
                styles::text_dim(),
            ),
        },
    };
    f.render_widget(Paragraph::new(line), area);
}

const HELP: &[(&str, &str)] = &[
    (":", "Run a command"),
    ("1-9", "Run a project task"),
    ("/  n", "Search, next match"),
    ("tab", "Next tab (shift+tab previous)"),
    ("l", "Switch between command and logs"),
    ("x  c", "Close tab, clear tab"),
    ("f  G", "Freeze output, follow tail"),
    ("v  y", "Select lines, copy"),
    ("i", "Type into the running process (ctrl+d closes stdin)"),
    ("s  S", "Start, stop the dev server"),
    ("u  d", "Start, stop containers"),
    ("q", "Quit"),
];

fn render_help(f: &mut Frame, area: Rect) {
    let width = area.width.min(64);
    let height = (HELP.len() as u16 + 2).min(area.height);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };
    let lines: Vec<Line> = HELP
        .iter()
        .map(|(key, what)| {
            Line::from(vec![
                Span::styled(format!("  {key:<6}"), styles::key_hint()),
                Span::styled(*what, styles::text()),
            ])
        })
        .collect();
    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).border_style(styles::border(true)).title(" Keys ")),
        popup,
    );
}

fn fit_title(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let cut: String = s.chars().take(width.saturating_sub(1)).collect();
    format!("{cut}…")
}
