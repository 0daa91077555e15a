//! Key handling for the terminal host. Maps keys onto [`Dashboard`]
//! operations; rendering lives in `tui`.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

use djdash_core::config::DashConfig;
use djdash_core::dashboard::Dashboard;
use djdash_core::error::InteractError;
use djdash_core::heuristics::has_interactive_prompt;
use djdash_core::interact::ClipboardSink;
use djdash_core::job::CommandSpec;
use djdash_core::output::TabId;

use crate::containers::{ContainerAction, run_container_action};
use crate::runner::{Pipeline, stop_server};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    Command,
    Search,
}

impl PromptKind {
    pub fn label(&self) -> &'static str {
        match self {
            PromptKind::Command => "run: ",
            PromptKind::Search => "search: ",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Prompt { kind: PromptKind, buffer: String },
    /// Typing into the active process' stdin.
    Input { buffer: String },
}

pub struct App {
    pub dash: Dashboard,
    pub config: DashConfig,
    pub mode: Mode,
    pub show_help: bool,
    /// Output pane height from the last render.
    pub viewport: usize,
    pipeline: Pipeline,
    clipboard: Box<dyn ClipboardSink>,
    status_is_error: bool,
    /// Tab and text length at which the operator left an auto-entered
    /// input prompt; no auto-entry again until more output arrives.
    dismissed_prompt: Option<(TabId, usize)>,
    quit: bool,
}

impl App {
    pub fn new(
        dash: Dashboard,
        config: DashConfig,
        pipeline: Pipeline,
        clipboard: Box<dyn ClipboardSink>,
    ) -> Self {
        Self {
            dash,
            config,
            mode: Mode::Normal,
            show_help: false,
            viewport: 20,
            pipeline,
            clipboard,
            status_is_error: false,
            dismissed_prompt: None,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn status_is_error(&self) -> bool {
        self.status_is_error
    }

    fn info(&mut self, message: impl Into<String>) {
        self.status_is_error = false;
        self.dash.set_status(message);
    }

    fn report<T>(&mut self, result: Result<T, InteractError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.status_is_error = true;
                self.dash.set_status(e.to_string());
                None
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }
        match self.mode.clone() {
            Mode::Normal if self.dash.selection().is_some() => self.handle_selection(key),
            Mode::Normal => self.handle_normal(key),
            Mode::Prompt { kind, buffer } => self.handle_prompt(key, kind, buffer),
            Mode::Input { buffer } => self.handle_input(key, buffer),
        }
    }

    fn handle_normal(&mut self, key: KeyEvent) {
        let page = self.viewport.max(1) as isize;
        match key.code {
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Esc => {
                self.show_help = false;
                self.dash.clear_status();
            }
            KeyCode::Char(':') | KeyCode::Char('!') => {
                self.mode = Mode::Prompt { kind: PromptKind::Command, buffer: String::new() };
            }
            KeyCode::Char('/') => {
                self.mode = Mode::Prompt { kind: PromptKind::Search, buffer: String::new() };
            }
            KeyCode::Char('n') => {
                let found = self.dash.search_next();
                if let Some(line) = self.report(found) {
                    self.info(format!("Match at line {}", line + 1));
                }
            }
            KeyCode::Tab => {
                self.dash.next_tab();
            }
            KeyCode::BackTab => {
                self.dash.prev_tab();
            }
            KeyCode::Char('l') => {
                self.dash.toggle_route();
            }
            KeyCode::Char('x') => {
                let closed = self.dash.close_current_tab();
                self.report(closed);
            }
            KeyCode::Char('c') => {
                let cleared = self.dash.clear_current_tab();
                self.report(cleared);
            }
            KeyCode::Char('f') => self.toggle_follow(),
            KeyCode::Up | KeyCode::Char('k') => self.scroll(-1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll(1),
            KeyCode::PageUp => self.scroll(-page),
            KeyCode::PageDown => self.scroll(page),
            KeyCode::Char('g') | KeyCode::Home => {
                let top = self.dash.scroll_to_top();
                self.report(top);
            }
            KeyCode::Char('G') | KeyCode::End => {
                let tail = self.dash.follow_tail();
                self.report(tail);
            }
            KeyCode::Char('v') => {
                let toggled = self.dash.toggle_selection();
                self.report(toggled);
            }
            KeyCode::Char('y') => self.copy(),
            KeyCode::Char('i') => {
                let entered = self.dash.enter_input_mode();
                if self.report(entered).is_some() {
                    self.mode = Mode::Input { buffer: String::new() };
                }
            }
            KeyCode::Char('s') => {
                let server = self.config.server.clone();
                self.pipeline.start_server(&mut self.dash, &server.command, &server.title);
            }
            KeyCode::Char('S') => {
                let stopped = stop_server(&mut self.dash);
                if self.report(stopped).is_some() {
                    self.info("Server stop signal sent");
                }
            }
            KeyCode::Char('u') => self.containers(ContainerAction::Start),
            KeyCode::Char('d') => self.containers(ContainerAction::Stop),
            KeyCode::Char(c @ '1'..='9') => self.run_task(c as usize - '1' as usize),
            _ => {}
        }
    }

    fn handle_selection(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                let moved = self.dash.move_selection(-1);
                self.report(moved);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let moved = self.dash.move_selection(1);
                self.report(moved);
            }
            KeyCode::Char('y') | KeyCode::Enter => self.copy(),
            KeyCode::Esc | KeyCode::Char('v') => self.dash.clear_selection(),
            // Leaving the tab drops the selection.
            _ => {
                self.dash.clear_selection();
                self.handle_normal(key);
            }
        }
    }

    fn handle_prompt(&mut self, key: KeyEvent, kind: PromptKind, mut buffer: String) {
        match key.code {
            KeyCode::Esc => self.mode = Mode::Normal,
            KeyCode::Enter => {
                self.mode = Mode::Normal;
                match kind {
                    PromptKind::Command => {
                        self.pipeline.run_command(&mut self.dash, &buffer);
                    }
                    PromptKind::Search => {
                        let found = self.dash.search(&buffer);
                        if let Some(line) = self.report(found) {
                            self.info(format!("Match at line {}", line + 1));
                        }
                    }
                }
            }
            KeyCode::Backspace => {
                buffer.pop();
                self.mode = Mode::Prompt { kind, buffer };
            }
            KeyCode::Char(c) => {
                buffer.push(c);
                self.mode = Mode::Prompt { kind, buffer };
            }
            _ => {}
        }
    }

    fn handle_input(&mut self, key: KeyEvent, mut buffer: String) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('d') {
            let ended = self.dash.end_input();
            self.leave_input();
            if self.report(ended).is_some() {
                self.info("Input closed");
            }
            return;
        }
        match key.code {
            KeyCode::Esc => self.leave_input(),
            KeyCode::Enter => {
                let sent = self.dash.send_input(&buffer);
                match self.report(sent) {
                    Some(()) => self.mode = Mode::Input { buffer: String::new() },
                    None => self.leave_input(),
                }
            }
            KeyCode::Backspace => {
                buffer.pop();
                self.mode = Mode::Input { buffer };
            }
            KeyCode::Char(c) => {
                buffer.push(c);
                self.mode = Mode::Input { buffer };
            }
            _ => {}
        }
    }

    fn leave_input(&mut self) {
        self.dismissed_prompt = self
            .dash
            .active_tab()
            .map(|tab| (tab.id.clone(), tab.text.len()));
        self.dash.leave_input_mode();
        self.mode = Mode::Normal;
    }

    fn scroll(&mut self, delta: isize) {
        let scrolled = self.dash.scroll_view(delta, self.viewport);
        self.report(scrolled);
    }

    fn toggle_follow(&mut self) {
        let following = self.dash.active_tab().map(|tab| tab.autoscroll);
        let result = match following {
            Some(true) => self.dash.freeze_current_tab(),
            _ => self.dash.follow_tail(),
        };
        self.report(result);
    }

    fn copy(&mut self) {
        let copied = self.dash.copy_selection(self.clipboard.as_mut());
        if let Some(via) = self.report(copied) {
            self.info(format!("Copied via {via}"));
        }
    }

    fn containers(&mut self, action: ContainerAction) {
        let compose = self.config.compose.clone();
        run_container_action(&self.pipeline, &mut self.dash, &compose, action);
    }

    fn run_task(&mut self, index: usize) {
        let Some(task) = self.config.tasks.get(index).cloned() else {
            self.status_is_error = true;
            self.dash.set_status(format!("No task {}", index + 1));
            return;
        };
        debug!(label = %task.label, "running project task");
        let spec = CommandSpec::from_shell_command(&task.command)
            .with_title(&task.label)
            .with_cwd(self.dash.root().to_path_buf());
        self.pipeline.launch(&mut self.dash, spec, None);
    }

    /// Sync the mode with the dashboard after background events: drop out
    /// of input mode once the writer is gone, and enter it when the active
    /// tab shows a prompt and has a writer.
    pub fn after_events(&mut self) {
        if matches!(self.mode, Mode::Input { .. }) && !self.dash.in_input_mode() {
            self.mode = Mode::Normal;
            self.info("Process is no longer accepting input");
            return;
        }
        if self.mode != Mode::Normal || self.dash.selection().is_some() {
            return;
        }
        let Some(tab) = self.dash.active_tab() else {
            return;
        };
        if !self.dash.has_input(&tab.id) || !has_interactive_prompt(&tab.text) {
            return;
        }
        let marker = (tab.id.clone(), tab.text.len());
        if self.dismissed_prompt.as_ref() == Some(&marker) {
            return;
        }
        if self.dash.enter_input_mode().is_ok() {
            self.mode = Mode::Input { buffer: String::new() };
            self.info("Input mode: Enter sends, Ctrl+D closes stdin, Esc leaves");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use djdash_core::config::Limits;
    use djdash_core::interact::InputSink;
    use djdash_core::reducer::ui_channel;

    use super::*;
    use crate::runner::ShellLauncher;

    #[derive(Clone, Default)]
    struct FakeClipboard(Arc<Mutex<Vec<String>>>);

    impl ClipboardSink for FakeClipboard {
        fn copy(&mut self, text: &str) -> Result<String, String> {
            self.0.lock().unwrap().push(text.to_string());
            Ok("fake".into())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl InputSink for Recorder {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    fn app() -> (tempfile::TempDir, App, FakeClipboard) {
        let dir = tempfile::TempDir::new().unwrap();
        let dash = Dashboard::new(dir.path(), Limits::default());
        let (tx, _rx) = ui_channel(8);
        let pipeline = Pipeline::new(Arc::new(ShellLauncher::default()), tx, 8);
        let clip = FakeClipboard::default();
        let app = App::new(dash, DashConfig::default(), pipeline, Box::new(clip.clone()));
        (dir, app, clip)
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn type_str(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn test_search_prompt() {
        let (_dir, mut app, _) = app();
        let tab = app.dash.start_command_tab("out");
        app.dash.append(&tab, "alpha\nbeta one\ngamma\n");

        press(&mut app, KeyCode::Char('/'));
        type_str(&mut app, "betx");
        press(&mut app, KeyCode::Backspace);
        type_str(&mut app, "a");
        assert_eq!(
            app.mode,
            Mode::Prompt { kind: PromptKind::Search, buffer: "beta".into() }
        );
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.mode, Mode::Normal);
        assert_eq!(app.dash.status(), Some("Match at line 2"));
        assert!(!app.status_is_error());

        press(&mut app, KeyCode::Char('/'));
        type_str(&mut app, "zzz");
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.dash.status(), Some("No match"));
        assert!(app.status_is_error());
    }

    #[test]
    fn test_selection_copy() {
        let (_dir, mut app, clip) = app();
        let tab = app.dash.start_command_tab("out");
        app.dash.append(&tab, "one\ntwo\nthree\n");
        press(&mut app, KeyCode::Char('g'));
        press(&mut app, KeyCode::Char('v'));
        press(&mut app, KeyCode::Char('j'));
        press(&mut app, KeyCode::Char('y'));
        assert_eq!(*clip.0.lock().unwrap(), vec!["one\ntwo".to_string()]);
        assert_eq!(app.dash.status(), Some("Copied via fake"));
        assert!(app.dash.selection().is_none());
    }

    #[test]
    fn test_tab_keys() {
        let (_dir, mut app, _) = app();
        let a = app.dash.start_command_tab("a");
        let b = app.dash.start_logs_tab("b");
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.dash.tabs.active_id(), Some(a.as_str()));
        press(&mut app, KeyCode::Char('l'));
        assert_eq!(app.dash.tabs.active_id(), Some(b.as_str()));
        press(&mut app, KeyCode::Char('x'));
        assert_eq!(app.dash.tabs.len(), 1);
        press(&mut app, KeyCode::Char('x'));
        press(&mut app, KeyCode::Char('x'));
        assert_eq!(app.dash.status(), Some("No active output tab"));
    }

    #[test]
    fn test_input_mode_without_writer() {
        let (_dir, mut app, _) = app();
        app.dash.start_command_tab("check");
        press(&mut app, KeyCode::Char('i'));
        assert_eq!(app.mode, Mode::Normal);
        assert_eq!(app.dash.status(), Some("Process is not accepting input"));
    }

    #[test]
    fn test_prompt_auto_enters_input_mode_once() {
        let (_dir, mut app, _) = app();
        let tab = app.dash.start_command_tab("createsuperuser");
        let rec = Recorder::default();
        app.dash.register_input(&tab, "run-1", Box::new(rec.clone()));
        app.dash.append(&tab, "Username: ");

        app.after_events();
        assert_eq!(app.mode, Mode::Input { buffer: String::new() });
        type_str(&mut app, "ada");
        press(&mut app, KeyCode::Enter);
        assert_eq!(*rec.0.lock().unwrap(), b"ada\n");

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.mode, Mode::Normal);
        app.after_events();
        assert_eq!(app.mode, Mode::Normal);

        app.dash.append(&tab, "\nEmail address: ");
        app.after_events();
        assert!(matches!(app.mode, Mode::Input { .. }));
    }

    #[test]
    fn test_missing_task() {
        let (_dir, mut app, _) = app();
        press(&mut app, KeyCode::Char('3'));
        assert_eq!(app.dash.status(), Some("No task 3"));
    }
}
