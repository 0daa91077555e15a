//! Application state driven by the UI-owning loop.
//!
//! Every mutation of tabs, selection, memory lists and the dirty flag goes
//! through `&mut Dashboard`, which only the UI context holds. Background
//! work reaches it through [`crate::reducer::UiEvent`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Limits;
use crate::error::{InteractError, StoreError};
use crate::history::{EventKind, EventStatus, HistoryEvent, HistoryLog};
use crate::interact::{
    ClipboardSink, InputSink, Selection, next_match_after, next_match_index, output_lines,
    sanitize_output_for_clipboard, selected_text,
};
use crate::job::{ExitOutcome, RunId, RunningProcess};
use crate::output::{OutputTab, Route, TabId, TabSelector, TabStore};
use crate::sanitize::{safe_error_message, sanitize};
use crate::session::{PanelState, PersistedSession, SessionMemory, StateStore};

/// Why a run or action failed, as recorded in history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub exit_code: i32,
    pub message: String,
}

impl Failure {
    pub fn new(exit_code: i32, message: impl Into<String>) -> Self {
        Self { exit_code, message: message.into() }
    }

    /// `None` for a clean exit.
    pub fn from_run(outcome: &Result<ExitOutcome, String>) -> Option<Self> {
        match outcome {
            Ok(exit) if exit.success() => None,
            Ok(exit) => Some(Failure::new(exit.exit_code(), exit.describe())),
            Err(message) => Some(Failure::new(-1, message.clone())),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

struct InputWriter {
    run_id: RunId,
    sink: Box<dyn InputSink>,
}

pub struct Dashboard {
    root: PathBuf,
    limits: Limits,
    pub tabs: TabStore,
    panels: PanelState,
    pub memory: SessionMemory,
    selection: Option<Selection>,
    search_query: String,
    inputs: BTreeMap<TabId, InputWriter>,
    input_target: Option<TabId>,
    processes: BTreeMap<RunId, RunningProcess>,
    server: Option<RunId>,
    state_store: StateStore,
    history: HistoryLog,
    history_error: Option<String>,
    status: Option<String>,
    dirty: bool,
}

impl Dashboard {
    pub fn new(root: &Path, limits: Limits) -> Self {
        Self {
            root: root.to_path_buf(),
            state_store: StateStore::for_project(root),
            history: HistoryLog::for_project(root, &limits),
            limits,
            tabs: TabStore::new(),
            panels: PanelState::default(),
            memory: SessionMemory::default(),
            selection: None,
            search_query: String::new(),
            inputs: BTreeMap::new(),
            input_target: None,
            processes: BTreeMap::new(),
            server: None,
            history_error: None,
            status: None,
            dirty: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Last history write failure, cleared by the next successful write.
    pub fn history_error(&self) -> Option<&str> {
        self.history_error.as_deref()
    }

    pub fn panels(&self) -> &PanelState {
        &self.panels
    }

    /// Change panel focus or cursors. The session is marked dirty when
    /// anything changed.
    pub fn update_panels(&mut self, update: impl FnOnce(&mut PanelState)) {
        let before = self.panels;
        update(&mut self.panels);
        if self.panels != before {
            self.dirty = true;
        }
    }

    // ------------------------------------------------------------------
    // Status line
    // ------------------------------------------------------------------

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    // ------------------------------------------------------------------
    // Tabs
    // ------------------------------------------------------------------

    pub fn active_tab(&self) -> Option<&OutputTab> {
        self.tabs.active()
    }

    fn active_tab_id(&self) -> Result<TabId, InteractError> {
        self.tabs.active_id().map(str::to_string).ok_or(InteractError::NoActiveTab)
    }

    fn on_active_changed(&mut self, before: Option<String>) {
        if self.tabs.active_id().map(str::to_string) != before {
            self.selection = None;
        }
    }

    pub fn start_command_tab(&mut self, title: &str) -> TabId {
        self.selection = None;
        self.tabs.start_command_tab(title)
    }

    pub fn start_logs_tab(&mut self, title: &str) -> TabId {
        self.selection = None;
        self.tabs.start_logs_tab(title)
    }

    pub fn start_tab(&mut self, route: Route, title: &str) -> TabId {
        match route {
            Route::Command => self.start_command_tab(title),
            Route::Logs => self.start_logs_tab(title),
        }
    }

    /// Append raw output. Text for a closed tab is dropped.
    pub fn append(&mut self, tab: &str, text: &str) {
        if !self.tabs.append(tab, text) {
            debug!(tab, bytes = text.len(), "dropping output for closed tab");
        }
    }

    pub fn reset(&mut self, tab: &str, title: &str) {
        if self.tabs.reset(tab, title) && self.tabs.active_id() == Some(tab) {
            self.selection = None;
        }
    }

    /// Clear the active tab's text, keeping its title.
    pub fn clear_current_tab(&mut self) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        self.tabs.clear_text(&id);
        self.selection = None;
        Ok(())
    }

    /// Switch by route name, tab id or `""` for the current tab.
    pub fn switch_tab(&mut self, route_or_id: &str) -> Option<TabId> {
        let before = self.tabs.active_id().map(str::to_string);
        let id = self.tabs.switch(TabSelector::parse(route_or_id));
        self.on_active_changed(before);
        id
    }

    pub fn next_tab(&mut self) -> Option<TabId> {
        let before = self.tabs.active_id().map(str::to_string);
        let id = self.tabs.next();
        self.on_active_changed(before);
        id
    }

    pub fn prev_tab(&mut self) -> Option<TabId> {
        let before = self.tabs.active_id().map(str::to_string);
        let id = self.tabs.prev();
        self.on_active_changed(before);
        id
    }

    pub fn toggle_route(&mut self) -> Option<TabId> {
        let before = self.tabs.active_id().map(str::to_string);
        let id = self.tabs.toggle_route();
        self.on_active_changed(before);
        id
    }

    /// Close the active tab. Its input writer (if any) is closed; the
    /// process keeps running.
    pub fn close_current_tab(&mut self) -> Result<TabId, InteractError> {
        let id = self.active_tab_id()?;
        self.close_input_for_tab(&id);
        self.tabs.close(&id);
        self.selection = None;
        Ok(id)
    }

    pub fn freeze_current_tab(&mut self) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        self.tabs.freeze_at_current_position(&id);
        Ok(())
    }

    pub fn follow_tail(&mut self) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        self.tabs.follow_tail(&id);
        Ok(())
    }

    pub fn scroll_by(&mut self, delta: isize) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        self.tabs.scroll_by(&id, delta);
        Ok(())
    }

    /// Move the rendered view of the active tab by `delta` lines, starting
    /// from what a viewport of `height` lines currently shows.
    pub fn scroll_view(&mut self, delta: isize, height: usize) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        let top = self.tabs.get_mut(&id).map(|tab| tab.resolve_origin(height)).unwrap_or(0);
        self.tabs.scroll_to(&id, top.saturating_add_signed(delta));
        Ok(())
    }

    /// Top line to render for the active tab.
    pub fn view_top(&mut self, height: usize) -> usize {
        let id = match self.tabs.active_id() {
            Some(id) => id.to_string(),
            None => return 0,
        };
        self.tabs.get_mut(&id).map(|tab| tab.resolve_origin(height)).unwrap_or(0)
    }

    pub fn scroll_to_top(&mut self) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        self.tabs.scroll_to(&id, 0);
        Ok(())
    }

    fn current_line(&self) -> usize {
        match self.selection {
            Some(sel) => sel.cursor,
            None => self.tabs.active().map(OutputTab::current_line).unwrap_or(0),
        }
    }

    // ------------------------------------------------------------------
    // Search and selection
    // ------------------------------------------------------------------

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    /// Jump to the nearest line matching `query`. Returns the line index.
    pub fn search(&mut self, query: &str) -> Result<usize, InteractError> {
        self.search_query = query.trim().to_string();
        let id = self.active_tab_id()?;
        let from = self.current_line();
        let found = self
            .tabs
            .get(&id)
            .and_then(|tab| next_match_index(&output_lines(&tab.text), &self.search_query, from));
        self.jump_to(&id, found)
    }

    /// Jump to the next match of the last query after the current line.
    pub fn search_next(&mut self) -> Result<usize, InteractError> {
        let id = self.active_tab_id()?;
        let from = self.current_line();
        let found = self
            .tabs
            .get(&id)
            .and_then(|tab| next_match_after(&output_lines(&tab.text), &self.search_query, from));
        self.jump_to(&id, found)
    }

    fn jump_to(&mut self, id: &str, found: Option<usize>) -> Result<usize, InteractError> {
        let line = found.ok_or(InteractError::NoMatch)?;
        self.tabs.scroll_to(id, line);
        if let Some(sel) = self.selection.as_mut() {
            sel.cursor = line;
        }
        Ok(line)
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// Enter selection mode at the current line, or leave it.
    /// Returns whether selection mode is now on.
    pub fn toggle_selection(&mut self) -> Result<bool, InteractError> {
        if self.selection.take().is_some() {
            return Ok(false);
        }
        self.active_tab_id()?;
        self.selection = Some(Selection::at(self.current_line()));
        Ok(true)
    }

    pub fn move_selection(&mut self, delta: isize) -> Result<(), InteractError> {
        let id = self.active_tab_id()?;
        let last = self
            .tabs
            .get(&id)
            .map(|tab| tab.line_count().saturating_sub(1))
            .unwrap_or(0);
        if let Some(sel) = self.selection.as_mut() {
            sel.move_cursor(delta, last);
            let cursor = sel.cursor;
            self.tabs.scroll_to(&id, cursor);
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Copy the selection (or the current line) to `sink`.
    ///
    /// Returns the mechanism label reported by the sink.
    pub fn copy_selection(&mut self, sink: &mut dyn ClipboardSink) -> Result<String, InteractError> {
        let id = self.active_tab_id()?;
        let raw = self
            .tabs
            .get(&id)
            .map(|tab| selected_text(&tab.text, self.selection, self.current_line()))
            .unwrap_or_default();
        let text = sanitize_output_for_clipboard(&raw);
        if text.trim().is_empty() {
            return Err(InteractError::NothingToCopy);
        }
        let via = sink.copy(&text).map_err(InteractError::Clipboard)?;
        self.selection = None;
        Ok(via)
    }

    // ------------------------------------------------------------------
    // Live input
    // ------------------------------------------------------------------

    /// Attach the stdin writer of `run_id` to `tab`, replacing (and
    /// closing) any previous writer on that tab.
    pub fn register_input(&mut self, tab: &str, run_id: &str, sink: Box<dyn InputSink>) {
        if self.tabs.get(tab).is_none() {
            return;
        }
        self.inputs.insert(tab.to_string(), InputWriter { run_id: run_id.to_string(), sink });
    }

    pub fn has_input(&self, tab: &str) -> bool {
        self.inputs.contains_key(tab)
    }

    /// Tab receiving input: the input-mode target if still open, else the
    /// active tab.
    pub fn input_target(&self) -> Option<&str> {
        self.input_target
            .as_deref()
            .filter(|id| self.tabs.get(id).is_some())
            .or_else(|| self.tabs.active_id())
    }

    pub fn in_input_mode(&self) -> bool {
        self.input_target.is_some()
    }

    /// Route typed text to the active tab's process.
    pub fn enter_input_mode(&mut self) -> Result<TabId, InteractError> {
        let id = self.active_tab_id()?;
        if !self.inputs.contains_key(&id) {
            return Err(InteractError::NoInputWriter);
        }
        self.input_target = Some(id.clone());
        Ok(id)
    }

    pub fn leave_input_mode(&mut self) {
        self.input_target = None;
    }

    /// Write `text` plus a newline to the target tab's process.
    pub fn send_input(&mut self, text: &str) -> Result<(), InteractError> {
        let id = self.input_target().map(str::to_string).ok_or(InteractError::NoActiveTab)?;
        let writer = self.inputs.get_mut(&id).ok_or(InteractError::NoInputWriter)?;
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        if let Err(e) = writer.sink.send(&line) {
            debug!(tab = %id, error = %e, "input writer failed");
            self.close_input_for_tab(&id);
            return Err(InteractError::InputClosed);
        }
        Ok(())
    }

    /// End the input session: close the target process' stdin.
    pub fn end_input(&mut self) -> Result<(), InteractError> {
        let id = self.input_target().map(str::to_string).ok_or(InteractError::NoActiveTab)?;
        if !self.close_input_for_tab(&id) {
            return Err(InteractError::NoInputWriter);
        }
        Ok(())
    }

    fn close_input_for_tab(&mut self, tab: &str) -> bool {
        if self.input_target.as_deref() == Some(tab) {
            self.input_target = None;
        }
        // Dropping the sink closes the stream.
        self.inputs.remove(tab).is_some()
    }

    fn close_input_for_run(&mut self, run_id: &str) {
        let tabs: Vec<TabId> = self
            .inputs
            .iter()
            .filter(|(_, w)| w.run_id == run_id)
            .map(|(tab, _)| tab.clone())
            .collect();
        for tab in tabs {
            self.close_input_for_tab(&tab);
        }
    }

    // ------------------------------------------------------------------
    // Processes
    // ------------------------------------------------------------------

    /// Reject a second tracked server while one is running.
    pub fn ensure_server_free(&self) -> Result<(), InteractError> {
        match self.tracked_server() {
            Some(_) => Err(InteractError::ServerAlreadyRunning),
            None => Ok(()),
        }
    }

    pub fn tracked_server(&self) -> Option<&RunningProcess> {
        self.server.as_ref().and_then(|id| self.processes.get(id))
    }

    pub fn server_running(&self) -> bool {
        self.tracked_server().is_some()
    }

    pub fn register_process(&mut self, process: RunningProcess) -> Result<(), InteractError> {
        if process.is_server {
            self.ensure_server_free()?;
            self.server = Some(process.run_id.clone());
        }
        debug!(run_id = %process.run_id, pid = ?process.pid, tab = %process.tab, "process registered");
        self.processes.insert(process.run_id.clone(), process);
        Ok(())
    }

    /// Forget a finished process, closing its input writer and clearing
    /// the tracked-server flag if it was the server.
    pub fn finish_process(&mut self, run_id: &str) -> Option<RunningProcess> {
        self.close_input_for_run(run_id);
        if self.server.as_deref() == Some(run_id) {
            self.server = None;
        }
        self.processes.remove(run_id)
    }

    pub fn processes(&self) -> impl Iterator<Item = &RunningProcess> {
        self.processes.values()
    }

    // ------------------------------------------------------------------
    // Memory and history
    // ------------------------------------------------------------------

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.tabs.is_dirty()
    }

    fn append_history(&mut self, event: HistoryEvent) {
        match self.history.record(event) {
            Ok(()) => self.history_error = None,
            Err(e) => {
                warn!(error = %e, "failed to append history event");
                self.history_error = Some(e.to_string());
            }
        }
    }

    pub fn remember_command(&mut self, command: &str) {
        if self.memory.remember_command(command, &self.limits) {
            self.dirty = true;
        }
    }

    pub fn remember_error(&mut self, source: &str, message: &str) {
        if let Some(event) = self.memory.remember_error(source, message, Utc::now(), &self.limits) {
            self.dirty = true;
            self.append_history(event);
        }
    }

    pub fn remember_model_access(&mut self, app: &str, model: &str, page: u32, record_idx: usize, record_pk: &str) {
        if self
            .memory
            .remember_model_access(app, model, page, record_idx, record_pk, Utc::now(), &self.limits)
        {
            self.dirty = true;
        }
    }

    pub fn record_command_execution(
        &mut self,
        command: &str,
        tab: &str,
        elapsed: Duration,
        failure: Option<&Failure>,
    ) {
        let command = sanitize(command);
        self.remember_command(&command);
        if let Some(failure) = failure {
            self.remember_error("command", &format!("{command}: {failure}"));
        }

        let status = if failure.is_some() { EventStatus::Error } else { EventStatus::Success };
        let mut event = HistoryEvent::new(EventKind::Command, "project", status);
        event.command = command;
        event.exit_code = failure.map(|f| f.exit_code).unwrap_or(0);
        event.duration_ms = elapsed.as_millis() as u64;
        event.output_tab = tab.to_string();
        event.output_route = self
            .tabs
            .get(tab)
            .map(|t| t.route.as_str().to_string())
            .unwrap_or_default();
        event.error = failure.map(|f| safe_error_message(f)).unwrap_or_default();
        self.append_history(event);
    }

    pub fn record_container_action(
        &mut self,
        action: &str,
        services: &[String],
        elapsed: Duration,
        failure: Option<&Failure>,
    ) {
        if let Some(failure) = failure {
            self.remember_error("containers", &failure.message);
        }
        let status = if failure.is_some() { EventStatus::Error } else { EventStatus::Success };
        let mut event = HistoryEvent::new(EventKind::Container, "docker", status);
        event.action = action.to_string();
        event.services = services.to_vec();
        event.duration_ms = elapsed.as_millis() as u64;
        event.exit_code = failure.map(|f| f.exit_code).unwrap_or(0);
        event.error = failure.map(|f| safe_error_message(f)).unwrap_or_default();
        self.append_history(event);
    }

    pub fn record_snapshot_activity(
        &mut self,
        action: &str,
        snapshot_id: &str,
        snapshot_name: &str,
        failure: Option<&Failure>,
    ) {
        if let Some(failure) = failure {
            self.remember_error("snapshot", &failure.message);
        }
        let status = if failure.is_some() { EventStatus::Error } else { EventStatus::Success };
        let mut event = HistoryEvent::new(EventKind::Snapshot, "data", status);
        event.action = action.to_string();
        event.snapshot_id = snapshot_id.trim().to_string();
        event.snapshot = snapshot_name.trim().to_string();
        event.exit_code = failure.map(|f| f.exit_code).unwrap_or(0);
        event.error = failure.map(|f| safe_error_message(f)).unwrap_or_default();
        self.append_history(event);
    }

    pub fn record_model_open(&mut self, app: &str, model: &str, page: u32, record_pk: &str) {
        let mut event = HistoryEvent::new(EventKind::Model, "database", EventStatus::Success);
        event.action = "open".to_string();
        event.app = app.trim().to_string();
        event.model = model.trim().to_string();
        event.page = page;
        event.record_pk = record_pk.trim().to_string();
        self.append_history(event);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Restore the saved session. Failures are logged and returned as a
    /// warning; the dashboard keeps its empty defaults.
    pub fn load_session(&mut self) -> Option<String> {
        match self.state_store.load() {
            Ok(Some(session)) => {
                let (panels, memory) = session.restore(&mut self.tabs, &self.limits);
                self.panels = panels;
                self.memory = memory;
                self.selection = None;
                self.dirty = false;
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not restore session");
                Some(format!("Session not restored: {e}"))
            }
        }
    }

    pub fn snapshot(&self) -> PersistedSession {
        PersistedSession::capture(&self.panels, &self.memory, &self.tabs, &self.limits, Utc::now())
    }

    /// Write the session if anything changed. Returns whether it wrote.
    pub fn save_session(&mut self) -> Result<bool, StoreError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.state_store.save(&self.snapshot())?;
        self.dirty = false;
        self.tabs.clear_dirty();
        Ok(true)
    }

    /// Best-effort cleanup before quitting: close every input writer and
    /// save the session. A failed save is logged, not returned.
    pub fn shutdown(&mut self) {
        let open = self.inputs.len();
        self.inputs.clear();
        self.input_target = None;
        if open > 0 {
            debug!(open, "closed input writers on shutdown");
        }
        if let Err(e) = self.save_session() {
            warn!(error = %e, "failed to save session on exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl InputSink for SharedBuf {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }

    struct BrokenPipe;

    impl InputSink for BrokenPipe {
        fn send(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[derive(Default)]
    struct FakeClipboard(Vec<String>);

    impl ClipboardSink for FakeClipboard {
        fn copy(&mut self, text: &str) -> Result<String, String> {
            self.0.push(text.to_string());
            Ok("fake".into())
        }
    }

    fn dashboard() -> (tempfile::TempDir, Dashboard) {
        let dir = tempfile::TempDir::new().unwrap();
        let dash = Dashboard::new(dir.path(), Limits::default());
        (dir, dash)
    }

    fn process(run_id: &str, tab: &str, is_server: bool) -> RunningProcess {
        RunningProcess {
            run_id: run_id.into(),
            pid: Some(42),
            tab: tab.into(),
            display: "cmd".into(),
            is_server,
            started_at: std::time::Instant::now(),
        }
    }

    #[test]
    fn test_send_input_writes_line() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_command_tab("createsuperuser");
        let buf = SharedBuf::default();
        dash.register_input(&tab, "run-1", Box::new(buf.clone()));
        dash.enter_input_mode().unwrap();

        dash.send_input("abc@example.com").unwrap();
        assert_eq!(buf.contents(), "abc@example.com\n");
    }

    #[test]
    fn test_send_input_without_writer() {
        let (_dir, mut dash) = dashboard();
        assert_eq!(dash.send_input("x"), Err(InteractError::NoActiveTab));
        dash.start_command_tab("check");
        assert_eq!(dash.send_input("x"), Err(InteractError::NoInputWriter));
        assert_eq!(dash.enter_input_mode(), Err(InteractError::NoInputWriter));
    }

    #[test]
    fn test_broken_writer_unregistered() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_command_tab("shell");
        dash.register_input(&tab, "run-1", Box::new(BrokenPipe));
        assert_eq!(dash.send_input("x"), Err(InteractError::InputClosed));
        assert!(!dash.has_input(&tab));
    }

    #[test]
    fn test_input_closed_once_on_tab_close_or_exit() {
        let (_dir, mut dash) = dashboard();
        let a = dash.start_command_tab("a");
        dash.register_input(&a, "run-a", Box::new(SharedBuf::default()));
        dash.enter_input_mode().unwrap();
        dash.close_current_tab().unwrap();
        assert!(!dash.has_input(&a));
        assert!(!dash.in_input_mode());

        let b = dash.start_command_tab("b");
        dash.register_process(process("run-b", &b, false)).unwrap();
        dash.register_input(&b, "run-b", Box::new(SharedBuf::default()));
        dash.finish_process("run-b");
        assert!(!dash.has_input(&b));
        assert_eq!(dash.end_input(), Err(InteractError::NoInputWriter));
    }

    #[test]
    fn test_second_server_rejected() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_logs_tab("Dev Server");
        dash.register_process(process("s1", &tab, true)).unwrap();
        assert!(dash.server_running());
        assert_eq!(
            dash.register_process(process("s2", &tab, true)),
            Err(InteractError::ServerAlreadyRunning)
        );
        dash.finish_process("s1");
        assert!(!dash.server_running());
        dash.register_process(process("s2", &tab, true)).unwrap();
    }

    #[test]
    fn test_search_and_copy() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_command_tab("out");
        dash.append(&tab, "alpha\nbeta one\ngamma\ndelta\nbeta two\n");
        dash.scroll_to_top().unwrap();
        dash.scroll_by(2).unwrap();

        assert_eq!(dash.search("beta"), Ok(1));
        assert_eq!(dash.search_next(), Ok(4));
        assert_eq!(dash.search("missing"), Err(InteractError::NoMatch));

        dash.scroll_to_top().unwrap();
        assert!(dash.toggle_selection().unwrap());
        dash.move_selection(1).unwrap();
        let mut clip = FakeClipboard::default();
        assert_eq!(dash.copy_selection(&mut clip).unwrap(), "fake");
        assert_eq!(clip.0, vec!["alpha\nbeta one".to_string()]);
        assert!(dash.selection().is_none());
    }

    #[test]
    fn test_copy_whitespace_is_nothing_copyable() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_command_tab("blank");
        dash.append(&tab, "   \n\x1b[0m\n");
        dash.scroll_to_top().unwrap();
        let mut clip = FakeClipboard::default();
        assert_eq!(dash.copy_selection(&mut clip), Err(InteractError::NothingToCopy));
        assert!(clip.0.is_empty());
    }

    #[test]
    fn test_selection_cleared_on_tab_switch() {
        let (_dir, mut dash) = dashboard();
        let a = dash.start_command_tab("a");
        dash.append(&a, "x\ny\n");
        dash.start_logs_tab("b");
        dash.switch_tab(&a);
        assert!(dash.toggle_selection().unwrap());
        dash.switch_tab("logs");
        assert!(dash.selection().is_none());
    }

    #[test]
    fn test_freeze_disables_autoscroll() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_command_tab("Command");
        dash.append(&tab, "line1\nline2\nline3\nline4");
        dash.follow_tail().unwrap();
        dash.freeze_current_tab().unwrap();
        let tab = dash.active_tab().unwrap();
        assert!(!tab.autoscroll);
        assert_eq!(tab.current_line(), 3);
    }

    #[test]
    fn test_record_command_execution_sanitizes_and_records_error() {
        let (_dir, mut dash) = dashboard();
        let tab = dash.start_command_tab("check");
        let failure = Failure::new(1, "exit status 1");
        dash.record_command_execution(
            "python manage.py check --token abc123",
            &tab,
            Duration::from_millis(25),
            Some(&failure),
        );

        assert_eq!(dash.memory.command_history, vec!["python manage.py check --token [REDACTED]"]);
        assert_eq!(dash.memory.recent_errors.len(), 1);
        let events = dash.history().tail(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Error);
        let command = &events[1];
        assert_eq!(command.kind, EventKind::Command);
        assert_eq!(command.status, EventStatus::Error);
        assert_eq!(command.exit_code, 1);
        assert_eq!(command.output_route, "command");
        assert!(!command.command.contains("abc123"));
        assert!(dash.is_dirty());
    }

    #[test]
    fn test_record_other_activity() {
        let (_dir, mut dash) = dashboard();
        dash.record_container_action("start", &["web".into()], Duration::ZERO, None);
        dash.record_snapshot_activity("create", " snap-1 ", "before", Some(&Failure::new(-1, "disk full")));
        dash.record_model_open("blog", "Post", 2, "17");
        let kinds: Vec<EventKind> = dash.history().tail(10).unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Container, EventKind::Error, EventKind::Snapshot, EventKind::Model]
        );
    }

    #[test]
    fn test_save_only_when_dirty_and_reload() {
        let (dir, mut dash) = dashboard();
        assert!(!dash.save_session().unwrap());

        let tab = dash.start_logs_tab("Dev Server");
        dash.append(&tab, "ready\n");
        dash.remember_command("make up");
        assert!(dash.save_session().unwrap());
        assert!(!dash.save_session().unwrap());

        dash.update_panels(|p| p.menu_selection = 3);
        assert!(dash.is_dirty());
        assert!(dash.save_session().unwrap());
        dash.update_panels(|p| p.menu_selection = 3);
        assert!(!dash.is_dirty(), "unchanged cursors do not dirty the session");

        let mut restored = Dashboard::new(dir.path(), Limits::default());
        assert_eq!(restored.load_session(), None);
        assert_eq!(restored.panels().menu_selection, 3);
        assert_eq!(restored.active_tab().unwrap().text, "ready\n");
        assert_eq!(restored.memory.favorites, vec!["make up"]);
        assert!(!restored.is_dirty());
    }

    #[test]
    fn test_corrupt_session_is_warning() {
        let (dir, mut dash) = dashboard();
        let state = dir.path().join(crate::config::STATE_DIR);
        std::fs::create_dir_all(&state).unwrap();
        std::fs::write(state.join(crate::session::SESSION_FILE), "garbage").unwrap();
        let warning = dash.load_session().unwrap();
        assert!(warning.starts_with("Session not restored"));
        assert!(dash.tabs.is_empty());
    }
}
