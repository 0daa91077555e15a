//! Session snapshot (`.djdash/state.json`) and the bounded memory lists it
//! carries: command history, favorites, recent models and recent errors.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Limits, STATE_DIR};
use crate::error::StoreError;
use crate::history::{EventKind, EventStatus, HistoryEvent, write_atomic};
use crate::output::{Route, ScrollOrigin, TabStore};
use crate::sanitize::sanitize;

pub const SESSION_VERSION: u32 = 1;
pub const SESSION_FILE: &str = "state.json";
pub const TRUNCATION_MARKER: &str = "\n...[truncated from previous session]...\n";

/// Dashboard panel that had focus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Panel {
    #[default]
    Menu,
    List,
    Data,
    Main,
}

impl Panel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Panel::Menu => "menu",
            Panel::List => "list",
            Panel::Data => "data",
            Panel::Main => "main",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "menu" => Some(Panel::Menu),
            "list" => Some(Panel::List),
            "data" => Some(Panel::Data),
            "main" => Some(Panel::Main),
            _ => None,
        }
    }
}

/// Focus and the three independent panel cursors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PanelState {
    pub active: Panel,
    pub menu_selection: usize,
    pub list_selection: usize,
    pub data_selection: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentModel {
    pub app: String,
    pub model: String,
    #[serde(default = "first_page")]
    pub last_page: u32,
    #[serde(default)]
    pub last_record_idx: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_record_pk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

fn first_page() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentError {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub message: String,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

fn one() -> u32 {
    1
}

fn error_key(source: &str, message: &str) -> String {
    format!("{}|{}", source.trim(), message.trim()).to_lowercase()
}

fn model_key(app: &str, model: &str) -> String {
    format!("{}.{}", app.trim(), model.trim()).to_lowercase()
}

/// Bounded MRU lists kept across sessions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionMemory {
    pub command_history: Vec<String>,
    pub favorites: Vec<String>,
    pub recent_models: Vec<RecentModel>,
    pub recent_errors: Vec<RecentError>,
}

impl SessionMemory {
    /// Append to history (oldest dropped) and promote into favorites.
    /// Returns false for blank commands.
    pub fn remember_command(&mut self, command: &str, limits: &Limits) -> bool {
        let command = sanitize(command);
        if command.is_empty() {
            return false;
        }
        self.command_history.push(command.clone());
        if self.command_history.len() > limits.max_command_history {
            let excess = self.command_history.len() - limits.max_command_history;
            self.command_history.drain(..excess);
        }
        self.promote_favorite(command, limits);
        true
    }

    fn promote_favorite(&mut self, command: String, limits: &Limits) {
        self.favorites.retain(|existing| *existing != command);
        self.favorites.insert(0, command);
        self.favorites.truncate(limits.max_favorites);
    }

    /// Count an error occurrence, moving it to the front of the list.
    ///
    /// Returns the `error` history event to record, or `None` when the
    /// message is blank.
    pub fn remember_error(
        &mut self,
        source: &str,
        message: &str,
        now: DateTime<Utc>,
        limits: &Limits,
    ) -> Option<HistoryEvent> {
        let message = sanitize(message);
        if message.is_empty() {
            return None;
        }
        let source = match source.trim() {
            "" => "unknown".to_string(),
            s => s.to_string(),
        };
        let key = error_key(&source, &message);

        let entry = match self.recent_errors.iter().position(|e| e.key == key) {
            Some(idx) => {
                let mut entry = self.recent_errors.remove(idx);
                entry.count = entry.count.saturating_add(1);
                entry.last_seen = Some(now);
                entry
            }
            None => RecentError {
                key,
                source: source.clone(),
                message: message.clone(),
                count: 1,
                first_seen: Some(now),
                last_seen: Some(now),
            },
        };
        self.recent_errors.insert(0, entry);
        self.recent_errors.truncate(limits.max_recent_errors);

        let mut event = HistoryEvent::new(EventKind::Error, source, EventStatus::Error);
        event.time = Some(now);
        event.error = message;
        Some(event)
    }

    /// Record where the operator was in a model's data view.
    pub fn remember_model_access(
        &mut self,
        app: &str,
        model: &str,
        page: u32,
        record_idx: usize,
        record_pk: &str,
        now: DateTime<Utc>,
        limits: &Limits,
    ) -> bool {
        let (app, model) = (app.trim(), model.trim());
        if app.is_empty() || model.is_empty() {
            return false;
        }
        let key = model_key(app, model);
        self.recent_models.retain(|m| model_key(&m.app, &m.model) != key);
        self.recent_models.insert(
            0,
            RecentModel {
                app: app.to_string(),
                model: model.to_string(),
                last_page: page.max(1),
                last_record_idx: record_idx,
                last_record_pk: record_pk.trim().to_string(),
                last_accessed_at: Some(now),
            },
        );
        self.recent_models.truncate(limits.max_recent_models);
        true
    }

    pub fn recent_model(&self, app: &str, model: &str) -> Option<&RecentModel> {
        let key = model_key(app, model);
        self.recent_models.iter().find(|m| model_key(&m.app, &m.model) == key)
    }

    /// Apply caps and redaction to lists read back from disk.
    fn normalized(mut self, limits: &Limits) -> Self {
        for command in &mut self.command_history {
            *command = sanitize(command);
        }
        self.command_history.retain(|c| !c.is_empty());
        if self.command_history.len() > limits.max_command_history {
            let excess = self.command_history.len() - limits.max_command_history;
            self.command_history.drain(..excess);
        }

        let mut favorites: Vec<String> = Vec::with_capacity(self.favorites.len());
        for command in self.favorites.iter().map(|c| sanitize(c)) {
            if !command.is_empty() && !favorites.contains(&command) {
                favorites.push(command);
            }
        }
        favorites.truncate(limits.max_favorites);
        self.favorites = favorites;

        self.recent_models.truncate(limits.max_recent_models);
        for model in &mut self.recent_models {
            model.last_page = model.last_page.max(1);
        }

        self.recent_errors.truncate(limits.max_recent_errors);
        for entry in &mut self.recent_errors {
            entry.message = sanitize(&entry.message);
            entry.count = entry.count.max(1);
            if entry.key.is_empty() {
                entry.key = error_key(&entry.source, &entry.message);
            }
        }
        self
    }
}

/// One output tab as written to disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTab {
    pub route: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default)]
    pub autoscroll: bool,
    #[serde(default)]
    pub origin: ScrollOrigin,
}

impl PersistedTab {
    /// Unknown routes load as `command`.
    pub fn route(&self) -> Route {
        Route::parse(self.route.trim()).unwrap_or(Route::Command)
    }
}

/// Versioned snapshot of the dashboard session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSession {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    pub active_panel: String,
    pub menu_selection: usize,
    pub list_selection: usize,
    pub data_selection: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_output_tab: Option<usize>,
    pub output_tabs: Vec<PersistedTab>,
    pub command_history: Vec<String>,
    pub favorite_commands: Vec<String>,
    pub recent_models: Vec<RecentModel>,
    pub recent_errors: Vec<RecentError>,
}

/// Keep the last `max_bytes` bytes of `text`, prefixed with
/// [`TRUNCATION_MARKER`]. Text within budget is returned unchanged.
///
/// When the budget cannot fit the marker the bare tail is kept. The cut
/// never splits a UTF-8 character.
pub fn truncate_text_tail(text: &str, max_bytes: usize) -> String {
    if max_bytes == 0 || text.len() <= max_bytes {
        return text.to_string();
    }
    if max_bytes <= TRUNCATION_MARKER.len() {
        return tail_at_boundary(text, max_bytes).to_string();
    }
    let tail = tail_at_boundary(text, max_bytes - TRUNCATION_MARKER.len());
    format!("{TRUNCATION_MARKER}{tail}")
}

fn tail_at_boundary(text: &str, keep: usize) -> &str {
    let mut start = text.len().saturating_sub(keep);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

impl PersistedSession {
    /// Snapshot the live session. Only the newest `max_tabs` tabs are kept.
    pub fn capture(
        panels: &PanelState,
        memory: &SessionMemory,
        tabs: &TabStore,
        limits: &Limits,
        now: DateTime<Utc>,
    ) -> Self {
        let skip = tabs.len().saturating_sub(limits.max_tabs);
        let mut active_output_tab = None;
        let mut output_tabs = Vec::with_capacity(tabs.len() - skip);
        for tab in tabs.iter().skip(skip) {
            if tabs.active_id() == Some(tab.id.as_str()) {
                active_output_tab = Some(output_tabs.len());
            }
            output_tabs.push(PersistedTab {
                route: tab.route.as_str().to_string(),
                title: tab.title.clone(),
                text: truncate_text_tail(&tab.text, limits.max_tab_bytes),
                autoscroll: tab.autoscroll,
                origin: if tab.autoscroll { ScrollOrigin::FollowTail } else { tab.origin },
            });
        }
        if active_output_tab.is_none() && !output_tabs.is_empty() {
            active_output_tab = Some(output_tabs.len() - 1);
        }

        let mut history = memory.command_history.as_slice();
        if history.len() > limits.max_command_history {
            history = &history[history.len() - limits.max_command_history..];
        }

        Self {
            version: SESSION_VERSION,
            saved_at: Some(now),
            active_panel: panels.active.as_str().to_string(),
            menu_selection: panels.menu_selection,
            list_selection: panels.list_selection,
            data_selection: panels.data_selection,
            active_output_tab,
            output_tabs,
            command_history: history.to_vec(),
            favorite_commands: memory.favorites.iter().take(limits.max_favorites).cloned().collect(),
            recent_models: memory.recent_models.iter().take(limits.max_recent_models).cloned().collect(),
            recent_errors: memory.recent_errors.iter().take(limits.max_recent_errors).cloned().collect(),
        }
    }

    /// Rehydrate panels, memory and tabs. Tabs get fresh ids.
    pub fn restore(self, tabs: &mut TabStore, limits: &Limits) -> (PanelState, SessionMemory) {
        let panels = PanelState {
            active: Panel::parse(&self.active_panel).unwrap_or_default(),
            menu_selection: self.menu_selection,
            list_selection: self.list_selection,
            data_selection: self.data_selection,
        };
        tabs.restore(&self.output_tabs, self.active_output_tab);

        let memory = SessionMemory {
            command_history: self.command_history,
            favorites: self.favorite_commands,
            recent_models: self.recent_models,
            recent_errors: self.recent_errors,
        }
        .normalized(limits);
        (panels, memory)
    }
}

/// The single session file of a project.
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<root>/.djdash/state.json`
    pub fn for_project(root: &Path) -> Self {
        Self::new(root.join(STATE_DIR).join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no session has been saved yet.
    pub fn load(&self) -> Result<Option<PersistedSession>, StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let session: PersistedSession =
            serde_json::from_slice(&data).map_err(|e| StoreError::json(&self.path, e))?;
        if session.version > SESSION_VERSION {
            return Err(StoreError::Version { path: self.path.clone(), found: session.version });
        }
        debug!(path = %self.path.display(), tabs = session.output_tabs.len(), "loaded session");
        Ok(Some(session))
    }

    pub fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(session).map_err(|e| StoreError::json(&self.path, e))?;
        write_atomic(&self.path, &data)?;
        debug!(path = %self.path.display(), bytes = data.len(), "saved session");
        Ok(())
    }
}
