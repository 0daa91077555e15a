//! Append-only activity log (`.djdash/history.ndjson`).

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Limits, STATE_DIR};
use crate::error::StoreError;
use crate::sanitize::sanitize;

pub const HISTORY_FILE: &str = "history.ndjson";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Command,
    Container,
    Snapshot,
    Model,
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Success,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Command => "command",
            EventKind::Container => "container",
            EventKind::Snapshot => "snapshot",
            EventKind::Model => "model",
            EventKind::Error => "error",
        }
    }
}

/// One immutable fact in the activity log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_tab: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_route: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub page: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub record_pk: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}
fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl HistoryEvent {
    pub fn new(kind: EventKind, source: impl Into<String>, status: EventStatus) -> Self {
        Self {
            time: None,
            kind,
            source: source.into(),
            status,
            command: String::new(),
            exit_code: 0,
            duration_ms: 0,
            output_tab: String::new(),
            output_route: String::new(),
            action: String::new(),
            services: Vec::new(),
            app: String::new(),
            model: String::new(),
            page: 0,
            record_pk: String::new(),
            snapshot_id: String::new(),
            snapshot: String::new(),
            error: String::new(),
        }
    }

    /// One-line human rendering used by `djdash history`.
    pub fn summary(&self) -> String {
        let time = self
            .time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        let status = match self.status {
            EventStatus::Success => "ok",
            EventStatus::Error => "ERR",
        };
        let subject = [&self.command, &self.action, &self.model, &self.error]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_default();
        let kind = self.kind.as_str();
        let mut line = format!("{time}  {kind:<9} {status:<3}  {subject}");
        if self.duration_ms > 0 {
            line.push_str(&format!("  ({} ms)", self.duration_ms));
        }
        if self.status == EventStatus::Error && !self.error.is_empty() && self.error != subject {
            line.push_str(&format!("  {}", self.error));
        }
        line
    }
}

/// The NDJSON activity log of one project.
#[derive(Clone, Debug)]
pub struct HistoryLog {
    path: PathBuf,
    max_events: usize,
    retention: Duration,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>, limits: &Limits) -> Self {
        Self {
            path: path.into(),
            max_events: limits.max_history_events.max(1),
            retention: Duration::days(i64::from(limits.retention_days)),
        }
    }

    /// `<root>/.djdash/history.ndjson`
    pub fn for_project(root: &Path, limits: &Limits) -> Self {
        Self::new(root.join(STATE_DIR).join(HISTORY_FILE), limits)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp, redact, append one line, then compact.
    pub fn record(&self, event: HistoryEvent) -> Result<(), StoreError> {
        self.record_at(event, Utc::now())
    }

    pub fn record_at(&self, mut event: HistoryEvent, now: DateTime<Utc>) -> Result<(), StoreError> {
        if event.time.is_none() {
            event.time = Some(now);
        }
        if !event.command.is_empty() {
            event.command = sanitize(&event.command);
        }
        if !event.error.is_empty() {
            event.error = sanitize(&event.error);
        }

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let line = serde_json::to_string(&event).map_err(|e| StoreError::json(&self.path, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| StoreError::io(&self.path, e))?;
        drop(file);

        self.compact_at(now)
    }

    /// Drop events older than the retention window and keep the newest
    /// `max_events`. Malformed lines are dropped too.
    pub fn compact_at(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let Some(lines) = self.read_lines()? else {
            return Ok(());
        };
        let cutoff = now - self.retention;

        let mut kept: Vec<String> = lines
            .into_iter()
            .filter(|line| match serde_json::from_str::<HistoryEvent>(line) {
                Ok(event) => event.time.is_none_or(|t| t >= cutoff),
                Err(_) => false,
            })
            .collect();
        if kept.len() > self.max_events {
            kept.drain(..kept.len() - self.max_events);
        }

        let mut out = String::with_capacity(kept.iter().map(|l| l.len() + 1).sum());
        for line in &kept {
            out.push_str(line);
            out.push('\n');
        }
        write_atomic(&self.path, out.as_bytes())?;
        debug!(path = %self.path.display(), kept = kept.len(), "compacted history log");
        Ok(())
    }

    /// The last `n` events in chronological order.
    pub fn tail(&self, n: usize) -> Result<Vec<HistoryEvent>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let Some(lines) = self.read_lines()? else {
            return Ok(Vec::new());
        };
        let mut events: Vec<HistoryEvent> = lines
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if events.len() > n {
            events.drain(..events.len() - n);
        }
        Ok(events)
    }

    fn read_lines(&self) -> Result<Option<Vec<String>>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        Ok(Some(lines))
    }
}

/// Write to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".into());
    let tmp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));
    fs::write(&tmp, data).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}
