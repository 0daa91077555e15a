use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory under the project root holding every file djdash writes.
pub const STATE_DIR: &str = ".djdash";

/// Maximum number of project tasks kept after normalisation.
pub const MAX_PROJECT_TASKS: usize = 200;

/// Tracked development server
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_server_command")]
    pub command: String,
    #[serde(default = "default_server_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_server_command(),
            title: default_server_title(),
        }
    }
}

fn default_server_command() -> String {
    "python manage.py runserver".into()
}
fn default_server_title() -> String {
    "Dev Server".into()
}

/// Container orchestration via `docker compose`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ComposeConfig {
    #[serde(default = "default_compose_file")]
    pub file: String,

    /// Services to start/stop (empty = all)
    #[serde(default)]
    pub services: Vec<String>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            file: default_compose_file(),
            services: Vec::new(),
        }
    }
}

fn default_compose_file() -> String {
    "docker-compose.yml".into()
}

/// Size and retention bounds for persisted state
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Limits {
    pub max_tabs: usize,
    pub max_tab_bytes: usize,
    pub max_command_history: usize,
    pub max_recent_models: usize,
    pub max_favorites: usize,
    pub max_recent_errors: usize,
    pub max_history_events: usize,
    pub retention_days: u32,
    /// Depth of the queue between stream readers and the drain task
    pub queue_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tabs: 16,
            max_tab_bytes: 64 * 1024,
            max_command_history: 200,
            max_recent_models: 30,
            max_favorites: 20,
            max_recent_errors: 40,
            max_history_events: 500,
            retention_days: 30,
            queue_depth: 256,
        }
    }
}

impl Limits {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_tabs", self.max_tabs),
            ("max_tab_bytes", self.max_tab_bytes),
            ("max_command_history", self.max_command_history),
            ("max_recent_models", self.max_recent_models),
            ("max_favorites", self.max_favorites),
            ("max_recent_errors", self.max_recent_errors),
            ("max_history_events", self.max_history_events),
            ("retention_days", self.retention_days as usize),
            ("queue_depth", self.queue_depth),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: format!("limits.{field}"),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

/// A named shell command runnable from the dashboard
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProjectTask {
    #[serde(default)]
    pub label: String,
    pub command: String,
}

/// Trim, drop empty commands, default the label to the command and keep
/// the first task for each command (case-insensitive).
pub fn normalize_tasks(tasks: Vec<ProjectTask>) -> Vec<ProjectTask> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(tasks.len().min(MAX_PROJECT_TASKS));
    for task in tasks {
        let command = task.command.trim().to_string();
        if command.is_empty() || !seen.insert(command.to_lowercase()) {
            continue;
        }
        let label = match task.label.trim() {
            "" => command.clone(),
            label => label.to_string(),
        };
        normalized.push(ProjectTask { label, command });
        if normalized.len() >= MAX_PROJECT_TASKS {
            break;
        }
    }
    normalized
}

/// Root configuration file structure
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DashConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub compose: ComposeConfig,

    /// Clipboard programs tried in order, each as an argv list.
    /// Empty = built-in chain for the current OS.
    #[serde(default)]
    pub clipboard: Vec<Vec<String>>,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub tasks: Vec<ProjectTask>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl DashConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: DashConfig = if content.trim().is_empty() {
            DashConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config.normalized())
    }

    /// Candidate config locations for a project root, in priority order.
    pub fn candidates(root: &Path) -> Vec<PathBuf> {
        vec![
            root.join(STATE_DIR).join("config.yml"),
            root.join("djdash.yml"),
            root.join("djdash.yaml"),
        ]
    }

    /// Find and load the project config.
    ///
    /// `DJDASH_CONFIG` wins when it points at an existing file. A project
    /// without any config file gets the defaults.
    pub fn discover(root: &Path) -> Result<(Option<PathBuf>, Self), ConfigError> {
        if let Ok(env_path) = std::env::var("DJDASH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok((Some(path), config));
            }
        }

        for path in Self::candidates(root) {
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok((Some(path), config));
            }
        }

        Ok((None, Self::default()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;

        if self.server.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server.command".into(),
                reason: "must not be empty".into(),
            });
        }

        if let Some(idx) = self.clipboard.iter().position(|argv| argv.is_empty()) {
            return Err(ConfigError::Invalid {
                field: format!("clipboard[{idx}]"),
                reason: "argv list must not be empty".into(),
            });
        }

        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.tasks = normalize_tasks(std::mem::take(&mut self.tasks));
        self.compose.services = self
            .compose
            .services
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }
}

/// `<root>/.djdash`
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  command: "python manage.py runserver 0.0.0.0:8000"
compose:
  file: compose.yaml
  services: [web, " db ", ""]
clipboard:
  - ["xclip", "-selection", "clipboard"]
limits:
  max_tabs: 4
tasks:
  - label: Check
    command: python manage.py check
"#;
        let config = DashConfig::from_str(yaml).unwrap();
        assert_eq!(config.server.command, "python manage.py runserver 0.0.0.0:8000");
        assert_eq!(config.server.title, "Dev Server");
        assert_eq!(config.compose.file, "compose.yaml");
        assert_eq!(config.compose.services, vec!["web", "db"]);
        assert_eq!(config.clipboard.len(), 1);
        assert_eq!(config.limits.max_tabs, 4);
        assert_eq!(config.limits.max_tab_bytes, 64 * 1024);
        assert_eq!(config.tasks.len(), 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DashConfig::from_str("").unwrap();
        assert_eq!(config, DashConfig::default());
        assert_eq!(config.limits.queue_depth, 256);
        assert_eq!(config.compose.file, "docker-compose.yml");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let result = DashConfig::from_str("limits:\n  queue_depth: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "limits.queue_depth"));
    }

    #[test]
    fn test_empty_clipboard_argv_rejected() {
        let result = DashConfig::from_str("clipboard:\n  - []\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_bad_yaml() {
        let result = DashConfig::from_str("server: [unterminated");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_normalize_tasks() {
        let tasks = vec![
            ProjectTask { label: "  ".into(), command: " make test ".into() },
            ProjectTask { label: "Dup".into(), command: "MAKE TEST".into() },
            ProjectTask { label: "Empty".into(), command: "   ".into() },
            ProjectTask { label: " Lint ".into(), command: "make lint".into() },
        ];
        let tasks = normalize_tasks(tasks);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].label, "make test");
        assert_eq!(tasks[0].command, "make test");
        assert_eq!(tasks[1].label, "Lint");
    }

    #[test]
    fn test_normalize_tasks_caps() {
        let tasks = (0..300)
            .map(|i| ProjectTask { label: String::new(), command: format!("echo {i}") })
            .collect();
        assert_eq!(normalize_tasks(tasks).len(), MAX_PROJECT_TASKS);
    }

    #[test]
    fn test_discover_project_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, config) = DashConfig::discover(dir.path()).unwrap();
        if std::env::var("DJDASH_CONFIG").is_err() {
            assert!(path.is_none());
            assert_eq!(config, DashConfig::default());
        }

        std::fs::write(dir.path().join("djdash.yml"), "server:\n  title: Web\n").unwrap();
        let (path, config) = DashConfig::discover(dir.path()).unwrap();
        if std::env::var("DJDASH_CONFIG").is_err() {
            assert_eq!(path, Some(dir.path().join("djdash.yml")));
            assert_eq!(config.server.title, "Web");
        }
    }
}
