//! Command execution model
//!
//! Types describing what to run, how its output is captured and how it
//! ended. Spawning lives in the binary; these stay plain data.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::heuristics::{is_likely_interactive_command, route_for_command, tab_title_from_command};
use crate::output::{Route, TabId};

/// Unique identifier for a process run (UUID string)
pub type RunId = String;

/// How output is captured
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// Run to completion, append combined output once
    Buffered,
    /// Stream stdout/stderr into the tab as it arrives
    Streaming,
}

/// Specification for one process run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// Arguments to execute (first element is program)
    pub argv: Vec<String>,
    /// Command line as typed, used for headers and history
    pub display: String,
    /// Title of the output tab
    pub title: String,
    pub route: Route,
    pub mode: ExecMode,
    pub cwd: Option<PathBuf>,
    /// Pipe stdin and register it as the tab's live-input writer
    pub interactive: bool,
    /// Track as the single long-running dev server
    pub track_as_server: bool,
    /// Write output into this tab instead of starting a new one
    pub target_tab: Option<TabId>,
}

impl CommandSpec {
    /// Run `command` through `sh -c`, choosing route, mode and stdin from
    /// the command text.
    pub fn from_shell_command(command: &str) -> Self {
        let command = command.trim();
        let route = route_for_command(command);
        let interactive = is_likely_interactive_command(command);
        let mode = if route == Route::Logs || interactive {
            ExecMode::Streaming
        } else {
            ExecMode::Buffered
        };
        Self {
            argv: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
            display: command.to_string(),
            title: tab_title_from_command(command),
            route,
            mode,
            cwd: None,
            interactive,
            track_as_server: false,
            target_tab: None,
        }
    }

    /// Run an explicit argv without a shell.
    pub fn from_argv(argv: Vec<String>) -> Self {
        let display = argv.join(" ");
        Self {
            title: tab_title_from_command(&display),
            display,
            argv,
            route: Route::Command,
            mode: ExecMode::Buffered,
            cwd: None,
            interactive: false,
            track_as_server: false,
            target_tab: None,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.trim().to_string();
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Streaming on the logs route, tracked as the server.
    pub fn as_server(mut self) -> Self {
        self.track_as_server = true;
        self.route = Route::Logs;
        self.mode = ExecMode::Streaming;
        self
    }

    pub fn into_tab(mut self, tab: TabId) -> Self {
        self.target_tab = Some(tab);
        self
    }
}

/// How a finished process ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited { code: i32 },
    /// Killed by a signal, no exit code
    Signaled { signal: Option<i32> },
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited { code: 0 })
    }

    /// Exit code for the history log: the real code, or -1 without one.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited { code } => *code,
            ExitOutcome::Signaled { .. } => -1,
        }
    }

    /// Reason shown after `Process exited with error:`.
    pub fn describe(&self) -> String {
        match self {
            ExitOutcome::Exited { code } => format!("exit status {code}"),
            ExitOutcome::Signaled { signal: Some(sig) } => format!("signal: {sig}"),
            ExitOutcome::Signaled { signal: None } => "terminated by signal".to_string(),
        }
    }

    #[cfg(unix)]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match status.code() {
            Some(code) => ExitOutcome::Exited { code },
            None => ExitOutcome::Signaled { signal: status.signal() },
        }
    }

    #[cfg(not(unix))]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitOutcome::Exited { code },
            None => ExitOutcome::Signaled { signal: None },
        }
    }
}

/// A process currently owned by the dashboard
#[derive(Clone, Debug)]
pub struct RunningProcess {
    pub run_id: RunId,
    pub pid: Option<u32>,
    pub tab: TabId,
    pub display: String,
    pub is_server: bool,
    pub started_at: Instant,
}

impl RunningProcess {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_routing() {
        let spec = CommandSpec::from_shell_command("  python manage.py check ");
        assert_eq!(spec.argv, vec!["sh", "-c", "python manage.py check"]);
        assert_eq!(spec.route, Route::Command);
        assert_eq!(spec.mode, ExecMode::Buffered);
        assert!(!spec.interactive);

        let spec = CommandSpec::from_shell_command("python manage.py runserver");
        assert_eq!(spec.route, Route::Logs);
        assert_eq!(spec.mode, ExecMode::Streaming);

        let spec = CommandSpec::from_shell_command("python manage.py createsuperuser");
        assert_eq!(spec.route, Route::Command);
        assert_eq!(spec.mode, ExecMode::Streaming);
        assert!(spec.interactive);
    }

    #[test]
    fn test_server_spec() {
        let spec = CommandSpec::from_shell_command("make up").with_title("Dev Server").as_server();
        assert!(spec.track_as_server);
        assert_eq!(spec.route, Route::Logs);
        assert_eq!(spec.title, "Dev Server");
    }

    #[test]
    fn test_exit_outcome() {
        assert!(ExitOutcome::Exited { code: 0 }.success());
        assert_eq!(ExitOutcome::Exited { code: 3 }.exit_code(), 3);
        assert_eq!(ExitOutcome::Signaled { signal: Some(9) }.exit_code(), -1);
        assert_eq!(ExitOutcome::Exited { code: 2 }.describe(), "exit status 2");
    }
}
