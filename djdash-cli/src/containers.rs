//! `docker compose` start/stop, run as sequential buffered commands in one
//! background task. A start that fails because containers with the same
//! names already exist starts those containers directly and retries once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use djdash_core::config::ComposeConfig;
use djdash_core::dashboard::{Dashboard, Failure};
use djdash_core::heuristics::parse_container_name_conflicts;
use djdash_core::job::CommandSpec;
use djdash_core::output::TabId;
use djdash_core::reducer::{UiEvent, UiSender};
use djdash_core::sanitize::sanitize;

use crate::runner::{Launcher, Pipeline, drive};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
}

impl ContainerAction {
    /// Name recorded in history.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
        }
    }

    fn compose_verb(&self) -> &'static [&'static str] {
        match self {
            ContainerAction::Start => &["up", "-d"],
            ContainerAction::Stop => &["stop"],
        }
    }
}

/// Arguments after `docker` for the compose command.
pub fn compose_args(action: ContainerAction, file: &str, services: &[String]) -> Vec<String> {
    let mut args = vec!["compose".to_string()];
    if !file.trim().is_empty() {
        args.push("-f".to_string());
        args.push(file.trim().to_string());
    }
    args.extend(action.compose_verb().iter().map(|s| s.to_string()));
    args.extend(services.iter().cloned());
    args
}

fn services_label(services: &[String]) -> String {
    if services.is_empty() {
        "all services".to_string()
    } else {
        services.join(", ")
    }
}

/// Step runner bound to one output tab.
struct Steps {
    launcher: Arc<dyn Launcher>,
    ui: UiSender,
    tab: TabId,
    cwd: PathBuf,
    depth: usize,
}

impl Steps {
    async fn emit(&self, text: impl Into<String>) {
        let _ = self.ui.send(UiEvent::Output { tab: self.tab.clone(), text: text.into() }).await;
    }

    /// Run `docker <args>`, echoing the command, its output and any error.
    /// Returns the output and the failure, if any.
    async fn docker(&self, args: &[String]) -> (String, Option<Failure>) {
        let mut argv = vec!["docker".to_string()];
        argv.extend(args.iter().cloned());
        self.emit(format!("$ {}\n", sanitize(&argv.join(" ")))).await;

        let spec = CommandSpec::from_argv(argv).with_cwd(self.cwd.clone());
        let (output, failure) = match self.launcher.spawn(&spec) {
            Ok(process) => {
                let (output, exit) = drive(process, self.depth, None).await;
                (output, Failure::from_run(&exit))
            }
            Err(e) => (String::new(), Some(Failure::new(-1, e.to_string()))),
        };

        if !output.is_empty() {
            self.emit(output.clone()).await;
        }
        if let Some(failure) = &failure {
            self.emit(format!("Error: {failure}\n")).await;
        }
        self.emit("\n").await;
        (output, failure)
    }

    async fn start_existing(&self, names: &[String]) -> bool {
        let mut all_started = true;
        for name in names {
            let name = name.trim_start_matches('/');
            let (_, failure) = self.docker(&["start".to_string(), name.to_string()]).await;
            match failure {
                None => self.emit(format!("Started existing container: {name}\n")).await,
                Some(f) => {
                    all_started = false;
                    self.emit(format!("Failed to start existing container {name}: {f}\n")).await;
                }
            }
        }
        all_started
    }
}

/// Open a tab for `action` and run it in the background. The final
/// history record is posted back as a UI callback.
pub fn run_container_action(
    pipeline: &Pipeline,
    dash: &mut Dashboard,
    compose: &ComposeConfig,
    action: ContainerAction,
) -> TabId {
    let services = compose.services.clone();
    let args = compose_args(action, &compose.file, &services);
    let tab = dash.start_command_tab(&format!("Containers: {}", action.as_str()));
    dash.append(
        &tab,
        &format!(
            "Running docker compose {} for: {}\n\n",
            action.compose_verb().join(" "),
            services_label(&services)
        ),
    );
    info!(action = action.as_str(), services = ?services, "container action started");

    let steps = Steps {
        launcher: pipeline.launcher(),
        ui: pipeline.ui(),
        tab: tab.clone(),
        cwd: dash.root().to_path_buf(),
        depth: pipeline.queue_depth(),
    };

    tokio::spawn(async move {
        let started = Instant::now();
        let (output, mut failure) = steps.docker(&args).await;

        if failure.is_some() && action == ContainerAction::Start {
            let conflicts = parse_container_name_conflicts(&output);
            if !conflicts.is_empty() {
                steps
                    .emit(format!(
                        "\nDetected existing containers with conflicting names: {}\n",
                        conflicts.join(", ")
                    ))
                    .await;
                steps.emit("Attempting to start the existing containers directly...\n").await;
                if steps.start_existing(&conflicts).await {
                    steps
                        .emit("\nRetrying docker compose up after starting existing containers...\n")
                        .await;
                    let (_, retry) = steps.docker(&args).await;
                    if let Some(f) = &retry {
                        steps.emit(format!("Retry failed: {f}\n")).await;
                    }
                    failure = retry;
                }
            }
        }

        match &failure {
            None => steps.emit("Completed successfully.\n").await,
            Some(_) => steps.emit("Completed with errors. Check output above.\n").await,
        }

        let elapsed = started.elapsed();
        debug!(action = action.as_str(), ok = failure.is_none(), "container action finished");
        let _ = steps
            .ui
            .send(UiEvent::Callback(Box::new(move |dash: &mut Dashboard| {
                dash.record_container_action(action.as_str(), &services, elapsed, failure.as_ref());
                dash.set_status(match &failure {
                    None => format!("Containers: {} completed", action.as_str()),
                    Some(_) => format!("Containers: {} failed", action.as_str()),
                });
            })))
            .await;
    });

    tab
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use djdash_core::config::Limits;
    use djdash_core::history::{EventKind, EventStatus};
    use djdash_core::job::ExitOutcome;
    use djdash_core::reducer::{UiReceiver, drain_pending, reduce, ui_channel};

    use super::*;
    use crate::runner::{ProcessWaiter, SpawnError, SpawnedProcess};

    struct FixedWaiter(ExitOutcome);

    #[async_trait]
    impl ProcessWaiter for FixedWaiter {
        async fn wait(&mut self) -> io::Result<ExitOutcome> {
            Ok(self.0)
        }
    }

    /// Replays canned results in call order and records every argv.
    #[derive(Default)]
    struct ScriptedLauncher {
        script: Mutex<VecDeque<(&'static str, i32)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLauncher {
        fn new(script: &[(&'static str, i32)]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl Launcher for ScriptedLauncher {
        fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess, SpawnError> {
            self.calls.lock().unwrap().push(spec.argv.join(" "));
            let (output, code) = self.script.lock().unwrap().pop_front().unwrap_or(("", 0));
            Ok(SpawnedProcess {
                pid: None,
                stdin: None,
                stdout: Box::new(output.as_bytes()),
                stderr: Box::new(tokio::io::empty()),
                waiter: Box::new(FixedWaiter(ExitOutcome::Exited { code })),
            })
        }
    }

    async fn run_until_callback(dash: &mut Dashboard, rx: &mut UiReceiver) {
        while let Some(event) = rx.recv().await {
            let last = matches!(event, UiEvent::Callback(_));
            reduce(dash, event);
            if last {
                break;
            }
        }
    }

    const CONFLICT: &str = "Error response from daemon: Conflict. The container name \"/django-app\" is already in use by container \"a\".\n\
Error response from daemon: Conflict. The container name \"/django-api\" is already in use by container \"b\".\n\
Error response from daemon: Conflict. The container name \"/django-app\" is already in use by container \"c\".\n";

    fn compose(services: &[&str]) -> ComposeConfig {
        ComposeConfig {
            file: "docker-compose.yml".into(),
            services: services.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_compose_args() {
        assert_eq!(
            compose_args(ContainerAction::Start, "docker-compose.yml", &["web".into()]),
            vec!["compose", "-f", "docker-compose.yml", "up", "-d", "web"]
        );
        assert_eq!(compose_args(ContainerAction::Stop, "", &[]), vec!["compose", "stop"]);
    }

    #[tokio::test]
    async fn test_conflicts_started_then_retried() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut dash = Dashboard::new(dir.path(), Limits::default());
        let (tx, mut rx) = ui_channel(32);
        let launcher = ScriptedLauncher::new(&[(CONFLICT, 1), ("", 0), ("", 0), ("done\n", 0)]);
        let pipeline = Pipeline::new(launcher.clone(), tx, 8);

        run_container_action(&pipeline, &mut dash, &compose(&["web"]), ContainerAction::Start);
        run_until_callback(&mut dash, &mut rx).await;

        assert_eq!(
            *launcher.calls.lock().unwrap(),
            vec![
                "docker compose -f docker-compose.yml up -d web",
                "docker start django-api",
                "docker start django-app",
                "docker compose -f docker-compose.yml up -d web",
            ]
        );
        let text = &dash.active_tab().unwrap().text;
        assert!(text.starts_with("Running docker compose up -d for: web\n\n"));
        assert!(text.contains("conflicting names: /django-api, /django-app\n"));
        assert!(text.contains("Started existing container: django-app\n"));
        assert!(text.contains("Retrying docker compose up"));
        assert!(text.ends_with("Completed successfully.\n"));

        let events = dash.history().tail(10).unwrap();
        let event = events.iter().find(|e| e.kind == EventKind::Container).unwrap();
        assert_eq!(event.status, EventStatus::Success);
        assert_eq!(event.action, "start");
        assert_eq!(event.services, vec!["web"]);
    }

    #[tokio::test]
    async fn test_docker_step_echo_is_redacted() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut dash = Dashboard::new(dir.path(), Limits::default());
        let (tx, mut rx) = ui_channel(32);
        let tab = dash.start_command_tab("docker login");
        let steps = Steps {
            launcher: ScriptedLauncher::new(&[("Login Succeeded\n", 0)]),
            ui: tx,
            tab,
            cwd: dir.path().to_path_buf(),
            depth: 8,
        };

        let (_, failure) = steps
            .docker(&["login".into(), "--password".into(), "hunter2".into()])
            .await;
        assert!(failure.is_none());
        drop(steps);
        drain_pending(&mut dash, &mut rx);

        let text = &dash.active_tab().unwrap().text;
        assert!(text.starts_with("$ docker login --password [REDACTED]\n"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("Login Succeeded\n"));
    }

    #[tokio::test]
    async fn test_stop_failure_completes_with_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut dash = Dashboard::new(dir.path(), Limits::default());
        let (tx, mut rx) = ui_channel(32);
        let launcher = ScriptedLauncher::new(&[("no such service\n", 1)]);
        let pipeline = Pipeline::new(launcher.clone(), tx, 8);

        run_container_action(&pipeline, &mut dash, &compose(&[]), ContainerAction::Stop);
        run_until_callback(&mut dash, &mut rx).await;

        assert_eq!(launcher.calls.lock().unwrap().len(), 1);
        let text = &dash.active_tab().unwrap().text;
        assert!(text.starts_with("Running docker compose stop for: all services\n\n"));
        assert!(text.contains("Error: exit status 1\n"));
        assert!(text.ends_with("Completed with errors. Check output above.\n"));
        assert_eq!(dash.status(), Some("Containers: stop failed"));
        assert_eq!(dash.memory.recent_errors.len(), 1);
    }
}
