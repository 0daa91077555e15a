//! Process launching and output pipelines.
//!
//! Every run is supervised by one tokio task: two reader tasks push decoded
//! chunks into a bounded queue, a drain task forwards them to the UI loop
//! in arrival order, and once both readers are done and the process has
//! been waited on the supervisor posts exactly one
//! [`UiEvent::Finished`]. Nothing here touches the [`Dashboard`] except
//! [`Pipeline::launch`] and [`stop_server`], which run on the UI context.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use djdash_core::dashboard::{Dashboard, Failure};
use djdash_core::error::InteractError;
use djdash_core::heuristics::exit_hint;
use djdash_core::interact::InputSink;
use djdash_core::job::{CommandSpec, ExecMode, ExitOutcome, RunId, RunningProcess};
use djdash_core::output::{Route, TabId};
use djdash_core::reducer::{RunCompletion, UiCallback, UiEvent, UiSender};
use djdash_core::sanitize::{safe_error_message, sanitize};

/// Output kept per streamed run for exit hints. Buffered runs keep all
/// of it, since the capture is what ends up in the tab.
const CAPTURE_LIMIT: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command")]
    EmptyCommand,
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0} pipe unavailable")]
    MissingStream(&'static str),
}

#[async_trait]
pub trait ProcessWaiter: Send {
    async fn wait(&mut self) -> io::Result<ExitOutcome>;
}

/// A started process with its pipes detached.
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub stdin: Option<BoxedWriter>,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    pub waiter: Box<dyn ProcessWaiter>,
}

pub trait Launcher: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess, SpawnError>;
}

struct ChildWaiter(Child);

#[async_trait]
impl ProcessWaiter for ChildWaiter {
    async fn wait(&mut self) -> io::Result<ExitOutcome> {
        self.0.wait().await.map(ExitOutcome::from_status)
    }
}

/// Spawns real processes, each in its own session so the whole tree can
/// be signalled.
#[derive(Clone, Debug, Default)]
pub struct ShellLauncher {
    pub cwd: Option<PathBuf>,
}

impl ShellLauncher {
    pub fn new(cwd: PathBuf) -> Self {
        Self { cwd: Some(cwd) }
    }
}

impl Launcher for ShellLauncher {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess, SpawnError> {
        let (program, args) = spec.argv.split_first().ok_or(SpawnError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = spec.cwd.as_ref().or(self.cwd.as_ref()) {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        cmd.stdin(if spec.interactive { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(false);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let (stdout, stderr) = take_streams(&mut child)?;
        let stdin = child.stdin.take().map(|s| Box::new(s) as BoxedWriter);

        Ok(SpawnedProcess {
            pid,
            stdin,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            waiter: Box::new(ChildWaiter(child)),
        })
    }
}

/// Take both output pipes, killing the child when either is missing so the
/// detached process group is not left running unsupervised.
fn take_streams(child: &mut Child) -> Result<(ChildStdout, ChildStderr), SpawnError> {
    match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => Ok((out, err)),
        (out, _) => {
            let _ = child.start_kill();
            Err(SpawnError::MissingStream(if out.is_none() { "stdout" } else { "stderr" }))
        }
    }
}

// ----------------------------------------------------------------------
// Streams
// ----------------------------------------------------------------------

/// Decode `bytes` after any incomplete sequence left in `carry`, keeping a
/// new incomplete tail for the next read.
fn decode_chunk(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(carry) {
        Ok(_) => carry.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Invalid bytes mid-stream: decode lossily up to the end.
        Err(_) => carry.len(),
    };
    let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
    carry.drain(..valid);
    text
}

async fn read_stream(mut reader: BoxedReader, tx: mpsc::Sender<String>) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut carry = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decode_chunk(&mut carry, &buf[..n]);
                if !text.is_empty() && tx.send(text).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(format!("[stream error: {e}]\n")).await;
                break;
            }
        }
    }
    if !carry.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&carry).into_owned()).await;
    }
}

fn keep_tail(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}

/// Read both streams to the end, forwarding chunks to `forward` when
/// given, then wait on the process. Returns the captured output and how
/// the process ended. Forwarded runs only keep the last [`CAPTURE_LIMIT`]
/// bytes; without `forward` the whole output is kept.
pub async fn drive(
    process: SpawnedProcess,
    queue_depth: usize,
    forward: Option<(UiSender, TabId)>,
) -> (String, Result<ExitOutcome, String>) {
    let SpawnedProcess { stdout, stderr, mut waiter, .. } = process;
    let (tx, mut rx) = mpsc::channel::<String>(queue_depth.max(1));

    let readers: [JoinHandle<()>; 2] = [
        tokio::spawn(read_stream(stdout, tx.clone())),
        tokio::spawn(read_stream(stderr, tx)),
    ];

    let keep_all = forward.is_none();
    let drain = tokio::spawn(async move {
        let mut captured = String::new();
        while let Some(chunk) = rx.recv().await {
            captured.push_str(&chunk);
            if !keep_all {
                keep_tail(&mut captured, CAPTURE_LIMIT);
            }
            if let Some((ui, tab)) = &forward {
                // The UI loop going away only stops forwarding; keep draining.
                let _ = ui.send(UiEvent::Output { tab: tab.clone(), text: chunk }).await;
            }
        }
        captured
    });

    for reader in readers {
        if let Err(e) = reader.await {
            warn!(error = %e, "output reader task failed");
        }
    }
    let exit = waiter.wait().await.map_err(|e| e.to_string());
    let captured = drain.await.unwrap_or_default();
    (captured, exit)
}

/// Live-input writer for a process' stdin. Writes are queued to a task
/// that owns the pipe; dropping the forwarder closes stdin.
pub struct StdinForwarder {
    tx: mpsc::Sender<Vec<u8>>,
}

impl StdinForwarder {
    pub fn spawn(mut stdin: BoxedWriter, depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(depth.max(1));
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = stdin.write_all(&bytes).await {
                    debug!(error = %e, "stdin write failed");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            let _ = stdin.shutdown().await;
        });
        Self { tx }
    }
}

impl InputSink for StdinForwarder {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx.try_send(bytes.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                io::Error::new(io::ErrorKind::WouldBlock, "input queue full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")
            }
        })
    }
}

// ----------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------

#[derive(Clone)]
pub struct Pipeline {
    launcher: Arc<dyn Launcher>,
    ui: UiSender,
    queue_depth: usize,
}

impl Pipeline {
    pub fn new(launcher: Arc<dyn Launcher>, ui: UiSender, queue_depth: usize) -> Self {
        Self { launcher, ui, queue_depth }
    }

    pub fn launcher(&self) -> Arc<dyn Launcher> {
        self.launcher.clone()
    }

    pub fn ui(&self) -> UiSender {
        self.ui.clone()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Start `spec` and return its run id, or `None` when nothing was
    /// started. Every outcome is reported in an output tab.
    pub fn launch(
        &self,
        dash: &mut Dashboard,
        spec: CommandSpec,
        on_exit: Option<UiCallback>,
    ) -> Option<RunId> {
        if spec.track_as_server && dash.ensure_server_free().is_err() {
            let tab = dash.tracked_server().map(|p| p.tab.clone());
            let tab = match tab {
                Some(tab) if dash.tabs.get(&tab).is_some() => tab,
                _ => dash.start_logs_tab(&spec.title),
            };
            dash.switch_tab(&tab);
            dash.append(&tab, "Server is already running.\n");
            return None;
        }

        let shown = sanitize(&spec.display);
        let tab = match spec.target_tab.clone() {
            Some(tab) if dash.tabs.get(&tab).is_some() => tab,
            _ => dash.start_tab(spec.route, &sanitize(&spec.title)),
        };
        dash.append(&tab, &format!("$ {shown}\n\n"));

        let mut process = match self.launcher.spawn(&spec) {
            Ok(process) => process,
            Err(e) => {
                warn!(command = %shown, error = %e, "failed to start command");
                dash.append(&tab, &format!("Failed to start command: {}\n", safe_error_message(&e)));
                let failure = Failure::new(-1, e.to_string());
                dash.record_command_execution(&shown, &tab, Duration::ZERO, Some(&failure));
                return None;
            }
        };

        let run_id: RunId = Uuid::new_v4().to_string();
        let started_at = Instant::now();
        let running = RunningProcess {
            run_id: run_id.clone(),
            pid: process.pid,
            tab: tab.clone(),
            display: shown.clone(),
            is_server: spec.track_as_server,
            started_at,
        };
        if let Err(e) = dash.register_process(running) {
            // Only reachable for a second server, which is checked above.
            warn!(error = %e, "process not tracked");
        }

        if let Some(stdin) = process.stdin.take() {
            if spec.interactive {
                let forwarder = StdinForwarder::spawn(stdin, self.queue_depth);
                dash.register_input(&tab, &run_id, Box::new(forwarder));
            }
        }

        debug!(run_id = %run_id, pid = ?process.pid, tab = %tab, mode = ?spec.mode, "command started");

        let ui = self.ui.clone();
        let depth = self.queue_depth;
        let mode = spec.mode;
        let id = run_id.clone();
        tokio::spawn(async move {
            let forward = (mode == ExecMode::Streaming).then(|| (ui.clone(), tab.clone()));
            let (captured, exit) = drive(process, depth, forward).await;
            if mode == ExecMode::Buffered && !captured.is_empty() {
                let _ = ui.send(UiEvent::Output { tab: tab.clone(), text: captured.clone() }).await;
            }
            let failed = !matches!(&exit, Ok(outcome) if outcome.success());
            let done = RunCompletion {
                run_id: id,
                tab,
                command: shown,
                elapsed: started_at.elapsed(),
                hint: if failed { exit_hint(&captured) } else { None },
                exit,
                record: true,
                on_exit,
            };
            if ui.send(UiEvent::Finished(Box::new(done))).await.is_err() {
                debug!("ui loop gone before run completion");
            }
        });

        Some(run_id)
    }

    /// Run a shell command line typed by the operator.
    pub fn run_command(&self, dash: &mut Dashboard, command: &str) -> Option<RunId> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        self.launch(dash, CommandSpec::from_shell_command(command).with_cwd(dash.root().to_path_buf()), None)
    }

    /// Start the configured dev server on the logs route.
    pub fn start_server(&self, dash: &mut Dashboard, command: &str, title: &str) -> Option<RunId> {
        let spec = CommandSpec::from_shell_command(command)
            .with_title(title)
            .with_cwd(dash.root().to_path_buf())
            .as_server();
        self.launch(dash, spec, None)
    }
}

/// Send SIGTERM to the tracked server's process group and report the
/// result in its tab (or the logs tab).
pub fn stop_server(dash: &mut Dashboard) -> Result<(), InteractError> {
    let Some(server) = dash.tracked_server().cloned() else {
        let tab = dash
            .tabs
            .route_tab(Route::Logs)
            .map(str::to_string)
            .unwrap_or_else(|| dash.start_logs_tab(Route::Logs.default_title()));
        dash.append(&tab, "\nNo running server process.\n");
        return Err(InteractError::NoServer);
    };

    let tab = if dash.tabs.get(&server.tab).is_some() {
        server.tab.clone()
    } else {
        dash.start_logs_tab(Route::Logs.default_title())
    };
    match signal_group(server.pid) {
        Ok(()) => {
            debug!(run_id = %server.run_id, pid = ?server.pid, "server stop signal sent");
            dash.append(&tab, "\nServer stop signal sent.\n");
            Ok(())
        }
        Err(e) => {
            let reason = e.to_string();
            warn!(run_id = %server.run_id, error = %reason, "failed to stop server");
            dash.append(&tab, &format!("\nFailed to stop server: {reason}\n"));
            Err(InteractError::StopFailed(reason))
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>) -> io::Result<()> {
    let pid = pid
        .and_then(|p| i32::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::other("process id unknown"))?;
    // The child called setsid, so its pid is also its process group id.
    let rc = unsafe { libc::killpg(pid, libc::SIGTERM) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals are not supported on this platform"))
}
