use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::dashboard::{Dashboard, Failure};
use crate::job::{ExitOutcome, RunId};
use crate::output::TabId;

/// Work scheduled onto the UI-owning context.
pub type UiCallback = Box<dyn FnOnce(&mut Dashboard) + Send>;

/// Messages from background tasks to the single UI consumer.
pub enum UiEvent {
    /// Raw process output, applied in arrival order.
    Output { tab: TabId, text: String },
    /// A process run is over; see [`RunCompletion`].
    Finished(Box<RunCompletion>),
    /// Arbitrary follow-up that needs `&mut Dashboard`.
    Callback(UiCallback),
}

impl std::fmt::Debug for UiEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UiEvent::Output { tab, text } => f
                .debug_struct("Output")
                .field("tab", tab)
                .field("bytes", &text.len())
                .finish(),
            UiEvent::Finished(done) => f.debug_tuple("Finished").field(&done.run_id).finish(),
            UiEvent::Callback(_) => f.write_str("Callback"),
        }
    }
}

pub type UiSender = mpsc::Sender<UiEvent>;
pub type UiReceiver = mpsc::Receiver<UiEvent>;

pub fn ui_channel(depth: usize) -> (UiSender, UiReceiver) {
    mpsc::channel(depth.max(1))
}

/// Everything completion handling needs, produced once per run after
/// both readers finished and the process was waited on.
pub struct RunCompletion {
    pub run_id: RunId,
    pub tab: TabId,
    /// Sanitized command line
    pub command: String,
    pub elapsed: Duration,
    /// Exit status, or the error from waiting on the process
    pub exit: Result<ExitOutcome, String>,
    /// Hint line to add after a failed exit
    pub hint: Option<&'static str>,
    /// Write the command record to history when the run ends
    pub record: bool,
    pub on_exit: Option<UiCallback>,
}

pub const EXITED_OK: &str = "\nProcess exited.\n";

/// Summary line appended to a tab when its process ends.
pub fn exit_summary(exit: &Result<ExitOutcome, String>) -> String {
    match exit {
        Ok(outcome) if outcome.success() => EXITED_OK.to_string(),
        Ok(outcome) => format!("\nProcess exited with error: {}\n", outcome.describe()),
        Err(e) => format!("\nProcess exited with error: {e}\n"),
    }
}

/// Apply one event to the dashboard.
pub fn reduce(dash: &mut Dashboard, event: UiEvent) {
    match event {
        UiEvent::Output { tab, text } => dash.append(&tab, &text),
        UiEvent::Finished(done) => finish_run(dash, *done),
        UiEvent::Callback(callback) => callback(dash),
    }
}

fn finish_run(dash: &mut Dashboard, done: RunCompletion) {
    let failure = Failure::from_run(&done.exit);

    dash.append(&done.tab, &exit_summary(&done.exit));
    if let (Some(_), Some(hint)) = (&failure, done.hint) {
        dash.append(&done.tab, hint);
    }

    let process = dash.finish_process(&done.run_id);
    debug!(
        run_id = %done.run_id,
        tab = %done.tab,
        server = process.as_ref().is_some_and(|p| p.is_server),
        elapsed_ms = done.elapsed.as_millis() as u64,
        "run finished"
    );

    if let Some(on_exit) = done.on_exit {
        on_exit(dash);
    }
    if done.record {
        dash.record_command_execution(&done.command, &done.tab, done.elapsed, failure.as_ref());
    }
}

/// Drain everything queued without blocking. Returns how many events
/// were applied.
pub fn drain_pending(dash: &mut Dashboard, rx: &mut UiReceiver) -> usize {
    let mut applied = 0;
    while let Ok(event) = rx.try_recv() {
        reduce(dash, event);
        applied += 1;
    }
    applied
}
