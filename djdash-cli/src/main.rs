mod app;
mod clipboard;
mod containers;
mod runner;
mod tui;
mod ui;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use djdash_core::config::{DashConfig, state_dir};
use djdash_core::dashboard::Dashboard;
use djdash_core::history::HistoryLog;
use djdash_core::job::{CommandSpec, ExecMode};
use djdash_core::reducer::{UiEvent, exit_summary, reduce, ui_channel};

use app::App;
use clipboard::SystemClipboard;
use runner::{Pipeline, ShellLauncher};

const LOG_FILE: &str = "djdash.log";

#[derive(Parser)]
#[command(name = "djdash")]
#[command(about = "Terminal dashboard for running and watching project commands", long_about = None)]
struct Cli {
    /// Project root (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Config file (default: discovered under the project root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the dashboard (default)
    Tui,
    /// Stream one command to stdout and record it in history
    Run {
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },
    /// Show recent activity
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// List project tasks, or run task N
    Tasks { run: Option<usize> },
}

fn init_logging(root: &Path, to_stderr: bool) {
    let filter = EnvFilter::try_from_env("DJDASH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    if to_stderr {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
        return;
    }

    // The TUI owns stdout, so log to a file under the state dir.
    let dir = state_dir(root);
    let file = fs::create_dir_all(&dir)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(dir.join(LOG_FILE)));
    match file {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        Err(_) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

fn load_config(root: &Path, explicit: Option<&Path>) -> DashConfig {
    let loaded = match explicit {
        Some(path) => DashConfig::load(path).map(|c| (Some(path.to_path_buf()), c)),
        None => DashConfig::discover(root),
    };
    match loaded {
        Ok((Some(path), config)) => {
            info!(path = %path.display(), "loaded config");
            config
        }
        Ok((None, config)) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    let root = fs::canonicalize(&cli.project).unwrap_or(cli.project.clone());
    let is_tui = matches!(cli.command, None | Some(Commands::Tui));
    init_logging(&root, !is_tui);
    let config = load_config(&root, cli.config.as_deref());

    match cli.command {
        Some(Commands::Run { cmd }) => run_once(&root, &config, &cmd.join(" ")).await,
        Some(Commands::History { limit, json }) => print_history(&root, &config, limit, json),
        Some(Commands::Tasks { run: Some(n) }) => match config.tasks.get(n.wrapping_sub(1)) {
            Some(task) => {
                let command = task.command.clone();
                run_once(&root, &config, &command).await
            }
            None => {
                eprintln!("Error: no task {} ({} configured)", n, config.tasks.len());
                std::process::exit(1);
            }
        },
        Some(Commands::Tasks { run: None }) => {
            print_tasks(&config);
            Ok(())
        }
        Some(Commands::Tui) | None => run_tui(root, config),
    }
}

fn run_tui(root: PathBuf, config: DashConfig) -> io::Result<()> {
    let mut dash = Dashboard::new(&root, config.limits.clone());
    if let Some(warning) = dash.load_session() {
        dash.set_status(warning);
    }
    let (tx, rx) = ui_channel(config.limits.queue_depth);
    let pipeline = Pipeline::new(Arc::new(ShellLauncher::new(root.clone())), tx, config.limits.queue_depth);
    let clipboard = SystemClipboard::new(&config.clipboard);
    info!(root = %root.display(), "dashboard started");
    let app = App::new(dash, config, pipeline, Box::new(clipboard));
    tui::run(app, rx)
}

/// Run one command through the streaming pipeline, echoing its output.
/// Exits with the command's exit code when it fails.
async fn run_once(root: &Path, config: &DashConfig, command: &str) -> io::Result<()> {
    let mut dash = Dashboard::new(root, config.limits.clone());
    let (tx, mut rx) = ui_channel(config.limits.queue_depth);
    let pipeline = Pipeline::new(Arc::new(ShellLauncher::new(root.to_path_buf())), tx, config.limits.queue_depth);
    let spec = CommandSpec::from_shell_command(command)
        .with_mode(ExecMode::Streaming)
        .interactive(false)
        .with_cwd(root.to_path_buf());

    if pipeline.launch(&mut dash, spec, None).is_none() {
        // Spawn failures are reported in the tab.
        if let Some(tab) = dash.active_tab() {
            eprint!("{}", tab.text);
        }
        std::process::exit(127);
    }

    let mut stdout = io::stdout();
    let mut code = 0;
    while let Some(event) = rx.recv().await {
        let finished = match &event {
            UiEvent::Output { text, .. } => {
                stdout.write_all(text.as_bytes())?;
                false
            }
            UiEvent::Finished(done) => {
                stdout.write_all(exit_summary(&done.exit).as_bytes())?;
                code = match &done.exit {
                    Ok(outcome) if outcome.success() => 0,
                    Ok(outcome) if outcome.exit_code() > 0 => outcome.exit_code(),
                    _ => 1,
                };
                if code != 0 {
                    if let Some(hint) = done.hint {
                        stdout.write_all(hint.as_bytes())?;
                    }
                }
                true
            }
            UiEvent::Callback(_) => false,
        };
        stdout.flush()?;
        reduce(&mut dash, event);
        if finished {
            break;
        }
    }

    if let Some(e) = dash.history_error() {
        warn!(error = %e, "command not recorded in history");
    }
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_history(root: &Path, config: &DashConfig, limit: usize, json: bool) -> io::Result<()> {
    let log = HistoryLog::for_project(root, &config.limits);
    let events = match log.tail(limit) {
        Ok(events) => events,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let mut stdout = io::stdout().lock();
    for event in &events {
        if json {
            let line = serde_json::to_string(event).map_err(io::Error::other)?;
            writeln!(stdout, "{line}")?;
        } else {
            writeln!(stdout, "{}", event.summary())?;
        }
    }
    if events.is_empty() && !json {
        writeln!(stdout, "No activity recorded in {}", log.path().display())?;
    }
    Ok(())
}

fn print_tasks(config: &DashConfig) {
    if config.tasks.is_empty() {
        println!("No project tasks configured.");
        return;
    }
    for (idx, task) in config.tasks.iter().enumerate() {
        if task.label == task.command {
            println!("{:>3}  {}", idx + 1, task.command);
        } else {
            println!("{:>3}  {:<24} {}", idx + 1, task.label, task.command);
        }
    }
}
