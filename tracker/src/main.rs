//! TaskPulse - progress tracking bound to terminal sessions.
//!
//! # Commands
//!
//! - `taskpulse start <name>`: Start a manual task
//! - `taskpulse update <pct> <message>`: Record progress on the current task
//! - `taskpulse complete [message]`: Complete the current task
//! - `taskpulse stop`: Stop the current task
//! - `taskpulse status`: Show the current task and recent history
//! - `taskpulse sessions`: List the terminal sessions visible right now
//! - `taskpulse watch`: Track sessions continuously and accept control lines on stdin
//!
//! # Environment Variables
//!
//! See the [`config`](taskpulse::config) module for available configuration options.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use taskpulse::config::Config;
use taskpulse::lifecycle::{ErrorKind, TaskLifecycle};
use taskpulse::notifier::{LogNotifier, NotificationPolicy, Notifier};
use taskpulse::probe::{SessionProbe, TmuxProbe};
use taskpulse::reconciler::{ChangeReport, Reconciler};
use taskpulse::registry::SessionRegistry;
use taskpulse::store::{JsonFileStore, TaskStore};
use taskpulse::types::{Session, Task, TaskState};
use taskpulse::TrackerError;

/// History entries shown by `status` unless `--history` says otherwise.
const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Capacity of the change-report channel in `watch`.
const REPORT_BUFFER: usize = 16;

/// Width of the textual progress bar, in cells.
const PROGRESS_BAR_WIDTH: usize = 20;

/// TaskPulse - progress tracking bound to terminal sessions.
///
/// Keeps one current task and a history of finished ones. In `watch` mode,
/// every tmux pane gets its own task that is retired when the pane closes.
#[derive(Parser, Debug)]
#[command(name = "taskpulse")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TASKPULSE_DATA_DIR               Data directory (default: ~/.taskpulse)
    TASKPULSE_POLL_INTERVAL_SECS     Session poll period in watch mode (default: 5)
    TASKPULSE_REFRESH_INTERVAL_SECS  Status refresh period in watch mode (default: 30)
    TASKPULSE_PROBE_TIMEOUT_MS       Session probe timeout (default: 2000)
    TASKPULSE_NOTIFY_STEP            Progress step that triggers a notification (default: 25)
    TASKPULSE_LOG_FORMAT             Set to 'json' for JSON logs on stderr
    RUST_LOG                         Log filter (default: info)

EXAMPLES:
    taskpulse start \"Write spec\" -d \"first draft\"
    taskpulse update 40 draft done
    taskpulse complete shipped
    taskpulse watch
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new task and make it current.
    ///
    /// Fails if another task is already in progress.
    Start {
        /// Task name.
        name: String,

        /// Optional description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Record progress on the current task.
    #[command(allow_negative_numbers = true)]
    Update {
        /// Progress percentage (0-100).
        percentage: i64,

        /// Progress message.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Complete the current task.
    Complete {
        /// Optional completion message.
        message: Vec<String>,
    },

    /// Stop the current task without completing it.
    Stop,

    /// Show the current task and recent history.
    Status {
        /// Number of history entries to show.
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        history: usize,

        /// Print the raw state as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the terminal sessions visible right now.
    Sessions,

    /// Track terminal sessions continuously.
    ///
    /// Reads control lines from stdin: status, sessions, switch <id>,
    /// update <pct> <message>, complete [message], stop, help.
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let mut builder = match cli.command {
        Command::Watch => tokio::runtime::Builder::new_multi_thread(),
        _ => tokio::runtime::Builder::new_current_thread(),
    };
    let runtime = builder
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    if let Err(e) = runtime.block_on(run(cli.command)) {
        if let Some(hint) = hint(&e) {
            eprintln!("{hint}");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn run(command: Command) -> taskpulse::Result<()> {
    let config = Config::from_env()?;
    let store = JsonFileStore::new(config.store_path());
    debug!(path = %store.path().display(), "Using task store");

    let app = App {
        lifecycle: Arc::new(TaskLifecycle::new(store)),
        policy: NotificationPolicy::new(config.notify_step),
        notifier: LogNotifier,
    };

    match command {
        Command::Start { name, description } => app.start(&name, description).await,
        Command::Update {
            percentage,
            message,
        } => app.update(percentage, message.join(" ")).await,
        Command::Complete { message } => app.complete(join_optional(&message)).await,
        Command::Stop => app.stop().await,
        Command::Status { history, json } => {
            let state = app.lifecycle.status(Some(history)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_status(&state);
            }
            Ok(())
        }
        Command::Sessions => {
            let registry = session_registry(&config);
            let diff = registry.try_poll().await?;
            print_sessions(&diff.current, &[]);
            Ok(())
        }
        Command::Watch => run_watch(app, &config).await,
    }
}

/// Front end over the lifecycle shared by the one-shot commands and `watch`.
struct App<S, N> {
    lifecycle: Arc<TaskLifecycle<S>>,
    policy: NotificationPolicy,
    notifier: N,
}

impl<S: TaskStore + 'static, N: Notifier> App<S, N> {
    async fn start(&self, name: &str, description: Option<String>) -> taskpulse::Result<()> {
        match self.lifecycle.start(name, description).await {
            Ok(task) => {
                println!("Started: {}", describe(&task));
                self.notifier.notify(&self.policy.on_started(&task));
                Ok(())
            }
            Err(e) => {
                if let Some(blocking) = e.blocking_task() {
                    eprintln!("Already in progress: {}", describe(blocking));
                    eprintln!("Complete or stop it first.");
                }
                Err(e.into())
            }
        }
    }

    async fn update(&self, percentage: i64, message: String) -> taskpulse::Result<()> {
        let change = self.lifecycle.update(percentage, message).await?;
        println!(
            "Updated: {} {}",
            describe(&change.task),
            progress_bar(change.task.progress)
        );
        if let Some(notification) = self.policy.on_progress(&change) {
            self.notifier.notify(&notification);
        }
        Ok(())
    }

    async fn complete(&self, message: Option<String>) -> taskpulse::Result<()> {
        let task = self.lifecycle.complete(message).await?;
        println!("Completed: {}", describe(&task));
        self.notifier.notify(&self.policy.on_completed(&task));
        Ok(())
    }

    async fn stop(&self) -> taskpulse::Result<()> {
        let task = self.lifecycle.stop().await?;
        println!("Stopped: {}", describe(&task));
        Ok(())
    }

    async fn switch(&self, session_id: &str) -> taskpulse::Result<()> {
        let task = self.lifecycle.switch_current(session_id).await?;
        println!("Now tracking: {}", describe(&task));
        Ok(())
    }

    fn handle_report(&self, report: &ChangeReport) {
        for task in &report.new_tasks {
            println!("New session task: {}", describe(task));
            self.notifier.notify(&self.policy.on_started(task));
        }
        for task in &report.closed_tasks {
            println!("Session closed: {}", describe(task));
        }
    }
}

/// Runs the reconciler and the interactive control loop until shutdown.
async fn run_watch(app: App<JsonFileStore, LogNotifier>, config: &Config) -> taskpulse::Result<()> {
    info!("Starting TaskPulse watch");

    let registry = Arc::new(session_registry(config));
    let (report_tx, mut report_rx) = mpsc::channel::<ChangeReport>(REPORT_BUFFER);
    let reconciler = Arc::new(
        Reconciler::new(Arc::clone(&registry), Arc::clone(&app.lifecycle))
            .with_report_sender(report_tx),
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let poll_interval = config.poll_interval;
    let reconcile_handle = tokio::spawn({
        let reconciler = Arc::clone(&reconciler);
        async move {
            reconciler
                .run(poll_interval, async move {
                    let _ = stop_rx.await;
                })
                .await;
        }
    });

    let mut refresh = tokio::time::interval(config.refresh_interval);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        refresh_interval_secs = config.refresh_interval.as_secs(),
        "Watching sessions. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }

            Some(report) = report_rx.recv() => {
                app.handle_report(&report);
            }

            _ = refresh.tick() => {
                match app.lifecycle.status(Some(DEFAULT_HISTORY_LIMIT)).await {
                    Ok(state) => print_status(&state),
                    Err(e) => warn!(error = %e, "Failed to refresh status"),
                }
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_control_line(&app, &registry, &line).await,
                Ok(None) => {
                    debug!("stdin closed, control commands disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read control line");
                    stdin_open = false;
                }
            },
        }
    }

    let _ = stop_tx.send(());
    if let Err(e) = reconcile_handle.await {
        error!(error = %e, "Reconciler task failed");
    }

    info!("TaskPulse watch stopped");
    Ok(())
}

/// A control line read from stdin in `watch` mode.
#[derive(Debug, PartialEq, Eq)]
enum ControlCommand {
    Status,
    Sessions,
    Switch(String),
    Update(i64, String),
    Complete(Option<String>),
    Stop,
    Help,
}

/// Parses one control line.
///
/// Returns `Ok(None)` for blank lines.
fn parse_control_line(line: &str) -> std::result::Result<Option<ControlCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "status" => ControlCommand::Status,
        "sessions" => ControlCommand::Sessions,
        "stop" => ControlCommand::Stop,
        "help" | "?" => ControlCommand::Help,
        "switch" => match rest.as_slice() {
            [id] => ControlCommand::Switch((*id).to_string()),
            _ => return Err("usage: switch <session-id>".to_string()),
        },
        "update" => {
            let (pct, message) = rest
                .split_first()
                .ok_or_else(|| "usage: update <pct> <message>".to_string())?;
            let pct = pct
                .parse::<i64>()
                .map_err(|_| format!("not a percentage: {pct}"))?;
            if message.is_empty() {
                return Err("usage: update <pct> <message>".to_string());
            }
            ControlCommand::Update(pct, message.join(" "))
        }
        "complete" => ControlCommand::Complete(join_optional(&rest)),
        other => return Err(format!("unknown command: {other} (try 'help')")),
    };
    Ok(Some(command))
}

async fn handle_control_line<S: TaskStore + 'static, N: Notifier>(
    app: &App<S, N>,
    registry: &SessionRegistry,
    line: &str,
) {
    let command = match parse_control_line(line) {
        Ok(Some(command)) => command,
        Ok(None) => return,
        Err(message) => {
            eprintln!("{message}");
            return;
        }
    };
    debug!(?command, "Control command");

    let result: taskpulse::Result<()> = match command {
        ControlCommand::Status => app
            .lifecycle
            .status(Some(DEFAULT_HISTORY_LIMIT))
            .await
            .map(|state| print_status(&state))
            .map_err(Into::into),
        ControlCommand::Sessions => {
            let bindings = app.lifecycle.session_bindings().await;
            print_sessions(&registry.current().await, &bindings);
            Ok(())
        }
        ControlCommand::Switch(session_id) => match registry.get(&session_id).await {
            Some(_) => app.switch(&session_id).await,
            None => {
                eprintln!("unknown session: {session_id} (try 'sessions')");
                return;
            }
        },
        ControlCommand::Update(pct, message) => app.update(pct, message).await,
        ControlCommand::Complete(message) => app.complete(message).await,
        ControlCommand::Stop => app.stop().await,
        ControlCommand::Help => {
            println!("commands: status | sessions | switch <id> | update <pct> <message> | complete [message] | stop");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        if let Some(hint) = hint(&e) {
            eprintln!("  {hint}");
        }
    }
}

fn session_registry(config: &Config) -> SessionRegistry {
    let probe: Arc<dyn SessionProbe> = Arc::new(TmuxProbe::new());
    SessionRegistry::new(probe, config.probe_timeout)
}

fn join_optional(words: &[impl AsRef<str>]) -> Option<String> {
    let joined = words
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(" ");
    (!joined.trim().is_empty()).then_some(joined)
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn describe(task: &Task) -> String {
    format!("{} [{}] {}%", task.name, task.status, task.progress)
}

fn progress_bar(progress: u8) -> String {
    let filled = usize::from(progress.min(100)) * PROGRESS_BAR_WIDTH / 100;
    format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(PROGRESS_BAR_WIDTH - filled)
    )
}

fn print_status(state: &TaskState) {
    match &state.current_task {
        Some(task) => {
            println!("Current: {} {}", describe(task), progress_bar(task.progress));
            println!("  started {}", local_time(task.start_time));
            if let Some(description) = &task.description {
                println!("  {description}");
            }
            if let Some(last) = task.updates.last() {
                println!(
                    "  last update {}: {}",
                    local_time(last.timestamp),
                    last.message
                );
            }
        }
        None => println!("No task in progress."),
    }

    if state.history.is_empty() {
        return;
    }
    println!("History:");
    for task in &state.history {
        let ended = task
            .end_time
            .map_or_else(|| "-".to_string(), local_time);
        match &task.completion_message {
            Some(message) => println!("  {} (ended {ended}): {message}", describe(task)),
            None => println!("  {} (ended {ended})", describe(task)),
        }
    }
}

fn print_sessions(sessions: &[Session], bindings: &[(String, Task)]) {
    if sessions.is_empty() {
        println!("No sessions found.");
        return;
    }
    for session in sessions {
        let dir = session
            .working_dir
            .as_ref()
            .map_or_else(|| "-".to_string(), |dir| dir.display().to_string());
        let bound = bindings
            .iter()
            .find(|(id, _)| *id == session.session_id)
            .map(|(_, task)| format!(" -> {}", describe(task)))
            .unwrap_or_default();
        println!(
            "{}\t{}\t{}\t{}{bound}",
            session.session_id, session.project_name, dir, session.title
        );
    }
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr so command output on stdout stays clean.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TASKPULSE_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(io::stderr)
            .init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Short follow-up advice for common lifecycle failures.
fn hint(err: &TrackerError) -> Option<&'static str> {
    match err.lifecycle_kind()? {
        ErrorKind::NotFound => Some("start one with: taskpulse start <name>, or switch to a session"),
        ErrorKind::Range => Some("progress is a whole number from 0 to 100"),
        _ => None,
    }
}
