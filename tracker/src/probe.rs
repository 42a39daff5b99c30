//! Session probes: enumeration of externally observed terminal sessions.
//!
//! A [`SessionProbe`] is a one-method capability: list whatever sessions are
//! visible right now. Probes make no promise about ordering or completeness
//! between calls, and may fail transiently. The registry bounds every call
//! with a timeout and drops the future when it expires, so a probe must
//! release whatever it holds on drop.
//!
//! # Built-in probes
//!
//! - [`TmuxProbe`]: one session per tmux pane, keyed by the pane id (`%12`),
//!   which tmux keeps stable for the lifetime of the pane. The child process
//!   is killed if the call is abandoned.
//! - [`ScriptedProbe`]: replays queued inventories; for tests and demos.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

use crate::types::RawSession;

/// Field separator used in the tmux format string.
const TMUX_FIELD_SEPARATOR: char = '\t';

/// Format string passed to `tmux list-panes`.
const TMUX_PANE_FORMAT: &str = "#{pane_id}\t#{session_name}:#{window_name}\t#{pane_current_path}";

/// Errors that can occur while enumerating sessions.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The inspection command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The inspection command exited unsuccessfully.
    #[error("{command} exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// The probe did not answer within the configured timeout.
    #[error("session probe timed out after {0:?}")]
    Timeout(Duration),

    /// Any other probe-specific failure.
    #[error("session probe failed: {0}")]
    Other(String),
}

/// Future returned by [`SessionProbe::list_sessions`].
pub type ProbeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<RawSession>, ProbeError>> + Send + 'a>>;

/// Capability interface for listing observable sessions.
pub trait SessionProbe: Send + Sync {
    /// Returns the current raw inventory of sessions.
    ///
    /// # Errors
    ///
    /// Resolves to a [`ProbeError`] if the inventory cannot be obtained.
    /// Callers treat this as "no change" rather than "no sessions".
    fn list_sessions(&self) -> ProbeFuture<'_>;
}

/// Probe backed by the `tmux` command-line client.
#[derive(Debug, Clone)]
pub struct TmuxProbe {
    binary: String,
}

impl Default for TmuxProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl TmuxProbe {
    /// Creates a probe that runs `tmux` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("tmux")
    }

    /// Creates a probe that runs the given tmux binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl TmuxProbe {
    async fn list_panes(&self) -> Result<Vec<RawSession>, ProbeError> {
        let output = Command::new(&self.binary)
            .args(["list-panes", "-a", "-F", TMUX_PANE_FORMAT])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                command: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_no_server(&stderr) {
                trace!("tmux server not running, reporting no sessions");
                return Ok(Vec::new());
            }
            return Err(ProbeError::CommandFailed {
                command: self.binary.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(parse_tmux_panes(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl SessionProbe for TmuxProbe {
    fn list_sessions(&self) -> ProbeFuture<'_> {
        Box::pin(self.list_panes())
    }
}

/// Probe replaying queued inventories in order.
///
/// Each call pops one entry: a session list or a failure message. Once the
/// queue is empty every call reports no sessions.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<Result<Vec<RawSession>, String>>>,
}

impl ScriptedProbe {
    /// Creates a probe with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one inventory.
    pub fn push_ok(&self, sessions: Vec<RawSession>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(sessions));
    }

    /// Queues one failed call.
    pub fn push_err(&self, message: impl Into<String>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(message.into()));
    }

    fn next(&self) -> Result<Vec<RawSession>, ProbeError> {
        match self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            Some(Ok(sessions)) => Ok(sessions),
            Some(Err(message)) => Err(ProbeError::Other(message)),
            None => Ok(Vec::new()),
        }
    }
}

impl SessionProbe for ScriptedProbe {
    fn list_sessions(&self) -> ProbeFuture<'_> {
        let result = self.next();
        Box::pin(async move { result })
    }
}

/// Returns `true` when tmux reports that no server is running.
///
/// That is a legitimately empty inventory, not a probe failure.
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running") || stderr.contains("error connecting to")
}

/// Parses `tmux list-panes` output produced with [`TMUX_PANE_FORMAT`].
///
/// Lines without a pane id are skipped. A missing path field yields a
/// session without a working-directory hint.
///
/// # Example
///
/// ```
/// use taskpulse::probe::parse_tmux_panes;
///
/// let sessions = parse_tmux_panes("%1\tdev:editor\t/home/ada/code/engine\n");
/// assert_eq!(sessions.len(), 1);
/// assert_eq!(sessions[0].session_id, "%1");
/// assert_eq!(sessions[0].title, "dev:editor");
/// assert_eq!(sessions[0].working_dir_hint.as_deref(), Some("/home/ada/code/engine"));
/// ```
#[must_use]
pub fn parse_tmux_panes(output: &str) -> Vec<RawSession> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, TMUX_FIELD_SEPARATOR);
            let session_id = fields.next()?.trim();
            if session_id.is_empty() {
                return None;
            }
            let title = fields.next().unwrap_or_default().trim();
            let path = fields.next().map(str::trim).filter(|p| !p.is_empty());
            Some(RawSession::new(session_id, title, path))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parses_multiple_panes() {
        let output = "%1\tdev:editor\t/home/ada/code/engine\n%7\tops:logs\t/var/log\n";
        let sessions = parse_tmux_panes(output);

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].session_id, "%7");
        assert_eq!(sessions[1].title, "ops:logs");
        assert_eq!(sessions[1].working_dir_hint.as_deref(), Some("/var/log"));
    }

    #[test]
    fn skips_blank_lines_and_missing_ids() {
        let output = "\n\t:orphan\t/tmp\n%2\tmain:zsh\t/home/ada\n";
        let sessions = parse_tmux_panes(output);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "%2");
    }

    #[test]
    fn missing_path_yields_no_hint() {
        let sessions = parse_tmux_panes("%3\tmain:zsh\n%4\tmain:vim\t\n");

        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].working_dir_hint.is_none());
        assert!(sessions[1].working_dir_hint.is_none());
    }

    #[test]
    fn paths_with_tabs_stay_intact() {
        // splitn keeps anything after the second separator in the path field.
        let sessions = parse_tmux_panes("%5\tmain:zsh\t/home/ada/odd\tdir\n");
        assert_eq!(
            sessions[0].working_dir_hint.as_deref(),
            Some("/home/ada/odd\tdir")
        );
    }

    #[test]
    fn no_server_messages_are_recognized() {
        assert!(is_no_server("no server running on /tmp/tmux-1000/default"));
        assert!(is_no_server(
            "error connecting to /tmp/tmux-1000/default (No such file or directory)"
        ));
        assert!(!is_no_server("unknown option -- x"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let probe = TmuxProbe::with_binary("/nonexistent/taskpulse-tmux");
        let err = probe.list_sessions().await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn fake_tmux(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("tmux");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn tmux_output_is_parsed() {
        let dir = tempfile::TempDir::new().unwrap();
        let probe = TmuxProbe::with_binary(fake_tmux(
            &dir,
            "printf '%%1\\tdev:vim\\t/srv/api\\n'",
        ));

        let sessions = probe.list_sessions().await.unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "%1");
        assert_eq!(sessions[0].working_dir_hint.as_deref(), Some("/srv/api"));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn tmux_without_server_reports_no_sessions() {
        let dir = tempfile::TempDir::new().unwrap();
        let probe = TmuxProbe::with_binary(fake_tmux(
            &dir,
            "echo 'no server running on /tmp/tmux-1000/default' >&2; exit 1",
        ));

        assert!(probe.list_sessions().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn abandoned_tmux_call_kills_the_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("survived");
        let probe = TmuxProbe::with_binary(fake_tmux(
            &dir,
            &format!("sleep 1; touch '{}'", marker.display()),
        ));

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), probe.list_sessions()).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn scripted_probe_replays_in_order() {
        let probe = ScriptedProbe::new();
        probe.push_ok(vec![RawSession::new("%1", "a", None)]);
        probe.push_err("gone");

        assert_eq!(probe.list_sessions().await.unwrap().len(), 1);
        assert!(matches!(
            probe.list_sessions().await,
            Err(ProbeError::Other(ref message)) if message == "gone"
        ));
        assert!(probe.list_sessions().await.unwrap().is_empty());
    }

    #[test]
    fn timeout_error_display() {
        let err = ProbeError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "session probe timed out after 1.5s");
    }
}
