//! Session registry: the last known inventory of terminal sessions.
//!
//! Each [`poll`](SessionRegistry::poll) asks the probe for the current raw
//! inventory, normalizes it into [`Session`] records, and computes the set
//! difference against the previous snapshot.
//!
//! # Guarantees
//!
//! - **Probe failures are not session loss.** If the probe errors or times
//!   out, the poll reports no changes and the snapshot is left untouched.
//! - **Atomic replacement.** The diff is computed against the old snapshot
//!   while holding the write lock, and the snapshot is swapped in one step.
//!   Readers see either the old or the new inventory.
//! - **Stable naming.** A session keeps the suggested task name it was given
//!   when first seen; later polls only refresh its title, directory and
//!   `last_seen`.
//!
//! Identity is the probe's `session_id`. A probe whose ids change between
//! polls makes every session look new on every tick; that is supported, just
//! noisy.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::BaseDirs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::probe::{ProbeError, SessionProbe};
use crate::types::{RawSession, Session};
use crate::utils::project_name::{derive_project_name, path_from_title, resolve_working_dir};
use crate::utils::DEFAULT_PROJECT_NAME;

/// Default upper bound on a single probe call.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of comparing two consecutive inventories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDiff {
    /// Sessions present now but not in the previous snapshot.
    pub appeared: Vec<Session>,

    /// Ids present in the previous snapshot but not now.
    pub disappeared: Vec<String>,

    /// Every session known after this poll, in probe order.
    pub current: Vec<Session>,
}

impl SessionDiff {
    /// Returns `true` if any session appeared or disappeared.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.appeared.is_empty() || !self.disappeared.is_empty()
    }
}

/// Tracks the externally observed session inventory.
pub struct SessionRegistry {
    probe: Arc<dyn SessionProbe>,
    probe_timeout: Duration,
    home_dir: Option<PathBuf>,
    snapshot: RwLock<Vec<Session>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("probe_timeout", &self.probe_timeout)
            .field("home_dir", &self.home_dir)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates an empty registry polling `probe`.
    ///
    /// `~` in working-directory hints is expanded against the current user's
    /// home directory when it can be determined.
    pub fn new(probe: Arc<dyn SessionProbe>, probe_timeout: Duration) -> Self {
        let home_dir = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        Self {
            probe,
            probe_timeout,
            home_dir,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// Overrides the home directory used for `~` expansion.
    #[must_use]
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    /// Polls the probe once and returns the diff against the previous snapshot.
    ///
    /// Never fails: a probe error is logged and reported as an empty diff whose
    /// `current` is the unchanged previous snapshot.
    pub async fn poll(&self) -> SessionDiff {
        match self.try_poll().await {
            Ok(diff) => diff,
            Err(e) => {
                warn!(error = %e, "Session probe failed, keeping previous inventory");
                SessionDiff {
                    current: self.current().await,
                    ..SessionDiff::default()
                }
            }
        }
    }

    /// Like [`poll`](Self::poll), but returns the probe error instead of
    /// reporting no change. The snapshot is untouched on error.
    ///
    /// # Errors
    ///
    /// Returns the [`ProbeError`] if the probe fails or times out.
    pub async fn try_poll(&self) -> Result<SessionDiff, ProbeError> {
        let raw = self.probe_sessions().await?;

        let now = Utc::now();
        let mut snapshot = self.snapshot.write().await;

        let previous: HashMap<&str, &Session> = snapshot
            .iter()
            .map(|session| (session.session_id.as_str(), session))
            .collect();

        let mut seen = HashSet::new();
        let mut current = Vec::with_capacity(raw.len());
        let mut appeared = Vec::new();

        for raw_session in raw {
            if !seen.insert(raw_session.session_id.clone()) {
                debug!(session_id = %raw_session.session_id, "Duplicate session id in probe output");
                continue;
            }

            match previous.get(raw_session.session_id.as_str()) {
                Some(known) => current.push(self.refresh(known, raw_session, now)),
                None => {
                    let session = self.normalize(raw_session, now);
                    appeared.push(session.clone());
                    current.push(session);
                }
            }
        }

        let disappeared: Vec<String> = snapshot
            .iter()
            .filter(|session| !seen.contains(&session.session_id))
            .map(|session| session.session_id.clone())
            .collect();

        drop(previous);
        *snapshot = current.clone();
        drop(snapshot);

        if !appeared.is_empty() || !disappeared.is_empty() {
            info!(
                appeared = appeared.len(),
                disappeared = disappeared.len(),
                total = current.len(),
                "Session inventory changed"
            );
        }

        Ok(SessionDiff {
            appeared,
            disappeared,
            current,
        })
    }

    /// Returns the sessions known after the last successful poll.
    pub async fn current(&self) -> Vec<Session> {
        self.snapshot.read().await.clone()
    }

    /// Looks up a known session by id.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.snapshot
            .read()
            .await
            .iter()
            .find(|session| session.session_id == session_id)
            .cloned()
    }

    /// Runs the probe, bounded by the configured timeout.
    ///
    /// A probe that hangs past the timeout is dropped, which cancels it.
    async fn probe_sessions(&self) -> Result<Vec<RawSession>, ProbeError> {
        tokio::time::timeout(self.probe_timeout, self.probe.list_sessions())
            .await
            .map_err(|_| ProbeError::Timeout(self.probe_timeout))?
    }

    fn working_dir(&self, raw: &RawSession) -> Option<PathBuf> {
        let hint = raw
            .working_dir_hint
            .as_deref()
            .filter(|hint| !hint.trim().is_empty())
            .or_else(|| path_from_title(&raw.title))?;
        resolve_working_dir(hint, self.home_dir.as_deref())
    }

    fn normalize(&self, raw: RawSession, now: DateTime<Utc>) -> Session {
        let working_dir = self.working_dir(&raw);
        let project_name = working_dir
            .as_deref()
            .map_or_else(|| DEFAULT_PROJECT_NAME.to_string(), derive_project_name);
        let suggested_task_name = suggest_task_name(&project_name, now);

        Session {
            session_id: raw.session_id,
            title: raw.title,
            working_dir,
            project_name,
            suggested_task_name,
            last_seen: now,
        }
    }

    fn refresh(&self, known: &Session, raw: RawSession, now: DateTime<Utc>) -> Session {
        let working_dir = self.working_dir(&raw).or_else(|| known.working_dir.clone());
        let project_name = working_dir
            .as_deref()
            .map_or_else(|| DEFAULT_PROJECT_NAME.to_string(), derive_project_name);

        Session {
            session_id: raw.session_id,
            title: raw.title,
            working_dir,
            project_name,
            suggested_task_name: known.suggested_task_name.clone(),
            last_seen: now,
        }
    }
}

/// Builds the task name offered for a newly seen session.
#[must_use]
pub fn suggest_task_name(project_name: &str, seen_at: DateTime<Utc>) -> String {
    format!("{project_name} session {}", seen_at.format("%b %d %H:%M"))
}
