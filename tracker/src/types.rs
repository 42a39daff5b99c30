//! Core data types for TaskPulse.
//!
//! This module defines the task and session records shared between the
//! lifecycle, the session registry, and the on-disk store. All persisted types
//! serialize to camelCase JSON.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for task progress, in percent.
pub const MAX_PROGRESS: u8 = 100;

/// Lifecycle status of a task.
///
/// `InProgress` is the only entry state; `Completed` and `Stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Stopped,
}

impl TaskStatus {
    /// Returns `true` if no further transition can leave this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Returns the serialized form of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress report appended to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// When the update was recorded.
    pub timestamp: DateTime<Utc>,

    /// Progress reported with this update.
    pub progress: u8,

    /// Free-form message supplied by the caller.
    pub message: String,
}

/// A unit of tracked effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// UUIDv7 string, so lexical order follows creation order.
    pub id: String,

    /// Human-readable task name, never empty.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub start_time: DateTime<Utc>,

    /// Absent while the task is in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Percentage in `0..=100`.
    pub progress: u8,

    pub status: TaskStatus,

    /// Append-only log of progress reports, oldest first.
    #[serde(default)]
    pub updates: Vec<ProgressUpdate>,

    /// Session this task was created for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_session_id: Option<String>,

    /// Closing note recorded by `complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
}

impl Task {
    /// Creates a new in-progress task with zero progress.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskpulse::types::{Task, TaskStatus};
    ///
    /// let task = Task::new("Write docs".to_string(), None);
    /// assert_eq!(task.status, TaskStatus::InProgress);
    /// assert_eq!(task.progress, 0);
    /// assert!(task.end_time.is_none());
    /// ```
    #[must_use]
    pub fn new(name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name,
            description,
            start_time: Utc::now(),
            end_time: None,
            progress: 0,
            status: TaskStatus::InProgress,
            updates: Vec::new(),
            bound_session_id: None,
            completion_message: None,
        }
    }

    /// Creates a new in-progress task bound to `session`.
    ///
    /// The description records the project and working directory so the task
    /// still reads sensibly once the session is gone.
    #[must_use]
    pub fn for_session(session: &Session) -> Self {
        let location = session
            .working_dir
            .as_ref()
            .map_or_else(|| "an unknown directory".to_string(), |dir| dir.display().to_string());
        let mut task = Self::new(
            session.suggested_task_name.clone(),
            Some(format!(
                "Auto-tracked session for {} in {}",
                session.project_name, location
            )),
        );
        task.bound_session_id = Some(session.session_id.clone());
        task
    }

    /// Returns `true` while the task is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::InProgress
    }

    /// Records a progress report and overwrites the current progress.
    pub(crate) fn record_progress(&mut self, progress: u8, message: String, at: DateTime<Utc>) {
        self.progress = progress;
        self.updates.push(ProgressUpdate {
            timestamp: at,
            progress,
            message,
        });
    }

    /// Moves the task into a terminal status.
    ///
    /// Completion forces progress to 100; stopping leaves it untouched.
    pub(crate) fn finish(&mut self, status: TaskStatus, at: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        if status == TaskStatus::Completed {
            self.progress = MAX_PROGRESS;
        }
        self.status = status;
        self.end_time = Some(at);
    }
}

/// Durable state: the current task and the retired history, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    #[serde(default)]
    pub current_task: Option<Task>,

    #[serde(default)]
    pub history: Vec<Task>,
}

impl TaskState {
    /// Inserts a retired task at the head of the history.
    pub fn push_history(&mut self, task: Task) {
        self.history.insert(0, task);
    }

    /// Returns `true` if the current slot is occupied by a non-terminal task.
    #[must_use]
    pub fn has_active_current(&self) -> bool {
        self.current_task.as_ref().is_some_and(Task::is_active)
    }
}

/// A raw session descriptor as reported by a [`SessionProbe`](crate::probe::SessionProbe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSession {
    /// Identifier derived from the external window identity.
    pub session_id: String,

    pub title: String,

    /// Best-effort working directory reported by the probe.
    #[serde(default)]
    pub working_dir_hint: Option<String>,
}

impl RawSession {
    /// Convenience constructor.
    pub fn new(
        session_id: impl Into<String>,
        title: impl Into<String>,
        working_dir_hint: Option<&str>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            title: title.into(),
            working_dir_hint: working_dir_hint.map(str::to_string),
        }
    }
}

/// A normalized view of an externally observed terminal session.
///
/// Sessions are never persisted; the registry rebuilds them on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub title: String,
    pub working_dir: Option<PathBuf>,

    /// Project name derived from the working directory.
    pub project_name: String,

    /// Task name offered for this session, stamped with the first-seen time.
    pub suggested_task_name: String,

    pub last_seen: DateTime<Utc>,
}
