//! Task lifecycle: every state transition and the single-current invariant.
//!
//! [`TaskLifecycle`] is the only component that mutates task state. It owns
//! two pieces of state behind one async mutex:
//!
//! - the [`TaskStore`], holding the current task and the history, and
//! - an in-memory map from session id to the task bound to that session.
//!
//! Every operation holds the mutex for its full read-modify-write-persist
//! cycle, so manual commands and reconciler ticks serialize against each
//! other. Each mutation is saved before it is reported as successful; when
//! the save fails the in-memory bindings are left as they were. Store calls
//! run on the blocking pool.
//!
//! Other processes may share the store (a one-shot `complete` next to a
//! running `watch`). A bound task that already sits in the stored history was
//! finished elsewhere; its binding is released instead of finishing it again.
//!
//! # State machine
//!
//! ```text
//!                 complete()
//!   in-progress ─────────────► completed
//!        │
//!        │  stop() / retire_for_session()
//!        └───────────────────► stopped
//! ```
//!
//! # Conflict policy
//!
//! Manual [`start`](TaskLifecycle::start) refuses to replace an existing
//! current task and returns it in the error. [`switch_current`](TaskLifecycle::switch_current)
//! is a focus change and always wins.
//!
//! # Known gap
//!
//! Session bindings live only in memory. After a restart, sessions are
//! rediscovered as new and get fresh tasks; the previous bound tasks are not
//! rehydrated.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{StoreError, TaskStore};
use crate::types::{Session, Task, TaskState, TaskStatus, MAX_PROGRESS};

/// Errors returned by lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A manual start was attempted while another task is current.
    #[error("task \"{}\" is already in progress", .0.name)]
    Conflict(Box<Task>),

    /// The operation needs a current task and there is none.
    #[error("no task is currently in progress")]
    NoCurrentTask,

    /// The operation needs a task bound to this session and there is none.
    #[error("no task is bound to session {0}")]
    UnboundSession(String),

    /// Progress outside `0..=100`.
    #[error("progress must be between 0 and 100, got {0}")]
    OutOfRange(i64),

    /// Task names must contain something other than whitespace.
    #[error("task name cannot be empty")]
    EmptyName,

    /// Persisting the change failed; nothing was applied.
    #[error("task store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse classification of [`LifecycleError`] for callers that only need
/// to branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Range,
    Validation,
    Store,
}

impl LifecycleError {
    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NoCurrentTask | Self::UnboundSession(_) => ErrorKind::NotFound,
            Self::OutOfRange(_) => ErrorKind::Range,
            Self::EmptyName => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Returns the task that blocked a manual start, if this is a conflict.
    #[must_use]
    pub fn blocking_task(&self) -> Option<&Task> {
        match self {
            Self::Conflict(task) => Some(task),
            _ => None,
        }
    }
}

/// A progress update together with the progress it replaced.
///
/// The previous value is the baseline notifiers use to decide whether the
/// change is worth announcing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressChange {
    pub task: Task,
    pub previous_progress: u8,
}

impl ProgressChange {
    /// Signed difference between the new and the previous progress.
    #[must_use]
    pub fn delta(&self) -> i16 {
        i16::from(self.task.progress) - i16::from(self.previous_progress)
    }
}

fn validate_progress(percentage: i64) -> Result<u8, LifecycleError> {
    u8::try_from(percentage)
        .ok()
        .filter(|p| *p <= MAX_PROGRESS)
        .ok_or(LifecycleError::OutOfRange(percentage))
}

/// Owner of all task state transitions.
#[derive(Debug)]
pub struct TaskLifecycle<S> {
    store: Arc<S>,
    bindings: Mutex<HashMap<String, Task>>,
}

impl<S: TaskStore + 'static> TaskLifecycle<S> {
    /// Creates a lifecycle over `store` with no session bindings.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn load_state(&self) -> Result<TaskState, StoreError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }

    async fn save_state(&self, state: &TaskState) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let state = state.clone();
        tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }

    /// Starts a new manual task and makes it current.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::EmptyName`] if `name` is blank.
    /// - [`LifecycleError::Conflict`] carrying the existing current task if
    ///   there is one. The store is left unchanged.
    /// - [`LifecycleError::Store`] if the state cannot be loaded or saved.
    pub async fn start(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Task, LifecycleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::EmptyName);
        }
        let description = description.filter(|d| !d.trim().is_empty());

        let _bindings = self.bindings.lock().await;
        let mut state = self.load_state().await?;

        if let Some(current) = &state.current_task {
            debug!(task_id = %current.id, "Start rejected, task already current");
            return Err(LifecycleError::Conflict(Box::new(current.clone())));
        }

        let task = Task::new(name.to_string(), description);
        state.current_task = Some(task.clone());
        self.save_state(&state).await?;

        info!(task_id = %task.id, name = %task.name, "Task started");
        Ok(task)
    }

    /// Records progress on the current task.
    ///
    /// Decreases are accepted.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NoCurrentTask`] if nothing is current.
    /// - [`LifecycleError::OutOfRange`] if `percentage` is outside `0..=100`.
    /// - [`LifecycleError::Store`] on persistence failure.
    pub async fn update(
        &self,
        percentage: i64,
        message: impl Into<String>,
    ) -> Result<ProgressChange, LifecycleError> {
        let mut bindings = self.bindings.lock().await;
        let mut state = self.load_state().await?;

        let Some(task) = state.current_task.as_mut() else {
            return Err(LifecycleError::NoCurrentTask);
        };
        let progress = validate_progress(percentage)?;

        let previous_progress = task.progress;
        task.record_progress(progress, message.into(), Utc::now());
        let task = task.clone();

        self.save_state(&state).await?;
        refresh_binding(&mut bindings, &task);

        debug!(
            task_id = %task.id,
            previous = previous_progress,
            progress,
            "Task progress updated"
        );
        Ok(ProgressChange {
            task,
            previous_progress,
        })
    }

    /// Completes the current task and moves it to the head of the history.
    ///
    /// Progress is forced to 100. `message`, when given, is kept as the
    /// task's completion message.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NoCurrentTask`] if nothing is current.
    /// - [`LifecycleError::Store`] on persistence failure.
    pub async fn complete(&self, message: Option<String>) -> Result<Task, LifecycleError> {
        let mut bindings = self.bindings.lock().await;
        let mut state = self.load_state().await?;

        let Some(mut task) = state.current_task.take() else {
            return Err(LifecycleError::NoCurrentTask);
        };
        task.completion_message = message.filter(|m| !m.trim().is_empty());
        task.finish(TaskStatus::Completed, Utc::now());
        state.push_history(task.clone());

        self.save_state(&state).await?;
        release_binding(&mut bindings, &task);

        info!(task_id = %task.id, name = %task.name, "Task completed");
        Ok(task)
    }

    /// Stops the current task without completing it.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NoCurrentTask`] if nothing is current.
    /// - [`LifecycleError::Store`] on persistence failure.
    pub async fn stop(&self) -> Result<Task, LifecycleError> {
        let mut bindings = self.bindings.lock().await;
        let mut state = self.load_state().await?;

        let Some(mut task) = state.current_task.take() else {
            return Err(LifecycleError::NoCurrentTask);
        };
        task.finish(TaskStatus::Stopped, Utc::now());
        state.push_history(task.clone());

        self.save_state(&state).await?;
        release_binding(&mut bindings, &task);

        info!(task_id = %task.id, progress = task.progress, "Task stopped");
        Ok(task)
    }

    /// Returns the current task and the history, newest first.
    ///
    /// `history_limit` truncates the returned history; the store is not
    /// modified.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] if the state cannot be loaded.
    pub async fn status(&self, history_limit: Option<usize>) -> Result<TaskState, LifecycleError> {
        let _bindings = self.bindings.lock().await;
        let mut state = self.load_state().await?;
        if let Some(limit) = history_limit {
            state.history.truncate(limit);
        }
        Ok(state)
    }

    /// Creates the task bound to `session`, or returns the existing one.
    ///
    /// Idempotent by session id: a second call before the session is retired
    /// returns the same task unchanged. Bound tasks live in memory until they
    /// are switched to, so this does not touch the store.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the signature uniform with the
    /// other session operations.
    pub async fn create_for_session(&self, session: &Session) -> Result<Task, LifecycleError> {
        let mut bindings = self.bindings.lock().await;

        if let Some(existing) = bindings.get(&session.session_id) {
            debug!(
                session_id = %session.session_id,
                task_id = %existing.id,
                "Session already bound"
            );
            return Ok(existing.clone());
        }

        let task = Task::for_session(session);
        bindings.insert(session.session_id.clone(), task.clone());

        info!(
            session_id = %session.session_id,
            task_id = %task.id,
            project = %session.project_name,
            "Task created for session"
        );
        Ok(task)
    }

    /// Records progress on the task bound to `session_id`.
    ///
    /// If that task is also current, the stored copy is updated as well.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::UnboundSession`] if no task is bound, or the bound
    ///   task was already finished through the shared store.
    /// - [`LifecycleError::OutOfRange`] if `percentage` is outside `0..=100`.
    /// - [`LifecycleError::Store`] on persistence failure.
    pub async fn update_for_session(
        &self,
        session_id: &str,
        percentage: i64,
        message: impl Into<String>,
    ) -> Result<ProgressChange, LifecycleError> {
        let mut bindings = self.bindings.lock().await;

        let Some(bound) = bindings.get(session_id).cloned() else {
            return Err(LifecycleError::UnboundSession(session_id.to_string()));
        };
        let progress = validate_progress(percentage)?;

        let mut state = self.load_state().await?;
        if finished_elsewhere(&state, &bound) {
            release_stale_binding(&mut bindings, session_id, &bound);
            return Err(LifecycleError::UnboundSession(session_id.to_string()));
        }
        let is_current = state
            .current_task
            .as_ref()
            .is_some_and(|current| current.id == bound.id);

        // The stored copy is authoritative while the task is current.
        let mut task = match (&state.current_task, is_current) {
            (Some(current), true) => current.clone(),
            _ => bound.clone(),
        };
        let previous_progress = task.progress;
        task.record_progress(progress, message.into(), Utc::now());

        if is_current {
            state.current_task = Some(task.clone());
            self.save_state(&state).await?;
        }
        bindings.insert(session_id.to_string(), task.clone());

        debug!(
            session_id,
            task_id = %task.id,
            previous = previous_progress,
            progress,
            "Session task progress updated"
        );
        Ok(ProgressChange {
            task,
            previous_progress,
        })
    }

    /// Retires the task bound to `session_id` into the history as stopped.
    ///
    /// Returns `Ok(None)` when nothing is bound, or when the bound task was
    /// already finished through another handle on the same store. If the
    /// retired task was the current task, the current slot is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] on persistence failure; the binding is
    /// kept so a later retry can succeed.
    pub async fn retire_for_session(&self, session_id: &str) -> Result<Option<Task>, LifecycleError> {
        let mut bindings = self.bindings.lock().await;

        let Some(bound) = bindings.get(session_id).cloned() else {
            debug!(session_id, "No task bound to retired session");
            return Ok(None);
        };

        let mut state = self.load_state().await?;
        if finished_elsewhere(&state, &bound) {
            release_stale_binding(&mut bindings, session_id, &bound);
            return Ok(None);
        }
        let was_current = state
            .current_task
            .as_ref()
            .is_some_and(|current| current.id == bound.id);

        let mut task = if was_current {
            state.current_task.take().unwrap_or_else(|| bound.clone())
        } else {
            bound.clone()
        };
        task.finish(TaskStatus::Stopped, Utc::now());
        state.push_history(task.clone());

        self.save_state(&state).await?;
        bindings.remove(session_id);

        info!(
            session_id,
            task_id = %task.id,
            was_current,
            "Session task retired"
        );
        Ok(Some(task))
    }

    /// Makes the task bound to `session_id` the current task.
    ///
    /// No conflict check: whatever was current is superseded. A superseded
    /// task bound to another session stays bound (its latest state is kept in
    /// the binding). A superseded manual task has no other home, so it is
    /// stopped and moved to the history.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::UnboundSession`] if no task is bound, or the bound
    ///   task was already finished through the shared store.
    /// - [`LifecycleError::Store`] on persistence failure.
    pub async fn switch_current(&self, session_id: &str) -> Result<Task, LifecycleError> {
        let mut bindings = self.bindings.lock().await;

        let Some(bound) = bindings.get(session_id).cloned() else {
            return Err(LifecycleError::UnboundSession(session_id.to_string()));
        };

        let mut state = self.load_state().await?;
        if finished_elsewhere(&state, &bound) {
            release_stale_binding(&mut bindings, session_id, &bound);
            return Err(LifecycleError::UnboundSession(session_id.to_string()));
        }
        if let Some(current) = &state.current_task {
            if current.id == bound.id {
                return Ok(current.clone());
            }
        }

        let superseded = state.current_task.replace(bound.clone());
        let mut rebind = None;
        if let Some(mut previous) = superseded {
            match previous.bound_session_id.clone() {
                Some(previous_session) if bindings.contains_key(&previous_session) => {
                    rebind = Some((previous_session, previous));
                }
                _ => {
                    warn!(
                        task_id = %previous.id,
                        "Manual task superseded by session switch, moving to history"
                    );
                    previous.finish(TaskStatus::Stopped, Utc::now());
                    state.push_history(previous);
                }
            }
        }

        self.save_state(&state).await?;
        if let Some((previous_session, previous)) = rebind {
            bindings.insert(previous_session, previous);
        }

        info!(session_id, task_id = %bound.id, "Switched current task to session");
        Ok(bound)
    }

    /// Returns the task bound to `session_id`, if any.
    pub async fn bound_task(&self, session_id: &str) -> Option<Task> {
        self.bindings.lock().await.get(session_id).cloned()
    }

    /// Returns all session bindings, oldest task first.
    pub async fn session_bindings(&self) -> Vec<(String, Task)> {
        let bindings = self.bindings.lock().await;
        let mut entries: Vec<(String, Task)> = bindings
            .iter()
            .map(|(session_id, task)| (session_id.clone(), task.clone()))
            .collect();
        entries.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        entries
    }
}

/// Keeps a bound task's in-memory copy in sync with its stored copy.
fn refresh_binding(bindings: &mut HashMap<String, Task>, task: &Task) {
    if let Some(session_id) = &task.bound_session_id {
        if let Some(entry) = bindings.get_mut(session_id) {
            if entry.id == task.id {
                *entry = task.clone();
            }
        }
    }
}

/// Returns `true` if `bound` is already recorded in the stored history.
fn finished_elsewhere(state: &TaskState, bound: &Task) -> bool {
    state.history.iter().any(|task| task.id == bound.id)
}

fn release_stale_binding(bindings: &mut HashMap<String, Task>, session_id: &str, bound: &Task) {
    info!(
        session_id,
        task_id = %bound.id,
        "Bound task already finished through the shared store, releasing binding"
    );
    bindings.remove(session_id);
}

/// Drops the binding of a task that has left the current slot for good.
fn release_binding(bindings: &mut HashMap<String, Task>, task: &Task) {
    if let Some(session_id) = &task.bound_session_id {
        if bindings.get(session_id).is_some_and(|bound| bound.id == task.id) {
            bindings.remove(session_id);
            debug!(session_id = %session_id, task_id = %task.id, "Session binding released");
        }
    }
}
