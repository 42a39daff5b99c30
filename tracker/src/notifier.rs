//! Progress notifications.
//!
//! The tracker announces three kinds of events: a task was created, a task
//! made a significant step forward, and a task was completed. What counts as
//! significant is decided by [`NotificationPolicy`]; delivery is behind the
//! [`Notifier`] trait. The built-in [`LogNotifier`] emits structured
//! `tracing` events.

use serde::Serialize;
use tracing::info;

use crate::lifecycle::ProgressChange;
use crate::types::Task;

/// Default progress increase, in percentage points, that triggers a
/// milestone notification.
pub const DEFAULT_NOTIFY_STEP: u8 = 25;

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Notification {
    /// A task was started manually or created for a new session.
    TaskStarted { task: Task },

    /// Progress increased by at least the configured step.
    #[serde(rename_all = "camelCase")]
    ProgressMilestone {
        task: Task,
        previous_progress: u8,
    },

    /// A task reached completion.
    TaskCompleted { task: Task },
}

impl Notification {
    /// Returns the task the notification is about.
    #[must_use]
    pub fn task(&self) -> &Task {
        match self {
            Self::TaskStarted { task }
            | Self::ProgressMilestone { task, .. }
            | Self::TaskCompleted { task } => task,
        }
    }
}

/// Decides which lifecycle events become notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    step: u8,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            step: DEFAULT_NOTIFY_STEP,
        }
    }
}

impl NotificationPolicy {
    /// Creates a policy firing on increases of at least `step` points.
    ///
    /// A zero step is raised to 1 so that unchanged progress never fires.
    #[must_use]
    pub fn new(step: u8) -> Self {
        Self { step: step.max(1) }
    }

    /// Returns the configured step.
    #[must_use]
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Notification for a newly created task.
    #[must_use]
    pub fn on_started(&self, task: &Task) -> Notification {
        Notification::TaskStarted { task: task.clone() }
    }

    /// Notification for a progress update, if the increase is large enough.
    ///
    /// Decreases and small increases are silent.
    #[must_use]
    pub fn on_progress(&self, change: &ProgressChange) -> Option<Notification> {
        (change.delta() >= i16::from(self.step)).then(|| Notification::ProgressMilestone {
            task: change.task.clone(),
            previous_progress: change.previous_progress,
        })
    }

    /// Notification for a completed task.
    #[must_use]
    pub fn on_completed(&self, task: &Task) -> Notification {
        Notification::TaskCompleted { task: task.clone() }
    }
}

/// Delivery channel for notifications.
pub trait Notifier: Send + Sync {
    /// Delivers one notification. Delivery is best-effort.
    fn notify(&self, notification: &Notification);
}

/// Notifier that writes each notification as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::TaskStarted { task } => {
                info!(
                    target: "taskpulse::notify",
                    task_id = %task.id,
                    name = %task.name,
                    "Started tracking {}",
                    task.name
                );
            }
            Notification::ProgressMilestone {
                task,
                previous_progress,
            } => {
                info!(
                    target: "taskpulse::notify",
                    task_id = %task.id,
                    previous = previous_progress,
                    progress = task.progress,
                    "{} is {}% done",
                    task.name,
                    task.progress
                );
            }
            Notification::TaskCompleted { task } => {
                info!(
                    target: "taskpulse::notify",
                    task_id = %task.id,
                    message = task.completion_message.as_deref().unwrap_or(""),
                    "Completed {}",
                    task.name
                );
            }
        }
    }
}
