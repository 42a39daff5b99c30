//! TaskPulse - progress tracking bound to terminal sessions.
//!
//! This crate keeps a single current task plus a history of finished ones,
//! and binds tasks to terminal sessions it discovers on its own.
//!
//! # Overview
//!
//! A [`SessionProbe`](probe::SessionProbe) lists the sessions visible right
//! now. The [`SessionRegistry`](registry::SessionRegistry) turns consecutive
//! inventories into appeared/disappeared diffs. The
//! [`Reconciler`](reconciler::Reconciler) creates a bound task for each new
//! session and retires it into the history when the session goes away. All
//! state transitions go through [`TaskLifecycle`](lifecycle::TaskLifecycle),
//! which persists every change to a [`TaskStore`](store::TaskStore) before
//! reporting success.
//!
//! ```text
//! SessionProbe -> SessionRegistry -> Reconciler -> TaskLifecycle -> TaskStore
//!                                        |
//!                                        +-> ChangeReport -> Notifier / UI
//! ```
//!
//! # Modules
//!
//! - [`types`]: Task, history and session records
//! - [`probe`]: Session enumeration (tmux, scripted)
//! - [`registry`]: Session inventory snapshots and diffs
//! - [`lifecycle`]: Task state machine and session bindings
//! - [`store`]: JSON-file and in-memory task stores
//! - [`reconciler`]: The periodic control loop
//! - [`notifier`]: Progress notifications
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Crate-level error type
//! - [`utils`]: Project-name derivation

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notifier;
pub mod probe;
pub mod reconciler;
pub mod registry;
pub mod store;
pub mod types;
pub mod utils;

pub use config::Config;
pub use error::{Result, TrackerError};
pub use lifecycle::{ErrorKind, LifecycleError, ProgressChange, TaskLifecycle};
pub use notifier::{LogNotifier, Notification, NotificationPolicy, Notifier};
pub use probe::{ProbeError, ProbeFuture, ScriptedProbe, SessionProbe, TmuxProbe};
pub use reconciler::{ChangeReport, Reconciler, TickOutcome};
pub use registry::{SessionDiff, SessionRegistry};
pub use store::{JsonFileStore, MemoryStore, StoreError, TaskStore};
pub use types::{ProgressUpdate, RawSession, Session, Task, TaskState, TaskStatus};
