//! The control loop binding session discovery to the task lifecycle.
//!
//! One tick:
//!
//! 1. polls the [`SessionRegistry`] for a diff,
//! 2. creates (or resumes) a bound task for every appeared session,
//! 3. retires the bound task of every disappeared session into the history,
//! 4. emits a [`ChangeReport`] when anything changed.
//!
//! Failures are isolated per session: one session whose retirement fails to
//! persist does not stop the others from being processed. Such a session's
//! binding is kept, and later ticks retry it until the store accepts the
//! change.
//!
//! Only one tick runs at a time. A tick requested while another is in flight
//! returns [`TickOutcome::Skipped`] immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::lifecycle::TaskLifecycle;
use crate::registry::SessionRegistry;
use crate::store::TaskStore;
use crate::types::{Session, Task};

/// Default reconciler tick period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What changed during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReport {
    /// Tasks bound to sessions that appeared this tick.
    pub new_tasks: Vec<Task>,

    /// Tasks retired because their session went away.
    pub closed_tasks: Vec<Task>,

    /// Every session known after this tick.
    pub all_sessions: Vec<Session>,
}

impl ChangeReport {
    /// Returns `true` if no task was created or closed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_tasks.is_empty() && self.closed_tasks.is_empty()
    }
}

/// Result of a single [`Reconciler::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was in flight.
    Skipped,

    /// Nothing changed; no report was emitted.
    Quiet,

    /// Something changed; the report was emitted.
    Changed(ChangeReport),
}

/// Drives reconciliation between observed sessions and bound tasks.
pub struct Reconciler<S> {
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<TaskLifecycle<S>>,
    report_tx: Option<mpsc::Sender<ChangeReport>>,
    in_flight: Mutex<()>,
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("has_report_sender", &self.report_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: TaskStore + 'static> Reconciler<S> {
    /// Creates a reconciler without a report consumer.
    pub fn new(registry: Arc<SessionRegistry>, lifecycle: Arc<TaskLifecycle<S>>) -> Self {
        Self {
            registry,
            lifecycle,
            report_tx: None,
            in_flight: Mutex::new(()),
        }
    }

    /// Sends every change report to `tx`.
    #[must_use]
    pub fn with_report_sender(mut self, tx: mpsc::Sender<ChangeReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    /// Runs one reconciliation pass.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Reconcile tick already in flight, skipping");
            return TickOutcome::Skipped;
        };

        let diff = self.registry.poll().await;
        let sessions_changed = diff.has_changes();

        let mut new_tasks = Vec::with_capacity(diff.appeared.len());
        for session in &diff.appeared {
            match self.lifecycle.create_for_session(session).await {
                Ok(task) => new_tasks.push(task),
                Err(e) => warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Failed to create task for session"
                ),
            }
        }

        let mut closed_tasks = Vec::new();
        for session_id in &diff.disappeared {
            self.retire(session_id, &mut closed_tasks).await;
        }

        // Bindings whose session is gone but whose retirement failed earlier.
        for (session_id, _) in self.lifecycle.session_bindings().await {
            let still_present = diff
                .current
                .iter()
                .any(|session| session.session_id == session_id);
            if !still_present && !diff.disappeared.contains(&session_id) {
                debug!(session_id = %session_id, "Retrying retirement of orphaned binding");
                self.retire(&session_id, &mut closed_tasks).await;
            }
        }

        let report = ChangeReport {
            new_tasks,
            closed_tasks,
            all_sessions: diff.current,
        };
        if report.is_empty() && !sessions_changed {
            return TickOutcome::Quiet;
        }

        info!(
            new_tasks = report.new_tasks.len(),
            closed_tasks = report.closed_tasks.len(),
            sessions = report.all_sessions.len(),
            "Reconcile tick changed state"
        );

        if let Some(tx) = &self.report_tx {
            if tx.send(report.clone()).await.is_err() {
                debug!("Change report receiver dropped");
            }
        }

        TickOutcome::Changed(report)
    }

    /// Ticks every `period` until `shutdown` resolves.
    ///
    /// Missed ticks are skipped rather than bunched up.
    pub async fn run<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(period_ms = period.as_millis() as u64, "Reconciler started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Reconciler stopped");
    }

    async fn retire(&self, session_id: &str, closed_tasks: &mut Vec<Task>) {
        match self.lifecycle.retire_for_session(session_id).await {
            Ok(Some(task)) => closed_tasks.push(task),
            Ok(None) => {}
            Err(e) => warn!(
                session_id,
                error = %e,
                "Failed to retire task for session"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeFuture, ScriptedProbe, SessionProbe};
    use crate::store::MemoryStore;
    use crate::types::{RawSession, TaskStatus};
    use std::path::PathBuf;

    struct SlowProbe;

    impl SessionProbe for SlowProbe {
        fn list_sessions(&self) -> ProbeFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(vec![RawSession::new("%1", "slow", None)])
            })
        }
    }

    fn sessions(ids: &[&str]) -> Vec<RawSession> {
        ids.iter()
            .map(|id| RawSession::new(*id, format!("main:{id}"), Some("/home/ada/projects/engine")))
            .collect()
    }

    fn reconciler(probe: Arc<dyn SessionProbe>) -> Reconciler<MemoryStore> {
        let registry = SessionRegistry::new(probe, Duration::from_secs(2))
            .with_home_dir(Some(PathBuf::from("/home/ada")));
        Reconciler::new(
            Arc::new(registry),
            Arc::new(TaskLifecycle::new(MemoryStore::new())),
        )
    }

    fn changed(outcome: TickOutcome) -> ChangeReport {
        match outcome {
            TickOutcome::Changed(report) => report,
            other => panic!("expected a change report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn appeared_sessions_get_bound_tasks() {
        let probe = Arc::new(ScriptedProbe::new());
        probe.push_ok(sessions(&["%1", "%2"]));
        let reconciler = reconciler(probe);

        let report = changed(reconciler.tick().await);

        assert_eq!(report.new_tasks.len(), 2);
        assert!(report.closed_tasks.is_empty());
        assert_eq!(report.all_sessions.len(), 2);
        assert_eq!(
            report.new_tasks[0].bound_session_id.as_deref(),
            Some("%1")
        );
        assert_eq!(reconciler.lifecycle.session_bindings().await.len(), 2);
    }

    #[tokio::test]
    async fn disappeared_sessions_are_retired() {
        let probe = Arc::new(ScriptedProbe::new());
        probe.push_ok(sessions(&["%1", "%2"]));
        probe.push_ok(sessions(&["%2"]));
        let reconciler = reconciler(probe);

        let created = changed(reconciler.tick().await);
        let report = changed(reconciler.tick().await);

        assert!(report.new_tasks.is_empty());
        assert_eq!(report.closed_tasks.len(), 1);
        assert_eq!(report.closed_tasks[0].id, created.new_tasks[0].id);
        assert_eq!(report.closed_tasks[0].status, TaskStatus::Stopped);

        let state = reconciler.lifecycle.status(None).await.unwrap();
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn quiet_tick_emits_nothing() {
        let probe = Arc::new(ScriptedProbe::new());
        probe.push_ok(sessions(&["%1"]));
        probe.push_ok(sessions(&["%1"]));
        let (tx, mut rx) = mpsc::channel(4);
        let reconciler = reconciler(probe).with_report_sender(tx);

        changed(reconciler.tick().await);
        assert_eq!(reconciler.tick().await, TickOutcome::Quiet);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn probe_failure_is_quiet() {
        let probe = Arc::new(ScriptedProbe::new());
        probe.push_ok(sessions(&["%1"]));
        probe.push_err("probe offline");
        let reconciler = reconciler(probe);

        changed(reconciler.tick().await);
        assert_eq!(reconciler.tick().await, TickOutcome::Quiet);

        assert!(reconciler.lifecycle.bound_task("%1").await.is_some());
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let reconciler = reconciler(Arc::new(SlowProbe));

        let (first, second) = tokio::join!(reconciler.tick(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reconciler.tick().await
        });

        assert!(matches!(first, TickOutcome::Changed(_)));
        assert_eq!(second, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let probe = Arc::new(ScriptedProbe::new());
        probe.push_ok(sessions(&["%1"]));
        let (tx, mut rx) = mpsc::channel(4);
        let reconciler = reconciler(probe).with_report_sender(tx);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let run = reconciler.run(Duration::from_millis(10), async move {
            let _ = stop_rx.await;
        });
        let drive = async move {
            let report = rx.recv().await.unwrap();
            stop_tx.send(()).unwrap();
            report
        };

        let ((), report) = tokio::join!(run, drive);
        assert_eq!(report.new_tasks.len(), 1);
    }

    #[test]
    fn report_serializes_camel_case() {
        let json = serde_json::to_value(ChangeReport::default()).unwrap();
        assert!(json.get("newTasks").is_some());
        assert!(json.get("closedTasks").is_some());
        assert!(json.get("allSessions").is_some());
    }
}
