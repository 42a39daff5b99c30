//! Integration tests for the reconcile loop.
//!
//! These tests wire a scripted probe, the registry, the lifecycle and a
//! store together and verify what each tick produces, including when the
//! store fails partway through a tick.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskpulse::lifecycle::TaskLifecycle;
use taskpulse::probe::ScriptedProbe;
use taskpulse::reconciler::{ChangeReport, Reconciler, TickOutcome};
use taskpulse::registry::SessionRegistry;
use taskpulse::store::{JsonFileStore, MemoryStore, StoreError, TaskStore};
use taskpulse::types::{RawSession, TaskState, TaskStatus};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

// =============================================================================
// Test Helpers
// =============================================================================

/// Inventory of panes, each in its own project directory.
fn panes(ids: &[&str]) -> Vec<RawSession> {
    ids.iter()
        .map(|id| {
            let dir = format!("/home/ada/projects/app-{}", id.trim_start_matches('%'));
            RawSession::new(*id, format!("work:{id}"), Some(dir.as_str()))
        })
        .collect()
}

/// Probe replaying one inventory per entry; `None` is a failed call.
fn scripted(inventories: &[Option<&[&str]>]) -> Arc<ScriptedProbe> {
    let probe = ScriptedProbe::new();
    for inventory in inventories {
        match inventory {
            Some(ids) => probe.push_ok(panes(ids)),
            None => probe.push_err("display server gone"),
        }
    }
    Arc::new(probe)
}

/// Store that fails the next `n` saves.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

impl TaskStore for FlakyStore {
    fn load(&self) -> Result<TaskState, StoreError> {
        self.inner.load()
    }

    fn save(&self, state: &TaskState) -> Result<(), StoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.inner.save(state)
    }
}

fn registry(probe: Arc<ScriptedProbe>) -> Arc<SessionRegistry> {
    Arc::new(
        SessionRegistry::new(probe, Duration::from_secs(2))
            .with_home_dir(Some(PathBuf::from("/home/ada"))),
    )
}

fn expect_report(outcome: TickOutcome) -> ChangeReport {
    match outcome {
        TickOutcome::Changed(report) => report,
        other => panic!("expected a change report, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn sessions_come_and_go() {
    let dir = TempDir::new().unwrap();
    let probe = scripted(&[Some(&["%1", "%2"]), Some(&["%2", "%3"]), Some(&[])]);
    let lifecycle = Arc::new(TaskLifecycle::new(JsonFileStore::new(
        dir.path().join("tasks.json"),
    )));
    let reconciler = Reconciler::new(registry(probe), Arc::clone(&lifecycle));

    let first = expect_report(reconciler.tick().await);
    assert_eq!(first.new_tasks.len(), 2);
    assert_eq!(first.new_tasks[0].name.split(" session ").next(), Some("App 1"));

    let second = expect_report(reconciler.tick().await);
    assert_eq!(second.new_tasks.len(), 1);
    assert_eq!(second.closed_tasks.len(), 1);
    assert_eq!(second.closed_tasks[0].id, first.new_tasks[0].id);
    assert_eq!(second.all_sessions.len(), 2);

    let third = expect_report(reconciler.tick().await);
    assert_eq!(third.closed_tasks.len(), 2);
    assert!(third.all_sessions.is_empty());

    let state = assert_ok!(lifecycle.status(None).await);
    assert_eq!(state.history.len(), 3);
    assert!(state
        .history
        .iter()
        .all(|task| task.status == TaskStatus::Stopped));
    assert!(lifecycle.session_bindings().await.is_empty());
}

#[tokio::test]
async fn probe_outage_does_not_retire_tasks() {
    let probe = scripted(&[Some(&["%1"]), None, Some(&["%1"])]);
    let lifecycle = Arc::new(TaskLifecycle::new(MemoryStore::new()));
    let reconciler = Reconciler::new(registry(probe), Arc::clone(&lifecycle));

    let created = expect_report(reconciler.tick().await);
    assert_eq!(reconciler.tick().await, TickOutcome::Quiet);
    assert_eq!(reconciler.tick().await, TickOutcome::Quiet);

    let bound = lifecycle.bound_task("%1").await.unwrap();
    assert_eq!(bound.id, created.new_tasks[0].id);
    assert!(lifecycle.status(None).await.unwrap().history.is_empty());
}

#[tokio::test]
async fn failed_retirement_is_isolated_and_retried() {
    let probe = scripted(&[Some(&["%1", "%2"]), Some(&[])]);
    let store = Arc::new(FlakyStore::default());
    let lifecycle = Arc::new(TaskLifecycle::new(Arc::clone(&store)));
    let reconciler = Reconciler::new(registry(probe), Arc::clone(&lifecycle));

    let created = expect_report(reconciler.tick().await);

    // The first retirement of the next tick fails; the second must still land.
    store.fail_next(1);
    let partial = expect_report(reconciler.tick().await);
    assert_eq!(partial.closed_tasks.len(), 1);
    assert_eq!(partial.closed_tasks[0].id, created.new_tasks[1].id);
    assert!(lifecycle.bound_task("%1").await.is_some());

    // The orphaned binding is retired on the next tick.
    let retry = expect_report(reconciler.tick().await);
    assert_eq!(retry.closed_tasks.len(), 1);
    assert_eq!(retry.closed_tasks[0].id, created.new_tasks[0].id);
    assert!(lifecycle.session_bindings().await.is_empty());

    assert_eq!(reconciler.tick().await, TickOutcome::Quiet);
    assert_eq!(store.load().unwrap().history.len(), 2);
}

#[tokio::test]
async fn reports_are_emitted_only_for_changes() {
    let probe = scripted(&[Some(&["%1"]), Some(&["%1"]), Some(&["%1", "%2"])]);
    let (tx, mut rx) = mpsc::channel(8);
    let reconciler = Reconciler::new(
        registry(probe),
        Arc::new(TaskLifecycle::new(MemoryStore::new())),
    )
    .with_report_sender(tx);

    for _ in 0..3 {
        reconciler.tick().await;
    }

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.all_sessions.len(), 1);
    assert_eq!(second.all_sessions.len(), 2);
    assert_eq!(second.new_tasks.len(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn switching_to_a_session_task_then_losing_the_session() {
    let probe = scripted(&[Some(&["%1", "%2"]), Some(&["%2"])]);
    let lifecycle = Arc::new(TaskLifecycle::new(MemoryStore::new()));
    let reconciler = Reconciler::new(registry(probe), Arc::clone(&lifecycle));

    expect_report(reconciler.tick().await);
    lifecycle.switch_current("%1").await.unwrap();
    lifecycle.update(65, "half way").await.unwrap();

    let report = expect_report(reconciler.tick().await);

    assert_eq!(report.closed_tasks[0].progress, 65);
    let state = lifecycle.status(None).await.unwrap();
    assert!(state.current_task.is_none());
    assert_eq!(state.history[0].status, TaskStatus::Stopped);
}
