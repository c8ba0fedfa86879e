//! User-facing task handle and lifecycle façade (C12 Task).
//!
//! A [`Task`] is a cheap, cloneable handle carrying a
//! `watch::Receiver<DownloadState>` so callers observe state without
//! polling the store. [`TaskManager`] is what actually owns the
//! collaborators (gate, coordinator, store) and forwards `TaskEvent`s onto
//! each task's watch channel. Every mutating operation here is a thin,
//! idempotent wrapper: it inspects current state first and logs-and-no-ops
//! on an incompatible transition rather than surfacing an error a caller
//! would have to special-case.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::coordinator::Coordinator;
use crate::gate::Gate;
use crate::limiter::SpeedLimit;
use crate::model::{
    now_epoch_secs, DownloadCondition, DownloadRequest, DownloadSchedule, DownloadState, Priority, TaskEvent, TaskId,
    TaskRecord, TaskState,
};
use crate::segmenter;
use crate::store::TaskStore;

fn schedule_epoch(schedule: &Option<DownloadSchedule>) -> Option<u64> {
    match schedule {
        Some(DownloadSchedule::At { epoch_secs }) => Some(*epoch_secs),
        _ => None,
    }
}

/// Observable, cloneable handle to one submitted download.
#[derive(Clone)]
pub struct Task {
    task_id: TaskId,
    state_rx: watch::Receiver<DownloadState>,
    manager: TaskManager,
}

impl Task {
    pub fn id(&self) -> &TaskId {
        &self.task_id
    }

    /// Current state, read without blocking.
    pub fn state(&self) -> DownloadState {
        self.state_rx.borrow().clone()
    }

    /// A receiver callers can `.changed().await` on for push updates.
    pub fn watch(&self) -> watch::Receiver<DownloadState> {
        self.state_rx.clone()
    }

    pub async fn pause(&self) {
        self.manager.pause(&self.task_id).await;
    }

    pub async fn resume(&self, destination: Option<PathBuf>) {
        self.manager.resume(&self.task_id, destination).await;
    }

    pub async fn cancel(&self, delete_output: bool) {
        self.manager.cancel(&self.task_id, delete_output).await;
    }

    pub fn set_speed_limit(&self, limit: SpeedLimit) {
        self.manager.set_speed_limit(&self.task_id, limit);
    }

    pub async fn set_priority(&self, priority: Priority) {
        self.manager.set_priority(&self.task_id, priority).await;
    }

    pub async fn reschedule(&self, schedule: Option<DownloadSchedule>, conditions: Vec<DownloadCondition>) {
        self.manager.reschedule(&self.task_id, schedule, conditions).await;
    }

    pub async fn remove(&self, delete_output: bool) {
        self.manager.remove(&self.task_id, delete_output).await;
    }
}

struct ManagerInner {
    coordinator: Coordinator,
    gate: Gate,
    store: TaskStore,
    watchers: RwLock<HashMap<TaskId, watch::Sender<DownloadState>>>,
}

/// Owns the gate, coordinator, and store; the thing a CLI or transport
/// layer constructs once and shares.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn new(coordinator: Coordinator, gate: Gate, store: TaskStore) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner {
                coordinator,
                gate,
                store,
                watchers: RwLock::new(HashMap::new()),
            }),
        };
        manager.spawn_event_forwarder();
        manager
    }

    fn spawn_event_forwarder(&self) {
        let manager = self.clone();
        let mut events = manager.inner.coordinator.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.apply_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn apply_event(&self, event: TaskEvent) {
        match event {
            TaskEvent::TaskRemoved { task_id } => {
                self.inner.watchers.write().unwrap().remove(&task_id);
            }
            TaskEvent::TaskAdded { task_id, .. } | TaskEvent::StateChanged { task_id, .. } => {
                if let Some(record) = self.inner.store.load(&task_id).await.ok().flatten() {
                    self.push(&task_id, DownloadState::from_record(&record));
                }
            }
            TaskEvent::Progress { task_id, progress } => {
                self.push(&task_id, DownloadState::Downloading { progress });
            }
            TaskEvent::Error { task_id, error } => {
                self.push(&task_id, DownloadState::Failed { error });
            }
        }
    }

    fn push(&self, task_id: &TaskId, state: DownloadState) {
        if let Some(tx) = self.inner.watchers.read().unwrap().get(task_id) {
            let _ = tx.send(state);
        }
    }

    fn watcher_for(&self, task_id: &TaskId, initial: DownloadState) -> watch::Receiver<DownloadState> {
        let mut watchers = self.inner.watchers.write().unwrap();
        watchers
            .entry(task_id.clone())
            .or_insert_with(|| watch::channel(initial).0)
            .subscribe()
    }

    /// Submits a new download request. Runs it through the schedule/
    /// condition gate first; a task that isn't immediately due is persisted
    /// SCHEDULED and handed to the coordinator once `poll_gate` reports it
    /// ready.
    pub async fn submit(&self, task_id: TaskId, request: DownloadRequest) -> Task {
        let now = now_epoch_secs();
        let schedule = request.schedule.clone();
        let conditions = request.conditions.clone();
        let ready = self.inner.gate.register(task_id.clone(), schedule.clone(), conditions, now);

        let initial = if ready {
            DownloadState::Queued
        } else {
            DownloadState::Scheduled { when: schedule_epoch(&schedule) }
        };
        let state_rx = self.watcher_for(&task_id, initial);

        if ready {
            self.inner.coordinator.submit(task_id.clone(), request).await;
        } else {
            let record = TaskRecord::fresh(task_id.clone(), request, TaskState::Scheduled);
            let _ = self.inner.store.save(&record).await;
        }

        Task { task_id, state_rx, manager: self.clone() }
    }

    /// Rehydrates watchers and in-flight work after a process restart. A
    /// task the store still has as QUEUED/PENDING/DOWNLOADING was orphaned
    /// by whatever process owned it last (nothing currently holds its
    /// abort token), so it's marked PAUSED and re-admitted through the
    /// resume path rather than assumed still running. PAUSED/FAILED/
    /// SCHEDULED tasks are left exactly as they were — restoring doesn't
    /// imply restarting them.
    pub async fn restore(&self) {
        let records = match self.inner.store.load_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("failed to load tasks for restore: {e:#}");
                return;
            }
        };
        for mut record in records {
            if record.state.is_terminal() {
                continue;
            }
            self.watcher_for(&record.task_id, DownloadState::from_record(&record));
            match record.state {
                TaskState::Scheduled => {
                    let now = now_epoch_secs();
                    if self.inner.gate.reschedule(
                        record.task_id.clone(),
                        record.request.schedule.clone(),
                        record.request.conditions.clone(),
                        now,
                    ) {
                        self.push(&record.task_id, DownloadState::Queued);
                        self.inner.coordinator.submit(record.task_id, record.request).await;
                    }
                }
                TaskState::Paused | TaskState::Failed => {}
                TaskState::Queued | TaskState::Pending | TaskState::Downloading => {
                    record.state = TaskState::Paused;
                    record.touch();
                    let _ = self.inner.store.save(&record).await;
                    self.push(&record.task_id, DownloadState::Paused);
                    self.inner.coordinator.resume(record.task_id).await;
                }
                TaskState::Completed | TaskState::Canceled => unreachable!("filtered by is_terminal"),
            }
        }
    }

    /// Re-evaluates gated tasks against the current clock/conditions and
    /// hands any that are now due to the coordinator. Call periodically.
    pub async fn poll_gate(&self) {
        let now = now_epoch_secs();
        for task_id in self.inner.gate.poll_ready(now) {
            if let Some(record) = self.inner.store.load(&task_id).await.ok().flatten() {
                self.push(&task_id, DownloadState::Queued);
                self.inner.coordinator.submit(task_id, record.request).await;
            }
        }
    }

    pub async fn pause(&self, task_id: &TaskId) {
        self.inner.coordinator.pause(task_id);
    }

    pub async fn resume(&self, task_id: &TaskId, destination: Option<PathBuf>) {
        if let Some(dest) = destination {
            if let Some(mut record) = self.inner.store.load(task_id).await.ok().flatten() {
                record.request.destination = Some(dest);
                record.touch();
                let _ = self.inner.store.save(&record).await;
            }
        }
        self.inner.coordinator.resume(task_id.clone()).await;
    }

    pub async fn cancel(&self, task_id: &TaskId, delete_output: bool) {
        self.inner.gate.remove(task_id);
        self.inner.coordinator.cancel(task_id.clone(), delete_output).await;
    }

    pub fn set_speed_limit(&self, task_id: &TaskId, limit: SpeedLimit) {
        self.inner.coordinator.set_task_speed_limit(task_id, limit.bytes_per_sec());
    }

    pub async fn set_priority(&self, task_id: &TaskId, priority: Priority) {
        self.inner.coordinator.set_priority(task_id, priority).await;
    }

    /// Live connection-count changes on a running task drive a
    /// pause -> resegment -> persist -> resume round trip against the same
    /// execution the coordinator already knows how to restart: request a
    /// pause, wait for the in-flight execution to unwind (it only checks the
    /// abort flag between chunks, so this settles quickly), recompute the
    /// segment plan around whatever bytes already landed via
    /// `segmenter::resegment`, persist it, then resume exactly as any other
    /// paused task would be. A non-running task just gets its stored request
    /// updated so the new value takes effect on its next start.
    pub async fn set_connections(&self, task_id: &TaskId, connections: usize) {
        if self.inner.coordinator.is_running(task_id) {
            self.inner.coordinator.pause(task_id);
            for _ in 0..100 {
                if !self.inner.coordinator.is_running(task_id) {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            if let Some(mut record) = self.inner.store.load(task_id).await.ok().flatten() {
                record.request.connections = connections;
                if let Some(segments) = record.segments.take() {
                    record.segments = Some(segmenter::resegment(&segments, connections.max(1)));
                }
                record.touch();
                let _ = self.inner.store.save(&record).await;
            }
            self.inner.coordinator.resume(task_id.clone()).await;
            return;
        }
        if let Some(mut record) = self.inner.store.load(task_id).await.ok().flatten() {
            record.request.connections = connections;
            record.touch();
            let _ = self.inner.store.save(&record).await;
        }
    }

    /// Changes the live global speed limit (shared by every task); `None`
    /// lifts the cap. Takes effect immediately for whatever is running.
    pub fn set_global_speed_limit(&self, rate_per_sec: Option<u64>) {
        self.inner.coordinator.set_global_speed_limit(rate_per_sec);
    }

    pub async fn reschedule(&self, task_id: &TaskId, schedule: Option<DownloadSchedule>, conditions: Vec<DownloadCondition>) {
        let now = now_epoch_secs();
        let ready = self.inner.gate.reschedule(task_id.clone(), schedule.clone(), conditions.clone(), now);
        if let Some(mut record) = self.inner.store.load(task_id).await.ok().flatten() {
            record.request.schedule = schedule.clone();
            record.request.conditions = conditions;
            record.touch();
            let _ = self.inner.store.save(&record).await;
            if ready {
                self.push(task_id, DownloadState::Queued);
                self.inner.coordinator.submit(task_id.clone(), record.request).await;
            } else {
                self.push(task_id, DownloadState::Scheduled { when: schedule_epoch(&schedule) });
            }
        }
    }

    pub async fn remove(&self, task_id: &TaskId, delete_output: bool) {
        self.inner.gate.remove(task_id);
        self.inner.coordinator.cancel(task_id.clone(), delete_output).await;
        let _ = self.inner.store.remove(task_id).await;
        self.inner.watchers.write().unwrap().remove(task_id);
    }

    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        let watchers = self.inner.watchers.read().unwrap();
        watchers.get(task_id).map(|tx| Task {
            task_id: task_id.clone(),
            state_rx: tx.subscribe(),
            manager: self.clone(),
        })
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.inner.watchers.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DlkitConfig;
    use crate::control::JobControl;
    use crate::host_policy::HostPolicy;
    use crate::queue::Queue;
    use crate::source::SourceRegistry;

    async fn test_manager() -> TaskManager {
        let store = TaskStore::open_in_memory().await.unwrap();
        let (tx, _rx) = tokio::sync::broadcast::channel(64);
        let coordinator = Coordinator::new(
            SourceRegistry::with_defaults(),
            store.clone(),
            JobControl::new(),
            HostPolicy::new(),
            DlkitConfig::default(),
            Queue::new(4, 0),
            tx,
        );
        TaskManager::new(coordinator, Gate::with_default_conditions(), store)
    }

    #[tokio::test]
    async fn submitting_a_due_task_reaches_queued_state() {
        let manager = test_manager().await;
        let request = DownloadRequest::new("https://example.invalid/file.bin");
        let task = manager.submit("t1".into(), request).await;
        assert!(matches!(task.state(), DownloadState::Queued));
    }

    #[tokio::test]
    async fn a_future_schedule_holds_the_task_as_scheduled() {
        let manager = test_manager().await;
        let mut request = DownloadRequest::new("https://example.invalid/file.bin");
        request.schedule = Some(DownloadSchedule::At { epoch_secs: now_epoch_secs() + 3600 });
        let task = manager.submit("t1".into(), request).await;
        assert!(matches!(task.state(), DownloadState::Scheduled { .. }));
    }

    #[tokio::test]
    async fn removing_a_task_drops_its_watcher() {
        let manager = test_manager().await;
        let request = DownloadRequest::new("https://example.invalid/file.bin");
        manager.submit("t1".into(), request).await;
        manager.remove(&"t1".to_string(), false).await;
        assert!(manager.task(&"t1".to_string()).is_none());
    }

    #[tokio::test]
    async fn restore_recovers_a_paused_task_as_a_watched_but_idle_task() {
        let manager = test_manager().await;
        let record = TaskRecord::fresh(
            "orphan".to_string(),
            DownloadRequest::new("https://example.invalid/file.bin"),
            TaskState::Paused,
        );
        manager.inner.store.save(&record).await.unwrap();

        manager.restore().await;

        let task = manager.task(&"orphan".to_string()).expect("watcher restored");
        assert!(matches!(task.state(), DownloadState::Paused));
    }

    #[tokio::test]
    async fn restore_skips_terminal_tasks() {
        let manager = test_manager().await;
        let record = TaskRecord::fresh(
            "done".to_string(),
            DownloadRequest::new("https://example.invalid/file.bin"),
            TaskState::Completed,
        );
        manager.inner.store.save(&record).await.unwrap();

        manager.restore().await;

        assert!(manager.task(&"done".to_string()).is_none());
    }
}
