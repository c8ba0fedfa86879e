//! Task lifecycle orchestration (C9 Coordinator).
//!
//! Bridges the admission [`Queue`] to the blocking [`Execution`] pipeline:
//! every state transition a caller asks for (start, resume, pause, cancel,
//! live property changes) either flips a flag on a running task through
//! [`JobControl`] or spawns a fresh blocking execution, and every execution
//! that finishes reports back to the queue so the next waiter gets its turn.
//! Operations are idempotent — an invalid request (e.g. pausing a task that
//! isn't running) logs and returns rather than erroring, matching the "never
//! throws on invalid transitions" rule for task operations.

use std::sync::Arc;

use crate::config::DlkitConfig;
use crate::control::JobControl;
use crate::execution::Execution;
use crate::host_policy::HostPolicy;
use crate::limiter::TokenBucket;
use crate::model::{DownloadRequest, Priority, TaskEvent, TaskId, TaskRecord, TaskState};
use crate::queue::{Admission, Queue};
use crate::source::SourceRegistry;
use crate::storage::temp_path;
use crate::store::TaskStore;

/// Owns every collaborator needed to run tasks end to end. Cheap to clone
/// (everything behind it is already `Arc`); share one instance across the
/// REST/CLI callers and the gate's readiness poller.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SourceRegistry,
    store: TaskStore,
    job_control: JobControl,
    host_policy: HostPolicy,
    config: DlkitConfig,
    queue: Queue,
    events: tokio::sync::broadcast::Sender<TaskEvent>,
    /// The one instance whose token pool is shared by every task, wired at
    /// construction from `config.global_speed_limit` (C2). Every dispatch
    /// hands out a fresh clone of this `Arc`, never a new bucket.
    global_limiter: Arc<TokenBucket>,
}

impl Coordinator {
    pub fn new(
        registry: SourceRegistry,
        store: TaskStore,
        job_control: JobControl,
        host_policy: HostPolicy,
        config: DlkitConfig,
        queue: Queue,
        events: tokio::sync::broadcast::Sender<TaskEvent>,
    ) -> Self {
        let global_limiter = Arc::new(config.global_speed_limit.new_limiter());
        Self {
            inner: Arc::new(Inner { registry, store, job_control, host_policy, config, queue, events, global_limiter }),
        }
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Submits a brand-new task, already past any schedule/condition gating:
    /// persists it QUEUED and offers it to the admission queue.
    pub async fn submit(&self, task_id: TaskId, request: DownloadRequest) -> TaskRecord {
        let record = TaskRecord::fresh(task_id.clone(), request.clone(), TaskState::Queued);
        let _ = self.inner.store.save(&record).await;
        let _ = self.inner.events.send(TaskEvent::TaskAdded { task_id: task_id.clone(), state: TaskState::Queued });

        let host = record.host();
        let admission = self.inner.queue.enqueue(task_id, host, request.priority);
        self.act_on_admission(admission, false).await;
        record
    }

    /// Re-admits a task sitting in PAUSED or FAILED (user-initiated resume,
    /// or the gate handing back a task whose conditions are now met).
    pub async fn resume(&self, task_id: TaskId) {
        let Some(record) = self.load(&task_id).await else { return };
        if !matches!(record.state, TaskState::Paused | TaskState::Failed) {
            tracing::warn!(%task_id, state = ?record.state, "resume requested in a non-resumable state, ignoring");
            return;
        }
        let host = record.host();
        let admission = self.inner.queue.enqueue(task_id, host, record.request.priority);
        // The queue only knows whether it had to preempt something to make
        // room; it has no notion of "this caller explicitly asked to
        // resume". Force the resume path regardless of how the slot opened.
        self.act_on_admission(admission, true).await;
    }

    /// Requests a resumable pause. No-op for a task that isn't currently
    /// running (queued/gated tasks should be pulled via
    /// `Queue::remove_waiting`/`Gate::remove` instead, since they never
    /// reached `JobControl`).
    pub fn pause(&self, task_id: &TaskId) {
        if !self.inner.job_control.is_running(task_id) {
            tracing::warn!(%task_id, "pause requested for a task that isn't running, ignoring");
            return;
        }
        self.inner.job_control.request_pause(task_id);
    }

    /// Requests cancellation. `delete_output` removes whatever bytes have
    /// already landed on disk once the execution unwinds — the caller's
    /// explicit opt-in, never the default (4.8 Open Question: cancellation
    /// never deletes files unless asked).
    pub async fn cancel(&self, task_id: TaskId, delete_output: bool) {
        if self.inner.job_control.is_running(&task_id) {
            self.inner.job_control.request_cancel(&task_id);
            if delete_output {
                self.delete_output_when_settled(task_id).await;
            }
            return;
        }
        // Not running: remove from whichever waiting structure holds it and
        // mark it canceled outright.
        self.inner.queue.remove_waiting(&task_id);
        if let Some(mut record) = self.load(&task_id).await {
            record.state = TaskState::Canceled;
            record.touch();
            let _ = self.inner.store.save(&record).await;
            let _ = self.inner.events.send(TaskEvent::StateChanged { task_id: task_id.clone(), state: TaskState::Canceled });
            if delete_output {
                self.remove_temp_file(&record);
            }
        }
    }

    async fn delete_output_when_settled(&self, task_id: TaskId) {
        // The execution thread is still unwinding; poll briefly rather than
        // blocking the async caller, since the transfer loop only checks the
        // abort flag between chunks.
        for _ in 0..100 {
            if !self.inner.job_control.is_running(&task_id) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        if let Some(record) = self.load(&task_id).await {
            self.remove_temp_file(&record);
        }
    }

    fn remove_temp_file(&self, record: &TaskRecord) {
        if let Some(output_path) = &record.output_path {
            if let Ok(writer) = crate::storage::StorageWriter::open_existing(&temp_path(output_path)) {
                let _ = writer.delete();
            }
        }
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.inner.job_control.is_running(task_id)
    }

    /// Changes the live speed limit of a running task; no restart required.
    /// No-op if the task isn't currently running — the new limit takes
    /// effect from its next `start`/`resume`.
    pub fn set_task_speed_limit(&self, task_id: &TaskId, rate_per_sec: Option<u64>) -> bool {
        self.inner.job_control.set_task_speed_limit(task_id, rate_per_sec)
    }

    /// Changes the live global speed limit (§6 `globalSpeedLimit`), shared
    /// by every task currently running and every task started afterward.
    /// `None` lifts the cap entirely.
    pub fn set_global_speed_limit(&self, rate_per_sec: Option<u64>) {
        self.inner.global_limiter.set_rate(rate_per_sec.unwrap_or(0));
    }

    /// Reprioritizes a waiting task, possibly promoting it immediately. No
    /// effect on a task that is already running.
    pub async fn set_priority(&self, task_id: &TaskId, priority: Priority) {
        if let Some(admission) = self.inner.queue.set_priority(task_id, priority) {
            self.act_on_admission(admission, false).await;
        }
    }

    async fn load(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.inner.store.load(task_id).await.ok().flatten()
    }

    /// `resume_hint` forces the resume path even when the queue's own
    /// `preempted` flag is false — set by callers (like explicit user
    /// resume) who know this is a continuation, not a fresh start, when the
    /// queue itself can't tell the difference.
    async fn act_on_admission(&self, admission: Admission, resume_hint: bool) {
        match admission {
            Admission::Start { task_id, preempted } => self.dispatch(task_id, preempted || resume_hint).await,
            Admission::Preempt { victim, start } => {
                self.inner.job_control.request_pause(&victim);
                if let Some(mut record) = self.load(&victim).await {
                    record.preempted = true;
                    record.touch();
                    let _ = self.inner.store.save(&record).await;
                }
                self.dispatch(start, resume_hint).await;
            }
            Admission::Wait => {}
        }
    }

    /// Spawns the blocking execution for a task the queue just admitted.
    async fn dispatch(&self, task_id: TaskId, resume: bool) {
        let Some(record) = self.load(&task_id).await else {
            self.on_finished(task_id).await;
            return;
        };
        let coordinator = self.clone();
        tokio::task::spawn_blocking(move || {
            let inner = &coordinator.inner;
            let exec = Execution {
                registry: &inner.registry,
                store: &inner.store,
                job_control: &inner.job_control,
                host_policy: &inner.host_policy,
                config: &inner.config,
                events: &inner.events,
                global_limiter: &inner.global_limiter,
            };
            let finished = if resume { exec.run_resume(record) } else { exec.run_fresh(record) };
            tokio::runtime::Handle::current().block_on(coordinator.on_finished(finished.task_id));
        });
    }

    /// Reports a finished execution (any terminal state) to the queue and
    /// dispatches whatever it promotes next.
    async fn on_finished(&self, task_id: TaskId) {
        self.inner.job_control.unregister(&task_id);
        if let Some(admission) = self.inner.queue.on_task_finished(&task_id) {
            Box::pin(self.act_on_admission(admission, false)).await;
        }
    }
}
