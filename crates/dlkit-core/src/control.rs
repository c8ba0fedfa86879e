//! Abort-token registry backing pause/cancel (grounds C9 Coordinator).
//!
//! Every running task is registered with an abort token before its transfer
//! loop starts. `Coordinator::pause`/`cancel` flip the token; the transfer
//! loop polls it between chunks and unwinds, persisting whatever progress it
//! made so far. The token alone can't tell `Execution` which terminal state
//! to land in, so a separate intent flag travels alongside it: pause unwinds
//! to PAUSED, cancel unwinds to CANCELED.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::limiter::TokenBucket;
use crate::model::TaskId;

/// Error surfaced by a transfer loop that observed its abort token set.
#[derive(Debug)]
pub struct TaskAborted;

impl std::fmt::Display for TaskAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task aborted by user")
    }
}

impl std::error::Error for TaskAborted {}

/// What a fired abort token means for the terminal state `Execution` should
/// land in. `None` is the safe default for an abort nobody explicitly asked
/// for (e.g. a process-wide shutdown) — resumable, not destructive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    None,
    Pause,
    Cancel,
}

const INTENT_NONE: u8 = 0;
const INTENT_PAUSE: u8 = 1;
const INTENT_CANCEL: u8 = 2;

struct RunningTask {
    abort: Arc<AtomicBool>,
    intent: Arc<AtomicU8>,
    speed_limiter: Arc<TokenBucket>,
}

/// Shared registry of everything the coordinator needs to reach into a
/// running task from outside its execution thread: the abort token and a
/// handle to its live per-task speed limiter.
#[derive(Default)]
pub struct JobControl {
    tasks: RwLock<HashMap<TaskId, RunningTask>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task; returns the abort token to pass into its
    /// transfer loop. The token starts false and flips true on pause/cancel.
    pub fn register(&self, task_id: &TaskId, speed_limiter: Arc<TokenBucket>) -> Arc<AtomicBool> {
        let abort = Arc::new(AtomicBool::new(false));
        let intent = Arc::new(AtomicU8::new(INTENT_NONE));
        self.tasks
            .write()
            .unwrap()
            .insert(task_id.clone(), RunningTask { abort: Arc::clone(&abort), intent, speed_limiter });
        abort
    }

    /// Unregister a task (call when it finishes, success or failure).
    pub fn unregister(&self, task_id: &TaskId) {
        self.tasks.write().unwrap().remove(task_id);
    }

    /// Requests a resumable pause: the transfer loop unwinds and `Execution`
    /// lands the task in PAUSED. A no-op for tasks that aren't running,
    /// matching the "never throws on invalid transitions" rule for task
    /// operations.
    pub fn request_pause(&self, task_id: &TaskId) {
        if let Some(task) = self.tasks.read().unwrap().get(task_id) {
            task.intent.store(INTENT_PAUSE, Ordering::Relaxed);
            task.abort.store(true, Ordering::Relaxed);
        }
    }

    /// Requests cancellation: the transfer loop unwinds and `Execution`
    /// lands the task in CANCELED. A no-op for tasks that aren't running.
    pub fn request_cancel(&self, task_id: &TaskId) {
        if let Some(task) = self.tasks.read().unwrap().get(task_id) {
            task.intent.store(INTENT_CANCEL, Ordering::Relaxed);
            task.abort.store(true, Ordering::Relaxed);
        }
    }

    /// Reads back which terminal state an observed `EngineError::Canceled`
    /// should resolve to. Call before `unregister` removes the entry.
    pub fn intent(&self, task_id: &TaskId) -> Intent {
        match self.tasks.read().unwrap().get(task_id) {
            Some(task) => match task.intent.load(Ordering::Relaxed) {
                INTENT_PAUSE => Intent::Pause,
                INTENT_CANCEL => Intent::Cancel,
                _ => Intent::None,
            },
            None => Intent::None,
        }
    }

    /// Changes the live per-task speed limit. A no-op if the task isn't
    /// currently running.
    pub fn set_task_speed_limit(&self, task_id: &TaskId, rate_per_sec: Option<u64>) -> bool {
        match self.tasks.read().unwrap().get(task_id) {
            Some(task) => {
                task.speed_limiter.set_rate(rate_per_sec.unwrap_or(0));
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.tasks.read().unwrap().contains_key(task_id)
    }
}

/// Default path for the control socket (same XDG state dir as the task DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("dlkit")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_pause_flips_token_and_records_intent() {
        let jc = JobControl::new();
        let id = "t1".to_string();
        let token = jc.register(&id, Arc::new(TokenBucket::unlimited()));
        assert!(!token.load(Ordering::Relaxed));
        jc.request_pause(&id);
        assert!(token.load(Ordering::Relaxed));
        assert_eq!(jc.intent(&id), Intent::Pause);
    }

    #[test]
    fn register_then_cancel_records_cancel_intent() {
        let jc = JobControl::new();
        let id = "t1".to_string();
        jc.register(&id, Arc::new(TokenBucket::unlimited()));
        jc.request_cancel(&id);
        assert_eq!(jc.intent(&id), Intent::Cancel);
    }

    #[test]
    fn unregistered_task_has_no_intent() {
        let jc = JobControl::new();
        assert_eq!(jc.intent(&"missing".to_string()), Intent::None);
    }

    #[test]
    fn abort_unknown_task_is_a_no_op() {
        let jc = JobControl::new();
        jc.request_pause(&"missing".to_string());
        jc.request_cancel(&"missing".to_string());
    }

    #[test]
    fn unregister_removes_task() {
        let jc = JobControl::new();
        let id = "t1".to_string();
        jc.register(&id, Arc::new(TokenBucket::unlimited()));
        assert!(jc.is_running(&id));
        jc.unregister(&id);
        assert!(!jc.is_running(&id));
    }

    #[test]
    fn set_speed_limit_on_running_task_updates_live_bucket() {
        let jc = JobControl::new();
        let id = "t1".to_string();
        jc.register(&id, Arc::new(TokenBucket::unlimited()));
        assert!(jc.set_task_speed_limit(&id, Some(1000)));
    }

    #[test]
    fn set_speed_limit_on_unknown_task_returns_false() {
        let jc = JobControl::new();
        assert!(!jc.set_task_speed_limit(&"missing".to_string(), Some(1000)));
    }
}
