//! Core data model shared across the engine: requests, resolved sources,
//! task records, and the observable state/progress types derived from them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::limiter::SpeedLimit;
use crate::segmenter::Segment;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    Single,
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadCondition {
    WifiOnly,
    Unmetered,
    Charging,
}

/// A point-in-time trigger or a named local recurrence (e.g. "next Wed 02:00").
/// Parsing/evaluating recurrences against the platform clock is the
/// scheduler's job; this type is just the persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadSchedule {
    At { epoch_secs: u64 },
    Recurring { spec: String },
}

/// Immutable once created; the engine never mutates a `DownloadRequest` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: Option<PathBuf>,
    /// 0 = use the configured default segment count.
    pub connections: usize,
    pub headers: HashMap<String, String>,
    pub priority: Priority,
    pub speed_limit: SpeedLimit,
    pub selected_file_ids: Vec<String>,
    pub schedule: Option<DownloadSchedule>,
    pub conditions: Vec<DownloadCondition>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: None,
            connections: 0,
            headers: HashMap::new(),
            priority: Priority::Normal,
            speed_limit: SpeedLimit::Unlimited,
            selected_file_ids: Vec::new(),
            schedule: None,
            conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub metadata: HashMap<String, String>,
}

/// The outcome of `DownloadSource::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSource {
    pub url: String,
    pub source_type: String,
    /// -1 when the size is unknown (e.g. chunked transfer encoding).
    pub total_bytes: i64,
    pub supports_resume: bool,
    pub suggested_file_name: Option<String>,
    pub max_segments: usize,
    pub metadata: HashMap<String, String>,
    pub files: Vec<SourceFile>,
    pub selection_mode: SelectionMode,
}

impl ResolvedSource {
    pub fn etag(&self) -> Option<&str> {
        self.metadata.get("etag").map(String::as_str)
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.metadata.get("last_modified").map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Scheduled,
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    pub fn is_restorable(self) -> bool {
        !self.is_terminal()
    }
}

/// Persisted record. Owned exclusively by the execution pipeline; mutated
/// only through `TaskStore::save` via the atomic saver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub request: DownloadRequest,
    pub output_path: Option<PathBuf>,
    pub state: TaskState,
    pub total_bytes: i64,
    pub error: Option<String>,
    pub segments: Option<Vec<Segment>>,
    pub source_type: Option<String>,
    /// Opaque per-source blob (JSON) used to validate resume identity.
    pub source_resume_state: Option<serde_json::Value>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Set by the queue when this task preempted another and should resume
    /// (rather than start fresh) once admitted again.
    pub preempted: bool,
}

impl TaskRecord {
    pub fn fresh(task_id: TaskId, request: DownloadRequest, state: TaskState) -> Self {
        let now = now_epoch_secs();
        Self {
            task_id,
            request,
            output_path: None,
            state,
            total_bytes: -1,
            error: None,
            segments: None,
            source_type: None,
            source_resume_state: None,
            created_at: now,
            updated_at: now,
            preempted: false,
        }
    }

    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.request.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }

    pub fn touch(&mut self) {
        self.updated_at = now_epoch_secs();
    }
}

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    pub downloaded_bytes: u64,
    pub total_bytes: i64,
    pub bytes_per_second: f64,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.downloaded_bytes as f64 / self.total_bytes as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Observable, derived view of a `TaskRecord`. `Completed | Failed | Canceled`
/// are terminal; `Downloading | Pending` are "active".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DownloadState {
    Idle,
    Scheduled { when: Option<u64> },
    Queued,
    Pending,
    Downloading { progress: Progress },
    Paused,
    Completed { path: PathBuf },
    Failed { error: String },
    Canceled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed { .. } | DownloadState::Failed { .. } | DownloadState::Canceled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, DownloadState::Downloading { .. } | DownloadState::Pending)
    }

    pub fn from_record(record: &TaskRecord) -> Self {
        match record.state {
            TaskState::Queued => DownloadState::Queued,
            TaskState::Scheduled => DownloadState::Scheduled { when: None },
            TaskState::Pending => DownloadState::Pending,
            TaskState::Downloading => DownloadState::Downloading {
                progress: Progress {
                    downloaded_bytes: record
                        .segments
                        .as_ref()
                        .map(|segs| segs.iter().map(|s| s.downloaded_bytes).sum())
                        .unwrap_or(0),
                    total_bytes: record.total_bytes,
                    bytes_per_second: 0.0,
                },
            },
            TaskState::Paused => DownloadState::Paused,
            TaskState::Completed => DownloadState::Completed {
                path: record.output_path.clone().unwrap_or_default(),
            },
            TaskState::Failed => DownloadState::Failed {
                error: record.error.clone().unwrap_or_default(),
            },
            TaskState::Canceled => DownloadState::Canceled,
        }
    }
}

/// Serialisable event emitted on the engine's broadcast channel for a future
/// REST/SSE transport to subscribe to. Wiring an actual transport is out of
/// scope; the shape and emission points are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskAdded { task_id: TaskId, state: TaskState },
    TaskRemoved { task_id: TaskId },
    StateChanged { task_id: TaskId, state: TaskState },
    Progress { task_id: TaskId, progress: Progress },
    Error { task_id: TaskId, error: String },
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_low_to_urgent() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn task_state_terminal_classification() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::Downloading.is_terminal());
        assert!(TaskState::Paused.is_restorable());
    }

    #[test]
    fn fresh_record_has_matching_created_and_updated() {
        let req = DownloadRequest::new("https://example.com/f.bin");
        let rec = TaskRecord::fresh("t1".into(), req, TaskState::Queued);
        assert_eq!(rec.created_at, rec.updated_at);
        assert_eq!(rec.total_bytes, -1);
    }

    #[test]
    fn host_extraction_strips_scheme_and_port() {
        let req = DownloadRequest::new("https://example.com:8443/file.bin");
        let rec = TaskRecord::fresh("t1".into(), req, TaskState::Queued);
        assert_eq!(rec.host().as_deref(), Some("example.com"));
    }
}
