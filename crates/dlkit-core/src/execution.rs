//! Single-task state machine (C8): QUEUED→PENDING→DOWNLOADING→terminal.
//!
//! `DownloadSource::resolve`/`download` are blocking calls (curl, or a
//! nested `librqbit` runtime for torrents) by design — the same synchronous
//! "block the worker thread" shape the transfer primitive already uses.
//! `Execution` is therefore a plain, non-`async` type; the coordinator runs
//! it on a blocking task and bridges back to the async `TaskStore` via the
//! ambient tokio runtime handle from inside the downloader's persist
//! callback.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DlkitConfig;
use crate::control::{Intent, JobControl};
use crate::error::EngineError;
use crate::host_policy::{choose_segment_count, HostPolicy};
use crate::limiter::TokenBucket;
use crate::model::{DownloadRequest, Progress, TaskEvent, TaskRecord, TaskState};
use crate::safe_resume::validate_resume;
use crate::segmenter::{self, Segment};
use crate::source::{DownloadContext, SourceRegistry};
use crate::storage::{temp_path, StorageWriter, StorageWriterBuilder};
use crate::store::TaskStore;

pub struct Execution<'a> {
    pub registry: &'a SourceRegistry,
    pub store: &'a TaskStore,
    pub job_control: &'a JobControl,
    pub host_policy: &'a HostPolicy,
    pub config: &'a DlkitConfig,
    pub events: &'a tokio::sync::broadcast::Sender<TaskEvent>,
    /// The engine-wide bucket (C2), owned by the coordinator and shared by
    /// every task's execution — never constructed here.
    pub global_limiter: &'a Arc<TokenBucket>,
}

impl Execution<'_> {
    fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }

    fn persist(&self, record: &TaskRecord) {
        let handle = tokio::runtime::Handle::current();
        let _ = handle.block_on(self.store.save(record));
    }

    fn set_state(&self, record: &mut TaskRecord, state: TaskState) {
        record.state = state;
        record.touch();
        self.persist(record);
        self.emit(TaskEvent::StateChanged { task_id: record.task_id.clone(), state });
    }

    fn fail(&self, record: &mut TaskRecord, err: EngineError) {
        record.error = Some(err.to_string());
        self.set_state(record, TaskState::Failed);
        self.emit(TaskEvent::Error { task_id: record.task_id.clone(), error: err.to_string() });
    }

    /// Resolve → plan → preallocate → run, from a clean slate.
    pub fn run_fresh(&self, mut record: TaskRecord) -> TaskRecord {
        let source = match self.registry.resolve_for(&record.request.url) {
            Ok(s) => s,
            Err(e) => {
                self.fail(&mut record, e);
                return record;
            }
        };

        self.set_state(&mut record, TaskState::Pending);

        let resolved = match source.resolve(&record.request) {
            Ok(r) => r,
            Err(e) => {
                self.fail(&mut record, e);
                return record;
            }
        };
        self.host_policy.observe_probe(&record.request.url, &crate::probe::HeadResult {
            content_length: if resolved.total_bytes >= 0 { Some(resolved.total_bytes as u64) } else { None },
            accept_ranges: resolved.supports_resume,
            etag: resolved.etag().map(str::to_string),
            last_modified: resolved.last_modified().map(str::to_string),
            content_disposition: None,
        });

        let connections = effective_connections(&record.request, &resolved, self.config, self.host_policy);
        let total_bytes = resolved.total_bytes;

        let file_name = resolved.suggested_file_name.clone().unwrap_or_else(|| record.task_id.clone());
        let dest_dir = record
            .request
            .destination
            .clone()
            .and_then(|d| if d.is_dir() { Some(d) } else { d.parent().map(|p| p.to_path_buf()) })
            .unwrap_or_else(std::env::temp_dir);
        let final_path = unique_path(&dest_dir, &file_name);
        let tmp_path = temp_path(&final_path);

        let storage = match StorageWriterBuilder::create(&tmp_path) {
            Ok(mut b) => {
                if total_bytes > 0 {
                    if let Err(e) = b.preallocate(total_bytes as u64) {
                        self.fail(&mut record, EngineError::Disk(e.to_string()));
                        return record;
                    }
                }
                b.build()
            }
            Err(e) => {
                self.fail(&mut record, EngineError::Disk(e.to_string()));
                return record;
            }
        };

        let segments = if total_bytes > 0 {
            segmenter::plan(total_bytes as u64, connections, resolved.supports_resume)
        } else {
            vec![crate::downloader::segment::unbounded_single_segment()]
        };

        record.total_bytes = total_bytes;
        record.output_path = Some(final_path.clone());
        record.segments = Some(segments.clone());
        record.source_type = Some(resolved.source_type.clone());
        record.source_resume_state = Some(source.build_resume_state(&resolved));
        self.persist(&record);

        self.set_state(&mut record, TaskState::Downloading);
        self.run_downloading(&mut record, &resolved, storage, segments, connections, final_path);
        record
    }

    /// Re-probe, validate identity against the persisted resume state, and
    /// continue from the segments already on disk.
    pub fn run_resume(&self, mut record: TaskRecord) -> TaskRecord {
        if !matches!(record.state, TaskState::Paused | TaskState::Failed) {
            return record;
        }
        let Some(persisted_resume_state) = record.source_resume_state.clone() else {
            self.fail(&mut record, EngineError::ValidationFailed("no resume state recorded".to_string()));
            return record;
        };
        let Some(segments) = record.segments.clone() else {
            self.fail(&mut record, EngineError::ValidationFailed("no segment plan recorded".to_string()));
            return record;
        };
        let Some(final_path) = record.output_path.clone() else {
            self.fail(&mut record, EngineError::ValidationFailed("no output path recorded".to_string()));
            return record;
        };

        let source = match self.registry.resolve_for(&record.request.url) {
            Ok(s) => s,
            Err(e) => {
                self.fail(&mut record, e);
                return record;
            }
        };

        let resolved = match source.resolve(&record.request) {
            Ok(r) => r,
            Err(e) => {
                self.fail(&mut record, e);
                return record;
            }
        };
        let fresh_resume_state = source.build_resume_state(&resolved);
        if let Err(e) = validate_resume(&persisted_resume_state, &resolved, &fresh_resume_state) {
            self.fail(&mut record, e);
            return record;
        }

        let tmp_path = temp_path(&final_path);
        let storage = match StorageWriter::open_existing(&tmp_path) {
            Ok(s) => s,
            Err(e) => {
                self.fail(&mut record, EngineError::Disk(e.to_string()));
                return record;
            }
        };

        let connections = effective_connections(&record.request, &resolved, self.config, self.host_policy);
        self.set_state(&mut record, TaskState::Downloading);
        self.run_downloading(&mut record, &resolved, storage, segments, connections, final_path);
        record
    }

    fn run_downloading(
        &self,
        record: &mut TaskRecord,
        resolved: &crate::model::ResolvedSource,
        storage: StorageWriter,
        mut segments: Vec<Segment>,
        connections: usize,
        final_path: std::path::PathBuf,
    ) {
        let source = match self.registry.resolve_for(&record.request.url) {
            Ok(s) => s,
            Err(e) => {
                self.fail(record, e);
                return;
            }
        };
        let per_task_limiter = Arc::new(record.request.speed_limit.new_limiter());
        let abort = self.job_control.register(&record.task_id, Arc::clone(&per_task_limiter));
        let global_limiter = Arc::clone(self.global_limiter);

        let retry_policy = crate::retry::RetryPolicy {
            max_attempts: self.config.retry.retry_count,
            base_delay: Duration::from_millis(self.config.retry.retry_delay_ms),
            max_delay: Duration::from_secs(60),
        };

        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            let task_id = record.task_id.clone();
            let url = record.request.url.clone();
            let events = self.events;
            let store = self.store;
            let on_progress: Box<dyn FnMut(u64, f64) + Send> = Box::new({
                let task_id = task_id.clone();
                let total_bytes = resolved.total_bytes;
                move |downloaded, bps| {
                    let _ = events.send(TaskEvent::Progress {
                        task_id: task_id.clone(),
                        progress: Progress { downloaded_bytes: downloaded, total_bytes, bytes_per_second: bps },
                    });
                }
            });
            let on_persist: Box<dyn FnMut(&[Segment]) + Send> = Box::new({
                let task_id = task_id.clone();
                let request = record.request.clone();
                let total_bytes = record.total_bytes;
                let source_type = record.source_type.clone();
                let source_resume_state = record.source_resume_state.clone();
                let output_path = record.output_path.clone();
                let created_at = record.created_at;
                move |segs: &[Segment]| {
                    let mut snapshot = TaskRecord::fresh(task_id.clone(), request.clone(), TaskState::Downloading);
                    snapshot.created_at = created_at;
                    snapshot.total_bytes = total_bytes;
                    snapshot.output_path = output_path.clone();
                    snapshot.source_type = source_type.clone();
                    snapshot.source_resume_state = source_resume_state.clone();
                    snapshot.segments = Some(segs.to_vec());
                    let handle = tokio::runtime::Handle::current();
                    let _ = handle.block_on(store.save(&snapshot));
                }
            });

            let ctx = DownloadContext {
                resolved,
                headers: url_headers(&record.request),
                storage: &storage,
                per_task_limiter: Arc::clone(&per_task_limiter),
                global_limiter: Arc::clone(&global_limiter),
                abort: Arc::clone(&abort),
                connections,
                segments: segments.clone(),
                on_progress,
                on_persist,
            };

            let outcome = source.download(ctx);
            let _ = url;
            match outcome {
                Ok(final_segments) => {
                    segments = final_segments;
                    break Ok(());
                }
                Err(EngineError::Canceled) => break Err(EngineError::Canceled),
                Err(e) if e.is_retryable() && attempt < retry_policy.max_attempts => {
                    let backoff = retry_policy.base_delay.saturating_mul(1 << attempt.saturating_sub(1).min(8)).min(retry_policy.max_delay);
                    let wait = match e.retry_after_secs() {
                        Some(secs) => backoff.max(Duration::from_secs(secs)),
                        None => backoff,
                    };
                    tracing::warn!(task_id = %record.task_id, attempt, error = %e, "retrying after {:?}", wait);
                    std::thread::sleep(wait);
                    continue;
                }
                Err(e) => break Err(e),
            }
        };

        let intent = self.job_control.intent(&record.task_id);
        self.job_control.unregister(&record.task_id);
        record.segments = Some(segments);

        match result {
            Ok(()) => {
                let _ = storage.sync();
                if let Err(e) = storage.finalize(&final_path) {
                    self.fail(record, EngineError::Disk(e.to_string()));
                    return;
                }
                record.output_path = Some(final_path);
                self.set_state(record, TaskState::Completed);
            }
            Err(EngineError::Canceled) => {
                // An unwind with no recorded intent (e.g. a process-wide
                // shutdown) is treated as pause, never as cancel: destructive
                // outcomes only ever follow an explicit cancel request.
                let state = if intent == Intent::Cancel { TaskState::Canceled } else { TaskState::Paused };
                self.set_state(record, state);
            }
            Err(e) => {
                self.fail(record, e);
            }
        }
    }
}

fn url_headers(request: &DownloadRequest) -> HashMap<String, String> {
    request.headers.clone()
}

fn effective_connections(
    request: &DownloadRequest,
    resolved: &crate::model::ResolvedSource,
    config: &DlkitConfig,
    host_policy: &HostPolicy,
) -> usize {
    if request.connections > 0 {
        return request.connections.min(resolved.max_segments.max(1));
    }
    if !resolved.supports_resume {
        return 1;
    }
    choose_segment_count(resolved.total_bytes.max(0) as u64, config.min_segments, config.max_segments, &request.url, host_policy)
        .min(resolved.max_segments.max(1))
}

fn unique_path(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = std::path::Path::new(name).file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| name.to_string());
    let ext = std::path::Path::new(name).extension().map(|e| e.to_string_lossy().to_string());
    for n in 1..10_000 {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_path_appends_numeric_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.iso"), b"x").unwrap();
        let p = unique_path(dir.path(), "a.iso");
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "a (1).iso");
    }

    #[test]
    fn unique_path_is_unchanged_with_no_collision() {
        let dir = tempfile::tempdir().unwrap();
        let p = unique_path(dir.path(), "a.iso");
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "a.iso");
    }
}
