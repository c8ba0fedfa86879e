//! Concurrent segmented downloader (C7 SegmentedDownloader).
//!
//! Drives a bounded pool of worker threads over a shared queue of pending
//! segment indices, each invoking a source-supplied transfer operation and
//! reporting completions back over an `mpsc` channel to an aggregator loop —
//! the same shared-queue/fixed-thread-pool/channel shape the single-source
//! engine already used for its bounded concurrent run.

pub mod segment;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::limiter::TokenBucket;
use crate::retry::{classify, run_with_retry, RetryPolicy, SegmentError};
use crate::segmenter::{resegment, Segment};
use crate::storage::StorageWriter;

/// One transfer attempt for a single segment. Implementations write bytes at
/// the correct absolute offsets via `storage` and call `on_bytes` for every
/// chunk so the aggregator can update its counters.
pub trait SegmentOperation: Send + Sync {
    fn run(
        &self,
        segment: &Segment,
        storage: &StorageWriter,
        per_task: &TokenBucket,
        global: &TokenBucket,
        abort: &AtomicBool,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<Segment, SegmentError>;
}

/// Aggregate progress snapshot published at `progress_interval`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub bytes_per_second: f64,
}

/// Inputs to one `SegmentedDownloader::run` call. `on_progress` and
/// `on_persist` are invoked from the aggregator thread (never concurrently).
pub struct RunConfig<'a> {
    pub connections: usize,
    pub progress_interval: Duration,
    pub persist_interval: Duration,
    pub retry_policy: Option<RetryPolicy>,
    pub on_progress: Box<dyn FnMut(DownloadProgress) + 'a>,
    pub on_persist: Box<dyn FnMut(&[Segment]) + 'a>,
}

/// Runs `op` over every incomplete segment in `segments` using up to
/// `cfg.connections` worker threads, writing into `storage` through the two
/// token buckets. Segments are resegmented against `cfg.connections` first so
/// every incomplete segment handed to a worker starts at `downloaded_bytes=0`.
///
/// Returns the final segment list (all complete) on success, or the first
/// non-retryable `EngineError` — at which point outstanding workers are told
/// to stop and the rest of the plan is abandoned. `abort` is checked by every
/// worker between chunks and by the aggregator between completions; a set
/// abort always yields `EngineError::Canceled`.
pub fn run(
    op: Arc<dyn SegmentOperation>,
    segments: Vec<Segment>,
    storage: &StorageWriter,
    per_task: Arc<TokenBucket>,
    global: Arc<TokenBucket>,
    abort: Arc<AtomicBool>,
    mut cfg: RunConfig<'_>,
) -> Result<Vec<Segment>, EngineError> {
    let segments = resegment(&segments, cfg.connections.max(1));
    let total_already_done: u64 = segments.iter().map(|s| s.downloaded_bytes).sum();

    let complete: Vec<Segment> = segments.iter().filter(|s| s.is_complete()).copied().collect();
    let pending_list: Vec<Segment> = segments.iter().filter(|s| !s.is_complete()).copied().collect();

    if pending_list.is_empty() {
        (cfg.on_persist)(&segments);
        return Ok(segments);
    }

    let results: Arc<Mutex<Vec<Segment>>> = Arc::new(Mutex::new(complete));
    let pending: Arc<Mutex<VecDeque<Segment>>> = Arc::new(Mutex::new(pending_list.into_iter().collect()));
    let downloaded_total = Arc::new(AtomicU64::new(total_already_done));
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<Result<Segment, EngineError>>();

    let num_workers = cfg.connections.max(1);
    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let pending = Arc::clone(&pending);
        let tx = tx.clone();
        let op = Arc::clone(&op);
        let storage = storage.clone();
        let per_task = Arc::clone(&per_task);
        let global = Arc::clone(&global);
        let abort = Arc::clone(&abort);
        let stop = Arc::clone(&stop);
        let downloaded_total = Arc::clone(&downloaded_total);
        let policy = cfg.retry_policy;

        handles.push(std::thread::spawn(move || loop {
            if stop.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                break;
            }
            let segment = match pending.lock().unwrap().pop_front() {
                Some(s) => s,
                None => break,
            };
            let on_bytes = |n: u64| {
                downloaded_total.fetch_add(n, Ordering::Relaxed);
            };
            let attempt_once = || -> Result<Segment, SegmentError> {
                op.run(&segment, &storage, &per_task, &global, &abort, &on_bytes)
            };
            let outcome: Result<Segment, SegmentError> = match policy.as_ref() {
                Some(p) => {
                    let mut last = None;
                    let wrapped = run_with_retry(p, || attempt_once().map(|s| {
                        last = Some(s);
                        ()
                    }));
                    wrapped.map(|()| last.expect("success sets last"))
                }
                None => attempt_once(),
            };
            let sent = tx.send(outcome.map_err(|e| crate::error::classify_segment_error(&e, None)));
            if sent.is_err() {
                break;
            }
        }));
    }
    drop(tx);

    let mut first_error: Option<EngineError> = None;
    let mut to_receive = {
        let results = results.lock().unwrap();
        segments.len() - results.len()
    };
    let mut last_progress = Instant::now();
    let mut last_persist = Instant::now();

    while to_receive > 0 {
        let recv_timeout = cfg.progress_interval.min(cfg.persist_interval);
        match rx.recv_timeout(recv_timeout) {
            Ok(Ok(seg)) => {
                results.lock().unwrap().push(seg);
                to_receive -= 1;
            }
            Ok(Err(e)) => {
                to_receive -= 1;
                stop.store(true, Ordering::Relaxed);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if abort.load(Ordering::Relaxed) && first_error.is_none() {
            first_error = Some(EngineError::Canceled);
        }

        let now = Instant::now();
        if now.duration_since(last_progress) >= cfg.progress_interval {
            let downloaded = downloaded_total.load(Ordering::Relaxed);
            let secs = now.duration_since(last_progress).as_secs_f64().max(0.001);
            let rate = (downloaded as f64) / secs;
            (cfg.on_progress)(DownloadProgress { downloaded_bytes: downloaded, bytes_per_second: rate });
            last_progress = now;
        }
        if now.duration_since(last_persist) >= cfg.persist_interval {
            let snapshot = results.lock().unwrap().clone();
            (cfg.on_persist)(&snapshot);
            last_persist = now;
        }
    }

    for h in handles {
        let _ = h.join();
    }

    let mut final_segments = results.lock().unwrap().clone();
    final_segments.sort_by_key(|s| s.start);
    for (i, s) in final_segments.iter_mut().enumerate() {
        s.index = i;
    }
    (cfg.on_persist)(&final_segments);

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(final_segments)
}

/// Classifies a completed-but-incomplete transfer with a known `Retry-After`
/// hint (used by sources that can read it, e.g. the HTTP/FTP primitive).
pub fn classify_with_retry_after(e: &SegmentError, retry_after: Option<u64>) -> EngineError {
    crate::error::classify_segment_error(e, retry_after)
}

pub(crate) fn error_kind_of(e: &SegmentError) -> crate::retry::ErrorKind {
    classify(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::plan_segments;
    use std::sync::atomic::AtomicUsize;

    struct FakeOp {
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl SegmentOperation for FakeOp {
        fn run(
            &self,
            segment: &Segment,
            storage: &StorageWriter,
            per_task: &TokenBucket,
            global: &TokenBucket,
            _abort: &AtomicBool,
            on_bytes: &(dyn Fn(u64) + Send + Sync),
        ) -> Result<Segment, SegmentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(SegmentError::Http(503));
            }
            let data = vec![0u8; segment.len() as usize];
            per_task.acquire(data.len() as u64);
            global.acquire(data.len() as u64);
            storage.write_at(segment.start, &data).unwrap();
            on_bytes(data.len() as u64);
            Ok(Segment { downloaded_bytes: segment.len(), ..*segment })
        }
    }

    fn test_storage(size: u64) -> (tempfile::TempDir, StorageWriter) {
        let dir = tempfile::tempdir().unwrap();
        let tp = crate::storage::temp_path(&dir.path().join("out.bin"));
        let mut builder = crate::storage::StorageWriterBuilder::create(&tp).unwrap();
        builder.preallocate(size).unwrap();
        (dir, builder.build())
    }

    #[test]
    fn run_completes_all_segments() {
        let segments = plan_segments(1000, 4);
        let (_dir, storage) = test_storage(1000);
        let op = Arc::new(FakeOp { calls: AtomicUsize::new(0), fail_first: false });
        let result = run(
            op,
            segments,
            &storage,
            Arc::new(TokenBucket::unlimited()),
            Arc::new(TokenBucket::unlimited()),
            Arc::new(AtomicBool::new(false)),
            RunConfig {
                connections: 4,
                progress_interval: Duration::from_millis(10),
                persist_interval: Duration::from_millis(10),
                retry_policy: None,
                on_progress: Box::new(|_| {}),
                on_persist: Box::new(|_| {}),
            },
        )
        .unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.iter().all(|s| s.is_complete()));
        let total: u64 = result.iter().map(|s| s.len()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn run_retries_transient_failures() {
        let segments = plan_segments(100, 1);
        let (_dir, storage) = test_storage(100);
        let op = Arc::new(FakeOp { calls: AtomicUsize::new(0), fail_first: true });
        let result = run(
            op,
            segments,
            &storage,
            Arc::new(TokenBucket::unlimited()),
            Arc::new(TokenBucket::unlimited()),
            Arc::new(AtomicBool::new(false)),
            RunConfig {
                connections: 1,
                progress_interval: Duration::from_millis(10),
                persist_interval: Duration::from_millis(10),
                retry_policy: Some(RetryPolicy::default()),
                on_progress: Box::new(|_| {}),
                on_persist: Box::new(|_| {}),
            },
        )
        .unwrap();
        assert!(result.iter().all(|s| s.is_complete()));
    }

    #[test]
    fn run_already_complete_segments_skip_workers() {
        let mut segments = plan_segments(100, 1);
        segments[0].downloaded_bytes = segments[0].len();
        let (_dir, storage) = test_storage(100);
        let op = Arc::new(FakeOp { calls: AtomicUsize::new(0), fail_first: false });
        let result = run(
            op,
            segments,
            &storage,
            Arc::new(TokenBucket::unlimited()),
            Arc::new(TokenBucket::unlimited()),
            Arc::new(AtomicBool::new(false)),
            RunConfig {
                connections: 1,
                progress_interval: Duration::from_millis(10),
                persist_interval: Duration::from_millis(10),
                retry_policy: None,
                on_progress: Box::new(|_| {}),
                on_persist: Box::new(|_| {}),
            },
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].is_complete());
    }
}
