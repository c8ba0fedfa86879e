//! HTTP(S)/FTP(S) source: the one curl-based transfer primitive generalized
//! over both schemes, since libcurl translates the same `Range` header into
//! `REST`/`SIZE` for FTP transparently.

use std::collections::HashMap;

use crate::downloader::segment::transfer_segment;
use crate::downloader::{self, DownloadProgress, RunConfig, SegmentOperation};
use crate::error::EngineError;
use crate::model::{DownloadRequest, ResolvedSource, SelectionMode};
use crate::probe;
use crate::retry::SegmentError;
use crate::segmenter::Segment;

use super::{DownloadContext, DownloadSource};

#[derive(Debug)]
enum Scheme {
    Http,
    Ftp,
}

#[derive(Debug)]
pub struct HttpSource {
    scheme: Scheme,
}

impl HttpSource {
    pub fn http() -> Self {
        Self { scheme: Scheme::Http }
    }

    pub fn ftp() -> Self {
        Self { scheme: Scheme::Ftp }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::http()
    }
}

/// Carries the resolved URL alongside request headers so `transfer_segment`
/// has everything it needs per call.
struct UrlOp {
    url: String,
    headers: HashMap<String, String>,
}

impl SegmentOperation for UrlOp {
    fn run(
        &self,
        segment: &Segment,
        storage: &crate::storage::StorageWriter,
        per_task: &crate::limiter::TokenBucket,
        global: &crate::limiter::TokenBucket,
        abort: &std::sync::atomic::AtomicBool,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<Segment, SegmentError> {
        transfer_segment(&self.url, &self.headers, segment, storage, per_task, global, abort, on_bytes)
    }
}

impl DownloadSource for HttpSource {
    fn matches(&self, url: &str) -> bool {
        match self.scheme {
            Scheme::Http => url.starts_with("http://") || url.starts_with("https://"),
            Scheme::Ftp => url.starts_with("ftp://") || url.starts_with("ftps://"),
        }
    }

    fn source_type(&self) -> &'static str {
        match self.scheme {
            Scheme::Http => "http",
            Scheme::Ftp => "ftp",
        }
    }

    fn resolve(&self, request: &DownloadRequest) -> Result<ResolvedSource, EngineError> {
        let head = probe::probe_best_effort(&request.url, &request.headers);
        let mut metadata = HashMap::new();
        if let Some(etag) = &head.etag {
            metadata.insert("etag".to_string(), etag.clone());
        }
        if let Some(lm) = &head.last_modified {
            metadata.insert("last_modified".to_string(), lm.clone());
        }

        Ok(ResolvedSource {
            url: request.url.clone(),
            source_type: self.source_type().to_string(),
            total_bytes: head.content_length.map(|n| n as i64).unwrap_or(-1),
            supports_resume: head.supports_resume(),
            suggested_file_name: Some(head.suggested_file_name(&request.url)),
            max_segments: if head.supports_resume() { 64 } else { 1 },
            metadata,
            files: Vec::new(),
            selection_mode: SelectionMode::Single,
        })
    }

    fn download(&self, ctx: DownloadContext<'_>) -> Result<Vec<Segment>, EngineError> {
        let DownloadContext {
            resolved,
            headers,
            storage,
            per_task_limiter,
            global_limiter,
            abort,
            connections,
            segments,
            mut on_progress,
            mut on_persist,
        } = ctx;

        let op = std::sync::Arc::new(UrlOp { url: resolved.url.clone(), headers });

        let cfg = RunConfig {
            connections: connections.max(1),
            progress_interval: std::time::Duration::from_millis(200),
            persist_interval: std::time::Duration::from_secs(5),
            retry_policy: Some(crate::retry::RetryPolicy::default()),
            on_progress: Box::new(move |p: DownloadProgress| {
                on_progress(p.downloaded_bytes, p.bytes_per_second);
            }),
            on_persist: Box::new(move |segs: &[Segment]| {
                on_persist(segs);
            }),
        };

        downloader::run(op, segments, storage, per_task_limiter, global_limiter, abort, cfg)
    }

    fn build_resume_state(&self, resolved: &ResolvedSource) -> serde_json::Value {
        serde_json::json!({
            "etag": resolved.etag(),
            "last_modified": resolved.last_modified(),
        })
    }
}

