//! Pluggable download source contract (C4 DownloadSource) and the concrete
//! HTTP/FTP/BitTorrent sources that implement it.

mod bittorrent;
mod http;

pub use bittorrent::BitTorrentSource;
pub use http::HttpSource;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::EngineError;
use crate::limiter::TokenBucket;
use crate::model::{DownloadRequest, ResolvedSource};
use crate::segmenter::Segment;
use crate::storage::StorageWriter;

/// Everything a source's `download` needs: where to write, how fast it may
/// write, and how to report progress/cancellation back to the execution
/// pipeline that owns it.
pub struct DownloadContext<'a> {
    pub resolved: &'a ResolvedSource,
    pub headers: std::collections::HashMap<String, String>,
    pub storage: &'a StorageWriter,
    pub per_task_limiter: Arc<TokenBucket>,
    pub global_limiter: Arc<TokenBucket>,
    pub abort: Arc<AtomicBool>,
    pub connections: usize,
    pub segments: Vec<Segment>,
    pub on_progress: Box<dyn FnMut(u64, f64) + Send + 'a>,
    pub on_persist: Box<dyn FnMut(&[Segment]) + Send + 'a>,
}

/// Plug point for a transfer protocol. The engine core only ever talks to
/// this trait; it has no knowledge of HTTP, FTP, or BitTorrent specifics.
pub trait DownloadSource: Send + Sync + std::fmt::Debug {
    /// Cheap scheme/shape test; no network I/O.
    fn matches(&self, url: &str) -> bool;

    /// Stable identifier stored on `TaskRecord.source_type`.
    fn source_type(&self) -> &'static str;

    /// Resolve request metadata. May perform network I/O (HEAD probe,
    /// torrent metadata fetch). Idempotent aside from that cost.
    fn resolve(&self, request: &DownloadRequest) -> Result<ResolvedSource, EngineError>;

    /// Run the transfer to completion, or until `ctx.abort` is observed.
    /// Returns the final segment list with each segment's `downloaded_bytes`
    /// reflecting what actually landed on disk.
    fn download(&self, ctx: DownloadContext<'_>) -> Result<Vec<Segment>, EngineError>;

    /// Serialisable snapshot used to validate resume identity (e.g. ETag).
    fn build_resume_state(&self, resolved: &ResolvedSource) -> serde_json::Value;

    /// Optional periodic checkpoint beyond the segment list itself (e.g. a
    /// BitTorrent bitfield). Most sources have nothing to add.
    fn update_resume_state(&self, _resolved: &ResolvedSource) -> Option<serde_json::Value> {
        None
    }
}

/// Picks the first registered source whose `matches` returns true. The HTTP
/// source is always present; callers append FTP/BitTorrent support.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn DownloadSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    /// Registry with HTTP, FTP, and BitTorrent sources pre-registered — the
    /// engine's default configuration.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpSource::http()));
        registry.register(Arc::new(HttpSource::ftp()));
        registry.register(Arc::new(BitTorrentSource::new()));
        registry
    }

    pub fn register(&mut self, source: Arc<dyn DownloadSource>) {
        self.sources.push(source);
    }

    /// Returns the first matching source, or `Unsupported` if none match.
    pub fn resolve_for(&self, url: &str) -> Result<Arc<dyn DownloadSource>, EngineError> {
        self.sources
            .iter()
            .find(|s| s.matches(url))
            .cloned()
            .ok_or_else(|| EngineError::Unsupported(format!("no source matches url: {url}")))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
