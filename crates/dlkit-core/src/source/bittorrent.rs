//! BitTorrent source (C4 DownloadSource over `librqbit`).
//!
//! Unlike HTTP/FTP, a torrent's transfer is driven entirely by `librqbit`'s
//! own piece scheduler; this source's `download` just starts a session,
//! polls `handle.stats()` on an interval, and republishes that as the same
//! progress/persist callbacks every other source uses. Progress is reported
//! as a single synthetic segment spanning the whole torrent rather than per
//! piece — piece-level resume state lives inside `librqbit`'s own session
//! directory, not in our segment list.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session, SessionOptions};

use crate::error::EngineError;
use crate::model::{DownloadRequest, ResolvedSource, SelectionMode, SourceFile};
use crate::segmenter::Segment;

use super::{DownloadContext, DownloadSource};

#[derive(Debug)]
pub struct BitTorrentSource;

impl BitTorrentSource {
    pub fn new() -> Self {
        Self
    }

    fn runtime() -> Result<tokio::runtime::Runtime, EngineError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::SourceError {
                source_type: "bittorrent".to_string(),
                cause: e.to_string(),
            })
    }

    fn session_dir() -> std::path::PathBuf {
        std::env::temp_dir().join("dlkit-rqbit-sessions")
    }
}

impl Default for BitTorrentSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadSource for BitTorrentSource {
    fn matches(&self, url: &str) -> bool {
        url.starts_with("magnet:") || url.ends_with(".torrent")
    }

    fn source_type(&self) -> &'static str {
        "bittorrent"
    }

    /// Adds the torrent in list-only mode, reads its file list and total
    /// size from the metadata it fetches, then drops the handle without
    /// downloading anything.
    fn resolve(&self, request: &DownloadRequest) -> Result<ResolvedSource, EngineError> {
        let rt = Self::runtime()?;
        let magnet = request.url.clone();

        rt.block_on(async move {
            let session = Session::new_with_opts(
                Self::session_dir(),
                SessionOptions {
                    disable_dht: false,
                    disable_dht_persistence: true,
                    persistence: None,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::SourceError {
                source_type: "bittorrent".to_string(),
                cause: e.to_string(),
            })?;

            let response = session
                .add_torrent(
                    AddTorrent::from_url(&magnet),
                    Some(AddTorrentOptions { list_only: true, ..Default::default() }),
                )
                .await
                .map_err(|e| EngineError::SourceError {
                    source_type: "bittorrent".to_string(),
                    cause: e.to_string(),
                })?;

            let (info_hash, name, files) = match response {
                AddTorrentResponse::ListOnly(torrent) => {
                    let info_hash = hex::encode(torrent.info_hash.0);
                    let name = torrent
                        .info
                        .name
                        .as_ref()
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "torrent".to_string());
                    let files: Vec<SourceFile> = torrent
                        .info
                        .iter_file_details()
                        .map_err(|e| EngineError::SourceError {
                            source_type: "bittorrent".to_string(),
                            cause: e.to_string(),
                        })?
                        .enumerate()
                        .map(|(idx, d)| SourceFile {
                            id: idx.to_string(),
                            name: d.filename.to_pathbuf().unwrap_or_default().to_string_lossy().to_string(),
                            size: d.len as i64,
                            metadata: HashMap::new(),
                        })
                        .collect();
                    (info_hash, name, files)
                }
                AddTorrentResponse::AlreadyManaged(id, handle) | AddTorrentResponse::Added(id, handle) => {
                    let info_hash = hex::encode(handle.info_hash().0);
                    let name = handle
                        .with_metadata(|m| m.name.clone())
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| "torrent".to_string());
                    let _ = session.delete(TorrentIdOrHash::Id(id), false).await;
                    (info_hash, name, Vec::new())
                }
            };

            let total_bytes: i64 = if files.is_empty() { -1 } else { files.iter().map(|f| f.size).sum() };
            let mut metadata = HashMap::new();
            metadata.insert("info_hash".to_string(), info_hash);

            Ok(ResolvedSource {
                url: request.url.clone(),
                source_type: "bittorrent".to_string(),
                total_bytes,
                supports_resume: true,
                suggested_file_name: Some(name),
                max_segments: 1,
                metadata,
                files,
                selection_mode: SelectionMode::Multiple,
            })
        })
    }

    /// Drives the torrent to completion, polling `handle.stats()` on the
    /// same progress/persist cadence the segmented downloader uses.
    fn download(&self, ctx: DownloadContext<'_>) -> Result<Vec<Segment>, EngineError> {
        let DownloadContext { resolved, abort, mut on_progress, mut on_persist, .. } = ctx;

        let rt = Self::runtime()?;
        let magnet = resolved.url.clone();
        let total_hint = resolved.total_bytes.max(0) as u64;
        let only_files: Option<Vec<usize>> = None; // file selection narrowed by caller via selected_file_ids upstream

        rt.block_on(async move {
            let session = Session::new_with_opts(
                Self::session_dir(),
                SessionOptions { disable_dht: false, disable_dht_persistence: true, persistence: None, ..Default::default() },
            )
            .await
            .map_err(|e| EngineError::SourceError { source_type: "bittorrent".to_string(), cause: e.to_string() })?;

            let response = session
                .add_torrent(
                    AddTorrent::from_url(&magnet),
                    Some(AddTorrentOptions { only_files, overwrite: true, ..Default::default() }),
                )
                .await
                .map_err(|e| EngineError::SourceError { source_type: "bittorrent".to_string(), cause: e.to_string() })?;

            let handle = response
                .into_handle()
                .ok_or_else(|| EngineError::SourceError {
                    source_type: "bittorrent".to_string(),
                    cause: "session returned no torrent handle".to_string(),
                })?;

            let mut last_downloaded = handle.stats().progress_bytes;
            let mut last_tick = Instant::now();
            let mut last_persist = Instant::now();

            loop {
                if abort.load(Ordering::Relaxed) {
                    let _ = session.delete(TorrentIdOrHash::Id(handle.id()), false).await;
                    return Err(EngineError::Canceled);
                }

                let stats = handle.stats();
                let downloaded = stats.progress_bytes;
                let total = if stats.total_bytes > 0 { stats.total_bytes } else { total_hint };

                let now = Instant::now();
                let elapsed = now.duration_since(last_tick).as_secs_f64();
                if elapsed >= 0.2 {
                    let rate = (downloaded.saturating_sub(last_downloaded)) as f64 / elapsed.max(0.001);
                    on_progress(downloaded, rate);
                    last_downloaded = downloaded;
                    last_tick = now;
                }

                if now.duration_since(last_persist) >= Duration::from_secs(5) {
                    on_persist(&[Segment { index: 0, start: 0, end: total.saturating_sub(1), downloaded_bytes: downloaded }]);
                    last_persist = now;
                }

                if total > 0 && downloaded >= total {
                    let final_segment = Segment { index: 0, start: 0, end: total.saturating_sub(1), downloaded_bytes: downloaded };
                    on_persist(std::slice::from_ref(&final_segment));
                    return Ok(vec![final_segment]);
                }

                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    fn build_resume_state(&self, resolved: &ResolvedSource) -> serde_json::Value {
        serde_json::json!({ "info_hash": resolved.metadata.get("info_hash") })
    }
}
