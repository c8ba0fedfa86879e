//! Curl-based ranged transfer primitive shared by the HTTP and FTP sources.
//!
//! One call transfers one [`Segment`]: a ranged GET for HTTP(S), or the same
//! `Range` header translated by libcurl into `REST`/`SIZE` for FTP(S). A
//! segment whose `end` is [`UNBOUNDED`] gets a plain GET with no `Range`
//! header, used for single-segment no-resume downloads of unknown length.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::limiter::TokenBucket;
use crate::retry::SegmentError;
use crate::segmenter::Segment;
use crate::storage::StorageWriter;

/// Sentinel end offset meaning "until EOF" for an unsized single segment.
pub const UNBOUNDED: u64 = u64::MAX;

pub type SegmentOutcome = Result<Segment, SegmentError>;

/// A single open-ended segment for sources whose total length is unknown
/// (chunked transfer encoding, no `Content-Length`): no preallocation, no
/// resume, `end` back-filled from actual bytes received.
pub fn unbounded_single_segment() -> Segment {
    Segment { index: 0, start: 0, end: UNBOUNDED, downloaded_bytes: 0 }
}

/// Transfers one segment: issues the ranged (or unranged) GET, sequences
/// every chunk through `per_task` then `global` token buckets, writes it at
/// the correct absolute offset, and calls `on_bytes(delta)` so the caller's
/// aggregator can update its counters. Polls `abort` between writes.
pub fn transfer_segment(
    url: &str,
    custom_headers: &HashMap<String, String>,
    segment: &Segment,
    storage: &StorageWriter,
    per_task: &TokenBucket,
    global: &TokenBucket,
    abort: &AtomicBool,
    on_bytes: &(dyn Fn(u64) + Send + Sync),
) -> SegmentOutcome {
    let bytes_written = Arc::new(AtomicU64::new(0));
    let bytes_written_cb = Arc::clone(&bytes_written);
    let storage_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let storage_error_cb = Arc::clone(&storage_error);
    let aborted = Arc::new(AtomicBool::new(false));
    let aborted_cb = Arc::clone(&aborted);
    let segment_start = segment.start;
    let storage = storage.clone();
    let unbounded = segment.end == UNBOUNDED;

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(Duration::from_secs(30)).map_err(SegmentError::Curl)?;
    // Abort if throughput drops below 1 KiB/s for 60s rather than relying on a
    // single hard wall-clock timeout, which would kill large segments on slow links.
    easy.low_speed_limit(1024).map_err(SegmentError::Curl)?;
    easy.low_speed_time(Duration::from_secs(60)).map_err(SegmentError::Curl)?;
    easy.timeout(Duration::from_secs(3600)).map_err(SegmentError::Curl)?;

    if !unbounded {
        easy.range(&format!("{}-{}", segment.start, segment.end)).map_err(SegmentError::Curl)?;
    }

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim())).map_err(SegmentError::Curl)?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(SegmentError::Curl)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(move |data| {
                if aborted_cb.load(Ordering::Relaxed) {
                    return Ok(0);
                }
                per_task.acquire(data.len() as u64);
                global.acquire(data.len() as u64);
                let off = bytes_written_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                match storage.write_at(segment_start + off, data) {
                    Ok(()) => {
                        on_bytes(data.len() as u64);
                        Ok(data.len())
                    }
                    Err(e) => {
                        let io_err = e
                            .downcast::<std::io::Error>()
                            .unwrap_or_else(|e| std::io::Error::other(e.to_string()));
                        let _ = storage_error_cb.lock().unwrap().replace(io_err);
                        Ok(0)
                    }
                }
            })
            .map_err(SegmentError::Curl)?;

        let perform_result = transfer.perform();
        if let Err(e) = perform_result {
            if e.is_write_error() {
                if let Some(io_err) = storage_error.lock().unwrap().take() {
                    return Err(SegmentError::Storage(io_err));
                }
                if abort.load(Ordering::Relaxed) {
                    return Err(SegmentError::Canceled);
                }
            }
            return Err(SegmentError::Curl(e));
        }
    }

    if abort.load(Ordering::Relaxed) {
        return Err(SegmentError::Canceled);
    }

    let code = easy.response_code().map_err(SegmentError::Curl)? as u32;
    if code < 200 || code >= 300 {
        return Err(SegmentError::Http(code));
    }
    if !unbounded && code != 206 {
        return Err(SegmentError::ValidationFailed(format!(
            "expected 206 Partial Content for ranged request, got {code}"
        )));
    }

    let received = bytes_written.load(Ordering::Relaxed);
    if !unbounded {
        let expected = segment.len();
        if received != expected {
            return Err(SegmentError::PartialTransfer { expected, received });
        }
        Ok(Segment {
            downloaded_bytes: segment.downloaded_bytes + received,
            ..*segment
        })
    } else {
        Ok(Segment {
            end: segment.start + received.saturating_sub(1),
            downloaded_bytes: received,
            ..*segment
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_segment_has_no_range_header() {
        let seg = Segment { index: 0, start: 0, end: UNBOUNDED, downloaded_bytes: 0 };
        assert_eq!(seg.end, UNBOUNDED);
    }
}
