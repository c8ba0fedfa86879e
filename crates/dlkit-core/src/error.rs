//! Engine-wide error taxonomy.
//!
//! Every error that can reach a `TaskRecord` or an observable `DownloadState`
//! is one of these kinds. Lower-level error types (curl, sqlx, io) classify
//! into this enum at the module boundary; `anyhow` stays out of the engine's
//! own typed paths and is reserved for the CLI binary.

use crate::retry::SegmentError;
use std::fmt;

#[derive(Debug, Clone)]
pub enum EngineError {
    /// Connect/read timeout, reset, DNS, TLS. Retryable.
    Network(String),
    /// HTTP status >= 400. 408/429/5xx are retryable; `retry_after` carries
    /// the server's `Retry-After` hint in seconds when present.
    Http { code: u32, retry_after: Option<u64> },
    /// Local I/O failure. Not retryable.
    Disk(String),
    /// No source matched the url, or range support is required but absent.
    Unsupported(String),
    /// Server identity mismatch on resume, or 200 to a ranged request.
    ValidationFailed(String),
    /// Cooperative cancellation. Never surfaces as FAILED.
    Canceled,
    /// Source-specific failure (e.g. torrent tracker unreachable).
    SourceError { source_type: String, cause: String },
    /// Catch-all for unexpected failures.
    Unknown(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Network(_) => true,
            EngineError::Http { code, .. } => {
                *code == 408 || *code == 429 || (500..=599).contains(code)
            }
            EngineError::Disk(_)
            | EngineError::Unsupported(_)
            | EngineError::ValidationFailed(_)
            | EngineError::Canceled
            | EngineError::SourceError { .. }
            | EngineError::Unknown(_) => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EngineError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Network(cause) => write!(f, "network error: {cause}"),
            EngineError::Http { code, retry_after } => match retry_after {
                Some(s) => write!(f, "HTTP {code} (retry after {s}s)"),
                None => write!(f, "HTTP {code}"),
            },
            EngineError::Disk(cause) => write!(f, "disk error: {cause}"),
            EngineError::Unsupported(reason) => write!(f, "unsupported: {reason}"),
            EngineError::ValidationFailed(reason) => write!(f, "validation failed: {reason}"),
            EngineError::Canceled => write!(f, "canceled"),
            EngineError::SourceError { source_type, cause } => {
                write!(f, "{source_type} source error: {cause}")
            }
            EngineError::Unknown(cause) => write!(f, "unknown error: {cause}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Classify a segment-level error (curl/storage/validation) into the engine
/// taxonomy. `retry_after` is threaded in separately because it comes from
/// the HTTP response header, not the `SegmentError` itself.
pub fn classify_segment_error(e: &SegmentError, retry_after: Option<u64>) -> EngineError {
    match e {
        SegmentError::Curl(curl_err) => {
            if curl_err.is_operation_timedout()
                || curl_err.is_couldnt_connect()
                || curl_err.is_couldnt_resolve_host()
                || curl_err.is_couldnt_resolve_proxy()
                || curl_err.is_read_error()
                || curl_err.is_recv_error()
                || curl_err.is_send_error()
                || curl_err.is_got_nothing()
            {
                EngineError::Network(curl_err.to_string())
            } else {
                EngineError::Unknown(curl_err.to_string())
            }
        }
        SegmentError::Http(code) => EngineError::Http {
            code: *code,
            retry_after,
        },
        SegmentError::PartialTransfer { expected, received } => EngineError::Network(format!(
            "partial transfer: expected {expected} bytes, got {received}"
        )),
        SegmentError::Storage(io_err) => EngineError::Disk(io_err.to_string()),
        SegmentError::ValidationFailed(reason) => EngineError::ValidationFailed(reason.clone()),
        SegmentError::Canceled => EngineError::Canceled,
    }
}
