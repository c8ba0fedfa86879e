//! HTTP HEAD / range probing (C5: RangeProbe).
//!
//! Uses the curl crate (libcurl) to fetch response headers and confirm
//! `Content-Length`, `Accept-Ranges: bytes`, and capture ETag/Last-Modified
//! for resume safety. Falls back to a one-byte ranged GET when the server
//! rejects HEAD.

mod parse;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str;
use std::time::Duration;

use crate::url_model;

/// Result of a HEAD (or GET-fallback) probe: key fields needed for segmented
/// download and resume validation.
#[derive(Debug, Clone, Default)]
pub struct HeadResult {
    /// Total size in bytes, if known.
    pub content_length: Option<u64>,
    /// True if the server advertised (or proved, via 206) byte-range support.
    pub accept_ranges: bool,
    /// `ETag` value if present (used for resume validation).
    pub etag: Option<String>,
    /// `Last-Modified` value if present (used for resume validation).
    pub last_modified: Option<String>,
    /// `Content-Disposition` value if present (filename hint).
    pub content_disposition: Option<String>,
}

impl HeadResult {
    /// Both a known length and range support are required to segment safely.
    pub fn supports_resume(&self) -> bool {
        self.content_length.is_some() && self.accept_ranges
    }

    pub fn suggested_file_name(&self, url: &str) -> String {
        url_model::derive_filename(url, self.content_disposition.as_deref())
    }
}

/// Performs a HEAD request and returns parsed metadata.
///
/// Follows redirects. Optional custom headers can be passed (e.g. from a resolver).
/// Runs in the current thread; call from `spawn_blocking` if used from async code.
pub fn probe(url: &str, custom_headers: &HashMap<String, String>) -> Result<HeadResult> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?; // HEAD request
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if code < 200 || code >= 300 {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    parse::parse_headers(&headers)
}

/// One-byte ranged GET (`Range: bytes=0-0`), used when HEAD is rejected.
/// A 206 response establishes range support and total size from
/// `Content-Range: bytes 0-0/<total>`; a plain 200 means the server ignored
/// the range request, so `accept_ranges` stays false.
pub fn probe_via_get_fallback(
    url: &str,
    custom_headers: &HashMap<String, String>,
) -> Result<HeadResult> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.range("0-0")?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform().context("ranged GET fallback failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    let mut result = parse::parse_headers(&headers)?;

    match code {
        206 => {
            result.accept_ranges = true;
            if let Some(total) = parse::parse_content_range_total(&headers) {
                result.content_length = Some(total);
            }
        }
        200..=299 => result.accept_ranges = false,
        other => anyhow::bail!("ranged GET {} returned HTTP {}", url, other),
    }

    Ok(result)
}

/// HEAD first, falling back to the ranged GET when HEAD fails outright
/// (method not allowed, firewall drop, etc). Returns a default, all-unknown
/// `HeadResult` rather than propagating an error when both strategies fail,
/// so callers can still attempt an unsegmented download.
pub fn probe_best_effort(url: &str, custom_headers: &HashMap<String, String>) -> HeadResult {
    match probe(url, custom_headers) {
        Ok(result) => result,
        Err(_) => probe_via_get_fallback(url, custom_headers).unwrap_or_default(),
    }
}
