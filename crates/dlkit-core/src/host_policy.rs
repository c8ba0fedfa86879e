//! Per-host range-support/throughput memory (4.8).
//!
//! Feeds `choose_segment_count` as a *default* when a request leaves
//! `connections` at 0; never overrides an explicit request value. Purely an
//! optimization — losing this file changes nothing but the first guess for a
//! host the engine hasn't seen before.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::probe::HeadResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct HostEntry {
    supports_resume: bool,
    /// Best observed throughput in bytes/sec, used only to pick a segment
    /// count bucket; never compared against the live speed limiter.
    best_throughput_bps: f64,
}

/// Adaptive per-host segment-count memory, persisted as JSON.
#[derive(Default)]
pub struct HostPolicy {
    entries: RwLock<HashMap<String, HostEntry>>,
}

impl HostPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_path() -> std::io::Result<PathBuf> {
        let dirs = xdg::BaseDirectories::with_prefix("dlkit")?;
        Ok(dirs.get_state_home().join("host_policy.json"))
    }

    pub fn load_or_default() -> Self {
        match Self::state_path().and_then(|p| std::fs::read_to_string(p).map_err(Into::into)) {
            Ok(data) => match serde_json::from_str::<HashMap<String, HostEntry>>(&data) {
                Ok(entries) => Self { entries: RwLock::new(entries) },
                Err(_) => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    pub fn persist(&self) -> std::io::Result<()> {
        let path = Self::state_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.read().unwrap();
        let json = serde_json::to_string_pretty(&*entries).unwrap_or_default();
        std::fs::write(path, json)
    }

    /// Records what `RangeProbe` observed for the URL's host.
    pub fn observe_probe(&self, url: &str, head: &HeadResult) {
        let Some(host) = host_of(url) else { return };
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(host).or_insert(HostEntry {
            supports_resume: head.supports_resume(),
            best_throughput_bps: 0.0,
        });
        entry.supports_resume = head.supports_resume();
    }

    /// Records a completed transfer's average throughput for the host.
    pub fn observe_throughput(&self, url: &str, bytes_per_sec: f64) {
        let Some(host) = host_of(url) else { return };
        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(host).or_insert(HostEntry { supports_resume: true, best_throughput_bps: 0.0 });
        if bytes_per_sec > entry.best_throughput_bps {
            entry.best_throughput_bps = bytes_per_sec;
        }
    }

    /// Suggested segment count bucket (4/8/16) from prior throughput, or
    /// `None` for a host never seen before.
    pub fn adaptive_segment_count_for_url(&self, url: &str) -> Option<usize> {
        let host = host_of(url)?;
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&host)?;
        if !entry.supports_resume {
            return Some(1);
        }
        Some(if entry.best_throughput_bps > 20_000_000.0 {
            16
        } else if entry.best_throughput_bps > 5_000_000.0 {
            8
        } else {
            4
        })
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Chooses a segment count: adaptive hint capped by config bounds, falling
/// back to the config default when the host is unknown.
pub fn choose_segment_count(
    total_size: u64,
    min_segments: usize,
    max_segments: usize,
    url: &str,
    host_policy: &HostPolicy,
) -> usize {
    let adaptive = host_policy
        .adaptive_segment_count_for_url(url)
        .unwrap_or(min_segments.max(1).min(max_segments.max(1)));
    let n = adaptive.max(min_segments).min(max_segments).max(1);
    if total_size == 0 {
        n
    } else {
        n.min(total_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_host_falls_back_to_config_default() {
        let policy = HostPolicy::new();
        let n = choose_segment_count(1_000_000, 4, 16, "https://never-seen.example/a", &policy);
        assert_eq!(n, 4);
    }

    #[test]
    fn high_throughput_host_suggests_more_segments() {
        let policy = HostPolicy::new();
        policy.observe_probe(
            "https://fast.example/a",
            &HeadResult { content_length: Some(1), accept_ranges: true, ..Default::default() },
        );
        policy.observe_throughput("https://fast.example/a", 50_000_000.0);
        let n = choose_segment_count(1_000_000, 4, 16, "https://fast.example/a", &policy);
        assert_eq!(n, 16);
    }

    #[test]
    fn no_range_support_forces_single_segment() {
        let policy = HostPolicy::new();
        policy.observe_probe(
            "https://single.example/a",
            &HeadResult { content_length: Some(1), accept_ranges: false, ..Default::default() },
        );
        let n = choose_segment_count(1_000_000, 4, 16, "https://single.example/a", &policy);
        assert_eq!(n, 1);
    }

    #[test]
    fn segment_count_never_exceeds_total_size() {
        let policy = HostPolicy::new();
        let n = choose_segment_count(2, 4, 16, "https://tiny.example/a", &policy);
        assert_eq!(n, 2);
    }
}
