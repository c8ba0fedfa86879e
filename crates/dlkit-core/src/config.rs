//! Global configuration loaded from `~/.config/dlkit/config.toml`.
//!
//! Every key in this struct corresponds to one "Configuration keys" entry
//! recognised by the engine; CLI flags and TOML parsing of arbitrary user
//! input are out of scope here, but the typed struct the engine is built
//! from is not.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::limiter::SpeedLimit;

/// Queue-specific admission settings (see `crate::queue`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of concurrently running tasks. 0 = unlimited.
    pub max_concurrent_downloads: usize,
    /// Maximum running tasks per host. 0 = unlimited.
    pub max_connections_per_host: usize,
    /// Whether newly-submitted tasks are offered to the queue immediately.
    pub auto_start: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_connections_per_host: 4,
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: 5,
            retry_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlkitConfig {
    /// Default segment ("connections") count when a request leaves it at 0.
    pub max_connections: usize,
    /// Minimum/maximum segments a plan is allowed to pick for adaptive sizing.
    pub min_segments: usize,
    pub max_segments: usize,
    /// Upper bound on total concurrent transfer connections across all tasks.
    pub max_total_connections: usize,
    pub retry: RetryConfig,
    /// Cadence, in milliseconds, at which `Downloading(progress)` is published.
    pub progress_update_interval_ms: u64,
    /// Cadence, in milliseconds, at which segments are persisted unconditionally.
    pub segment_save_interval_ms: u64,
    /// Hint for the per-read chunk size used by segment workers.
    pub buffer_size: usize,
    pub queue: QueueConfig,
    /// Global byte-rate cap shared by every active task.
    pub global_speed_limit: SpeedLimit,
}

impl Default for DlkitConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            min_segments: 4,
            max_segments: 16,
            max_total_connections: 64,
            retry: RetryConfig::default(),
            progress_update_interval_ms: 200,
            segment_save_interval_ms: 5_000,
            buffer_size: 64 * 1024,
            queue: QueueConfig::default(),
            global_speed_limit: SpeedLimit::Unlimited,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlkit")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DlkitConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DlkitConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DlkitConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DlkitConfig::default();
        assert_eq!(cfg.max_total_connections, 64);
        assert_eq!(cfg.min_segments, 4);
        assert_eq!(cfg.max_segments, 16);
        assert_eq!(cfg.queue.max_concurrent_downloads, 3);
        assert_eq!(cfg.global_speed_limit, SpeedLimit::Unlimited);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = DlkitConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DlkitConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_total_connections, cfg.max_total_connections);
        assert_eq!(parsed.queue, cfg.queue);
        assert_eq!(parsed.retry, cfg.retry);
        assert_eq!(parsed.global_speed_limit, cfg.global_speed_limit);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_connections = 8
            min_segments = 2
            max_segments = 32
            max_total_connections = 16

            [retry]
            retry_count = 3
            retry_delay_ms = 1000

            progress_update_interval_ms = 100
            segment_save_interval_ms = 2000
            buffer_size = 32768
            global_speed_limit = "500k"

            [queue]
            max_concurrent_downloads = 2
            max_connections_per_host = 1
            auto_start = true
        "#;
        let cfg: DlkitConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.retry.retry_count, 3);
        assert_eq!(cfg.global_speed_limit, SpeedLimit::BytesPerSec(512_000));
        assert_eq!(cfg.queue.max_concurrent_downloads, 2);
    }
}
