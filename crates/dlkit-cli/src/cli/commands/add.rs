//! `dlkit add <url>` – submit a new download task.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use dlkit_core::limiter::SpeedLimit;
use dlkit_core::model::{DownloadCondition, DownloadRequest, DownloadSchedule, Priority};
use dlkit_core::task::TaskManager;

use crate::cli::task_id;

#[allow(clippy::too_many_arguments)]
pub async fn run_add(
    manager: &TaskManager,
    url: String,
    destination: Option<PathBuf>,
    connections: usize,
    priority: Priority,
    speed_limit: Option<String>,
    schedule_in: Option<u64>,
    wifi_only: bool,
    unmetered: bool,
    charging: bool,
) -> Result<()> {
    let mut request = DownloadRequest::new(url);
    request.destination = destination.or_else(|| std::env::current_dir().ok());
    request.connections = connections;
    request.priority = priority;
    if let Some(rate) = speed_limit {
        request.speed_limit = SpeedLimit::from_str(&rate).map_err(anyhow::Error::msg).context("invalid --speed-limit")?;
    }
    if let Some(secs) = schedule_in {
        request.schedule = Some(DownloadSchedule::At {
            epoch_secs: dlkit_core::model::now_epoch_secs() + secs,
        });
    }
    if wifi_only {
        request.conditions.push(DownloadCondition::WifiOnly);
    }
    if unmetered {
        request.conditions.push(DownloadCondition::Unmetered);
    }
    if charging {
        request.conditions.push(DownloadCondition::Charging);
    }

    let new_id = task_id::generate();
    let url = request.url.clone();
    let task = manager.submit(new_id.clone(), request).await;
    println!("Added task {new_id} for {url} ({:?})", task.state());
    Ok(())
}
