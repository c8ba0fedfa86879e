//! `dlkit run` – drain the schedule gate and report progress until every
//! restored/submitted task has either finished or settled into a state that
//! needs an explicit command (paused, failed, still gated) to move further.

use std::time::Duration;

use anyhow::Result;
use dlkit_core::model::DownloadState;
use dlkit_core::task::TaskManager;

pub async fn run_run(manager: &TaskManager, interval_ms: u64) -> Result<()> {
    let interval = Duration::from_millis(interval_ms.max(50));

    loop {
        manager.poll_gate().await;

        let mut any_active = false;
        for task_id in manager.task_ids() {
            let Some(task) = manager.task(&task_id) else { continue };
            match task.state() {
                DownloadState::Downloading { progress } => {
                    any_active = true;
                    println!(
                        "{task_id}: {:.1}%  {} / {} bytes",
                        progress.percent(),
                        progress.downloaded_bytes,
                        progress.total_bytes
                    );
                }
                DownloadState::Queued | DownloadState::Pending => any_active = true,
                _ => {}
            }
        }

        if !any_active {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    for task_id in manager.task_ids() {
        if let Some(task) = manager.task(&task_id) {
            println!("{task_id}: {:?}", task.state());
        }
    }
    Ok(())
}
