//! `dlkit pause <task-id>` – request a resumable pause.

use anyhow::Result;
use dlkit_core::task::TaskManager;

pub async fn run_pause(manager: &TaskManager, task_id: &str) -> Result<()> {
    manager.pause(&task_id.to_string()).await;
    println!("Pause requested for {task_id}");
    Ok(())
}
