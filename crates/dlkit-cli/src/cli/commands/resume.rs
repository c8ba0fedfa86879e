//! `dlkit resume <task-id>` – resume a paused or failed task.

use std::path::PathBuf;

use anyhow::Result;
use dlkit_core::task::TaskManager;

pub async fn run_resume(manager: &TaskManager, task_id: &str, destination: Option<PathBuf>) -> Result<()> {
    manager.resume(&task_id.to_string(), destination).await;
    println!("Resume requested for {task_id}");
    Ok(())
}
