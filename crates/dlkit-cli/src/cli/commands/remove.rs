//! `dlkit remove <task-id>` – remove a task, optionally deleting its output.

use anyhow::Result;
use dlkit_core::task::TaskManager;

pub async fn run_remove(manager: &TaskManager, task_id: &str, delete_output: bool) -> Result<()> {
    manager.remove(&task_id.to_string(), delete_output).await;
    if delete_output {
        println!("Removed {task_id} (output deleted)");
    } else {
        println!("Removed {task_id}");
    }
    Ok(())
}
