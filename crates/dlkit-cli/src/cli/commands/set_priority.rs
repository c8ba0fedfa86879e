//! `dlkit set-priority <task-id> <priority>` – reprioritize a waiting task.

use anyhow::Result;
use dlkit_core::model::Priority;
use dlkit_core::task::TaskManager;

pub async fn run_set_priority(manager: &TaskManager, task_id: &str, priority: Priority) -> Result<()> {
    manager.set_priority(&task_id.to_string(), priority).await;
    println!("{task_id}: priority set to {priority:?}");
    Ok(())
}
