//! `dlkit status` – list every known task and its current state.

use anyhow::Result;
use dlkit_core::model::DownloadState;
use dlkit_core::task::TaskManager;

fn describe(state: &DownloadState) -> String {
    match state {
        DownloadState::Idle => "idle".into(),
        DownloadState::Scheduled { when } => match when {
            Some(epoch) => format!("scheduled (at {epoch})"),
            None => "scheduled".into(),
        },
        DownloadState::Queued => "queued".into(),
        DownloadState::Pending => "pending".into(),
        DownloadState::Downloading { progress } => format!("downloading ({:.1}%)", progress.percent()),
        DownloadState::Paused => "paused".into(),
        DownloadState::Completed { path } => format!("completed ({})", path.display()),
        DownloadState::Failed { error } => format!("failed ({error})"),
        DownloadState::Canceled => "canceled".into(),
    }
}

pub async fn run_status(manager: &TaskManager) -> Result<()> {
    let mut task_ids = manager.task_ids();
    task_ids.sort();

    if task_ids.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!("{:<20} {}", "TASK", "STATE");
    for task_id in task_ids {
        if let Some(task) = manager.task(&task_id) {
            println!("{:<20} {}", task_id, describe(&task.state()));
        }
    }
    Ok(())
}
