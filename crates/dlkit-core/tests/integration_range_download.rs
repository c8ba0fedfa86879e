//! Integration test: local HTTP server with Range support, multi-segment
//! download through the full submit -> coordinator -> execution pipeline.

mod common;

use std::time::Duration;

use dlkit_core::config::DlkitConfig;
use dlkit_core::control::JobControl;
use dlkit_core::coordinator::Coordinator;
use dlkit_core::gate::Gate;
use dlkit_core::host_policy::HostPolicy;
use dlkit_core::model::{DownloadRequest, DownloadState};
use dlkit_core::queue::Queue;
use dlkit_core::source::SourceRegistry;
use dlkit_core::store::TaskStore;
use dlkit_core::task::TaskManager;
use tempfile::tempdir;

async fn test_manager() -> TaskManager {
    let store = TaskStore::open_in_memory().await.unwrap();
    let (tx, _rx) = tokio::sync::broadcast::channel(64);
    let coordinator = Coordinator::new(
        SourceRegistry::with_defaults(),
        store.clone(),
        JobControl::new(),
        HostPolicy::new(),
        DlkitConfig::default(),
        Queue::new(4, 0),
        tx,
    );
    TaskManager::new(coordinator, Gate::with_default_conditions(), store)
}

async fn wait_terminal(mut watch: tokio::sync::watch::Receiver<DownloadState>) -> DownloadState {
    loop {
        if watch.borrow().is_terminal() {
            return watch.borrow().clone();
        }
        tokio::time::timeout(Duration::from_secs(10), watch.changed())
            .await
            .expect("task did not reach a terminal state in time")
            .expect("watch channel closed");
    }
}

#[tokio::test]
async fn multi_segment_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let url = common::range_server::start(body.clone());
    let download_dir = tempdir().unwrap();

    let manager = test_manager().await;
    let mut request = DownloadRequest::new(url);
    request.destination = Some(download_dir.path().to_path_buf());
    request.connections = 4;
    let task = manager.submit("t1".into(), request).await;

    let state = wait_terminal(task.watch()).await;
    let path = match state {
        DownloadState::Completed { path } => path,
        other => panic!("expected Completed, got {other:?}"),
    };
    let content = std::fs::read(&path).unwrap();
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe_and_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: false,
            support_ranges: true,
            advertise_ranges: true,
        },
    );
    let download_dir = tempdir().unwrap();

    let manager = test_manager().await;
    let mut request = DownloadRequest::new(url);
    request.destination = Some(download_dir.path().to_path_buf());
    let task = manager.submit("t1".into(), request).await;

    let state = wait_terminal(task.watch()).await;
    assert!(matches!(state, DownloadState::Completed { .. }), "expected Completed, got {state:?}");
}

#[tokio::test]
async fn no_range_server_falls_back_to_single_stream_get() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
        },
    );
    let download_dir = tempdir().unwrap();

    let manager = test_manager().await;
    let mut request = DownloadRequest::new(url);
    request.destination = Some(download_dir.path().to_path_buf());
    request.connections = 4;
    let task = manager.submit("t1".into(), request).await;

    let state = wait_terminal(task.watch()).await;
    match state {
        DownloadState::Completed { path } => {
            let content = std::fs::read(&path).unwrap();
            assert_eq!(content, body);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn pausing_a_running_task_persists_partial_progress_for_resume() {
    let body: Vec<u8> = (0u8..100).cycle().take(8 * 1024 * 1024).collect();
    let url = common::range_server::start(body.clone());
    let download_dir = tempdir().unwrap();

    let manager = test_manager().await;
    let mut request = DownloadRequest::new(url);
    request.destination = Some(download_dir.path().to_path_buf());
    request.connections = 4;
    let task = manager.submit("t1".into(), request).await;

    // Give the transfer a moment to start, then pause mid-flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.pause().await;

    let mut watch = task.watch();
    let paused_or_completed = loop {
        let state = watch.borrow().clone();
        if matches!(state, DownloadState::Paused) || state.is_terminal() {
            break state;
        }
        tokio::time::timeout(Duration::from_secs(10), watch.changed())
            .await
            .expect("task never settled")
            .expect("watch channel closed");
    };

    // A fast machine may finish the download before the pause lands; either
    // outcome is a legitimate race, but a genuine pause must be resumable.
    if matches!(paused_or_completed, DownloadState::Paused) {
        task.resume(None).await;
        let state = wait_terminal(task.watch()).await;
        assert!(matches!(state, DownloadState::Completed { .. }), "resumed task should complete, got {state:?}");
    }
}
