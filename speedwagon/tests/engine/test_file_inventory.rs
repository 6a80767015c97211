//! File inventory run end to end through the runtime

use super::common::*;
use speedwagon::report::render_summary;
use speedwagon_sdk::{JobLog, JobRuntime, JobState, RunOptions, RuntimeError};

#[tokio::test]
async fn test_inventory_lists_every_file_with_size() {
    let dir = scratch_tree(&[("a.tif", "abcd"), ("b.jp2", "xy"), ("sub/c.tif", "ignored")]);
    let runtime = builtin_runtime();
    let args = arguments(&runtime, "file_inventory", &[("Input", &path_str(dir.path()))]);

    let handle = runtime
        .execute_workflow("File Inventory", args, RunOptions { max_workers: Some(2) })
        .await
        .unwrap();
    let outcome = runtime.wait_for_outcome(&handle.id).await.unwrap();

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.failures.is_empty());

    let report = outcome.report.clone().unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines[1], "a.tif\t4 bytes");
    assert_eq!(lines[2], "b.jp2\t2 bytes");
    assert_eq!(lines.len(), 3);

    assert!(render_summary(&outcome).contains("completed: 2 succeeded, 0 failed"));
}

#[tokio::test]
async fn test_nonexistent_directory_is_a_configuration_error() {
    let dir = scratch_tree(&[]);
    let missing = dir.path().join("missing");
    let runtime = builtin_runtime();
    let args = arguments(&runtime, "file_inventory", &[("Input", &path_str(&missing))]);

    let err = runtime
        .execute_workflow("file_inventory", args, RunOptions::default())
        .await
        .unwrap_err();

    match err {
        RuntimeError::Configuration(e) => assert_eq!(e.option(), "input"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(runtime.cleanup_finished_jobs().await, 0);
}

#[tokio::test]
async fn test_empty_folder_completes_with_no_tasks() {
    let dir = scratch_tree(&[]);
    let runtime = builtin_runtime();
    let args = arguments(&runtime, "file_inventory", &[("Input", &path_str(dir.path()))]);

    let handle = runtime
        .execute_workflow("file_inventory", args, RunOptions::default())
        .await
        .unwrap();
    let outcome = runtime.wait_for_outcome(&handle.id).await.unwrap();

    assert!(outcome.is_success());
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.report.as_deref(), Some(format!("0 files in {}\n", path_str(dir.path())).as_str()));

    let logs = runtime.get_logs(&handle.id, None).await.unwrap();
    assert!(logs.contains(&JobLog::TasksDiscovered { count: 0 }));
    assert!(!logs.iter().any(|l| matches!(l, JobLog::TaskStarted { .. })));
}
