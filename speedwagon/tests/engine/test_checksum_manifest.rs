//! Checksum manifest, including the mid-job question

use super::common::*;
use speedwagon::{AcceptDefaults, JobExecutor};
use speedwagon_sdk::{JobArguments, JobLog, JobRuntime, JobState, RunOptions, TaskPhase};

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[tokio::test]
async fn test_manifest_with_answer_from_runtime() {
    let dir = scratch_tree(&[("a.tif", "abc"), ("notes.txt", ""), ("sub/b.tif", "abc")]);
    let runtime = builtin_runtime();
    let args = arguments(
        &runtime,
        "checksum_manifest",
        &[("Input", &path_str(dir.path())), ("Recursive", "true")],
    );

    let handle = runtime
        .execute_workflow("checksum_manifest", args, RunOptions::default())
        .await
        .unwrap();

    let request = wait_for_question(&runtime, &handle.id).await;
    assert!(request.prompt.starts_with("Found 3 files"));
    assert_eq!(runtime.get_status(&handle.id).await.unwrap(), JobState::AwaitingAdditionalInfo);

    let answer = JobArguments::builder(&request.fields)
        .set("include", "*.tif")
        .unwrap()
        .build()
        .unwrap();
    runtime.provide_additional_info(&handle.id, answer).await.unwrap();

    let outcome = runtime.wait_for_outcome(&handle.id).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(
        outcome.report.as_deref(),
        Some(format!("{h} *a.tif\n{h} *sub/b.tif\n", h = ABC_SHA256).as_str())
    );

    // Initial task results are not part of the outcome
    assert!(outcome.results.iter().all(|r| r.is_from("Checksum")));

    let logs = runtime.get_logs(&handle.id, None).await.unwrap();
    let initial_started = logs.iter().filter(|l| {
        matches!(l, JobLog::TaskStarted { phase: TaskPhase::Initial, .. })
    });
    assert_eq!(initial_started.count(), 1);
}

#[tokio::test]
async fn test_manifest_with_defaults_is_not_recursive() {
    let dir = scratch_tree(&[("a.tif", "abc"), ("notes.txt", ""), ("sub/b.tif", "abc")]);
    let runtime = builtin_runtime();
    let args = arguments(&runtime, "checksum_manifest", &[("Input", &path_str(dir.path()))]);
    let registered = runtime.registry().get("checksum_manifest").unwrap();

    let outcome = JobExecutor::new(registered)
        .with_max_workers(4)
        .run(args, &AcceptDefaults)
        .await
        .unwrap();

    assert_eq!(
        outcome.report.as_deref(),
        Some(format!("{} *a.tif\n{} *notes.txt\n", ABC_SHA256, EMPTY_SHA256).as_str())
    );
}

#[tokio::test]
async fn test_cancel_while_asking_runs_no_checksums() {
    let dir = scratch_tree(&[("a.tif", "abc")]);
    let runtime = builtin_runtime();
    let args = arguments(&runtime, "checksum_manifest", &[("Input", &path_str(dir.path()))]);

    let handle = runtime
        .execute_workflow("checksum_manifest", args, RunOptions::default())
        .await
        .unwrap();
    wait_for_question(&runtime, &handle.id).await;
    runtime.cancel_job(&handle.id).await.unwrap();

    let outcome = runtime.wait_for_outcome(&handle.id).await.unwrap();
    assert_eq!(outcome.state, JobState::Failed);
    assert_eq!(outcome.abort_reason.as_deref(), Some("cancelled"));
    assert!(outcome.results.is_empty());

    let logs = runtime.get_logs(&handle.id, None).await.unwrap();
    assert!(!logs
        .iter()
        .any(|l| matches!(l, JobLog::TaskStarted { phase: TaskPhase::Main, .. })));
}
