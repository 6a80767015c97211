//! Subtask execution with automatic logging

use futures::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use speedwagon_sdk::{
    JobAbortError, JobLog, LogSink, Subtask, SubtaskContext, SubtaskFailure, TaskResult,
};

use crate::workflow_utils::batch::TaskContext;

/// How a single subtask ended
#[derive(Debug)]
pub enum SubtaskOutcome {
    Succeeded(TaskResult),
    Failed(SubtaskFailure),
    Aborted {
        failure: SubtaskFailure,
        abort: JobAbortError,
    },
    /// Never started
    Skipped,
}

/// Execute a single subtask with automatic logging
///
/// Wraps `work()` with:
/// - `TaskStarted` before execution
/// - `TaskCompleted` with the result payload on success
/// - `TaskFailed` when work returns `false`, errors or panics
///
/// A successful subtask that never set a payload gets an empty JSON object,
/// so every success yields a non-null result.
pub async fn execute_subtask(
    mut subtask: Box<dyn Subtask>,
    ctx: TaskContext,
    sink: LogSink,
    cancel: CancellationToken,
) -> SubtaskOutcome {
    let task_id = ctx.task_id();
    let name = subtask.name().to_string();

    sink.emit(JobLog::TaskStarted {
        phase: ctx.phase,
        task_id: task_id.clone(),
        description: subtask.task_description(),
        total_tasks: ctx.total_tasks,
    });
    debug!(task_id = %task_id, subtask = %name, "task started");

    let mut sub_ctx = SubtaskContext::new(&task_id, sink.clone(), cancel);
    let outcome = AssertUnwindSafe(subtask.work(&mut sub_ctx))
        .catch_unwind()
        .await;

    let failure = |reason: String| SubtaskFailure {
        task_id: task_id.clone(),
        subtask: name.clone(),
        reason,
    };

    let outcome = match outcome {
        Ok(Ok(true)) => {
            let data = match sub_ctx.take_results() {
                None | Some(Value::Null) => Value::Object(Map::new()),
                Some(data) => data,
            };
            sink.emit(JobLog::TaskCompleted {
                task_id: task_id.clone(),
                result: Some(data.clone()),
            });
            return SubtaskOutcome::Succeeded(TaskResult::new(name.clone(), data));
        }
        Ok(Ok(false)) => SubtaskOutcome::Failed(failure("work reported failure".to_string())),
        Ok(Err(e)) => match e.downcast_ref::<JobAbortError>() {
            Some(abort) => SubtaskOutcome::Aborted {
                failure: failure(abort.to_string()),
                abort: abort.clone(),
            },
            None => SubtaskOutcome::Failed(failure(format!("{:#}", e))),
        },
        Err(_) => SubtaskOutcome::Failed(failure("subtask panicked".to_string())),
    };

    if let SubtaskOutcome::Failed(f) | SubtaskOutcome::Aborted { failure: f, .. } = &outcome {
        warn!(task_id = %task_id, subtask = %name, reason = %f.reason, "task failed");
        sink.emit(JobLog::TaskFailed {
            task_id: task_id.clone(),
            error: f.reason.clone(),
        });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use serde_json::json;
    use speedwagon_sdk::{async_trait, TaskPhase};

    fn ctx() -> TaskContext {
        TaskContext {
            phase: TaskPhase::Main,
            task_number: 1,
            total_tasks: 1,
        }
    }

    struct Quiet;

    #[async_trait]
    impl Subtask for Quiet {
        fn name(&self) -> &str {
            "Quiet"
        }

        async fn work(&mut self, _ctx: &mut SubtaskContext) -> Result<bool> {
            Ok(true)
        }
    }

    struct Broken;

    #[async_trait]
    impl Subtask for Broken {
        fn name(&self) -> &str {
            "Broken"
        }

        async fn work(&mut self, ctx: &mut SubtaskContext) -> Result<bool> {
            ctx.log("about to fail");
            Err(anyhow!("unreadable file"))
        }
    }

    struct Panics;

    #[async_trait]
    impl Subtask for Panics {
        fn name(&self) -> &str {
            "Panics"
        }

        async fn work(&mut self, _ctx: &mut SubtaskContext) -> Result<bool> {
            panic!("bad state")
        }
    }

    #[tokio::test]
    async fn test_success_without_payload_gets_empty_object() {
        let (sink, history) = LogSink::recording();
        let outcome = execute_subtask(Box::new(Quiet), ctx(), sink, CancellationToken::new()).await;

        match outcome {
            SubtaskOutcome::Succeeded(result) => {
                assert_eq!(result.source, "Quiet");
                assert_eq!(result.data, json!({}));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let events = history.lock().unwrap();
        assert!(matches!(events[0], JobLog::TaskStarted { .. }));
        assert!(matches!(events.back(), Some(JobLog::TaskCompleted { .. })));
    }

    #[tokio::test]
    async fn test_error_is_recorded_as_failure() {
        let (sink, history) = LogSink::recording();
        let outcome = execute_subtask(Box::new(Broken), ctx(), sink, CancellationToken::new()).await;

        match outcome {
            SubtaskOutcome::Failed(failure) => {
                assert_eq!(failure.task_id, "main-1");
                assert!(failure.reason.contains("unreadable file"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let events = history.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], JobLog::TaskProgress { message, .. } if message == "about to fail"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let outcome = execute_subtask(Box::new(Panics), ctx(), LogSink::discard(), CancellationToken::new()).await;
        assert!(matches!(outcome, SubtaskOutcome::Failed(f) if f.reason == "subtask panicked"));
    }
}
