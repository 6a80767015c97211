//! Batch execution utilities for parallel task processing

use futures::{stream::FuturesUnordered, Future, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use speedwagon_sdk::{JobAbortError, LogSink, SubtaskFailure, TaskPhase, TaskQueue, TaskResult};

use crate::workflow_utils::task::{execute_subtask, SubtaskOutcome};

/// Context provided to each task in a batch
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    /// Queue the task belongs to
    pub phase: TaskPhase,
    /// Task number (1-indexed for display)
    pub task_number: usize,
    /// Total number of tasks in this batch
    pub total_tasks: usize,
}

impl TaskContext {
    pub fn task_id(&self) -> String {
        format!("{}-{}", self.phase.prefix(), self.task_number)
    }
}

/// Execute items on a bounded pool of `max_workers` concurrent tasks
///
/// Every item runs to completion; there is no fail-fast. Results come back in
/// input order regardless of completion order.
///
/// # Example
/// ```ignore
/// let doubled = execute_batch(TaskPhase::Main, vec![1, 2, 3], 2, |n, _ctx| async move {
///     n * 2
/// })
/// .await;
/// assert_eq!(doubled, vec![2, 4, 6]);
/// ```
pub async fn execute_batch<T, F, Fut, R>(
    phase: TaskPhase,
    items: Vec<T>,
    max_workers: usize,
    task_executor: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    let sem = Arc::new(Semaphore::new(max_workers.max(1)));
    let executor = Arc::new(task_executor);
    let mut tasks = FuturesUnordered::new();

    for (idx, item) in items.into_iter().enumerate() {
        let sem = sem.clone();
        let executor = executor.clone();

        let ctx = TaskContext {
            phase,
            task_number: idx + 1,
            total_tasks: total,
        };

        tasks.push(async move {
            // The semaphore is never closed, so acquire only fails if it is dropped
            let _permit = sem.acquire().await.ok();
            (idx, executor(item, ctx).await)
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(result) = tasks.next().await {
        results.push(result);
    }
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}

/// What running a whole queue produced
#[derive(Debug, Default)]
pub struct QueueOutcome {
    pub results: Vec<TaskResult>,
    pub failures: Vec<SubtaskFailure>,
    pub abort: Option<JobAbortError>,
    /// Subtasks never started because of cancellation or an abort
    pub skipped: usize,
}

/// Run a frozen task queue on the worker pool
///
/// An aborting subtask stops every subtask that has not started yet. Cancelling
/// `cancel` does the same. Subtasks already running are left to finish.
pub async fn run_queue(
    phase: TaskPhase,
    queue: TaskQueue,
    max_workers: usize,
    sink: &LogSink,
    cancel: &CancellationToken,
) -> QueueOutcome {
    let stop = cancel.child_token();
    let sink = sink.clone();
    let worker_stop = stop.clone();

    let outcomes = execute_batch(phase, queue.into_subtasks(), max_workers, move |subtask, ctx| {
        let sink = sink.clone();
        let stop = worker_stop.clone();
        async move {
            if stop.is_cancelled() {
                return SubtaskOutcome::Skipped;
            }
            let outcome = execute_subtask(subtask, ctx, sink, stop.clone()).await;
            if matches!(outcome, SubtaskOutcome::Aborted { .. }) {
                stop.cancel();
            }
            outcome
        }
    })
    .await;

    let mut queue_outcome = QueueOutcome::default();
    for outcome in outcomes {
        match outcome {
            SubtaskOutcome::Succeeded(result) => queue_outcome.results.push(result),
            SubtaskOutcome::Failed(failure) => queue_outcome.failures.push(failure),
            SubtaskOutcome::Aborted { failure, abort } => {
                queue_outcome.failures.push(failure);
                queue_outcome.abort.get_or_insert(abort);
            }
            SubtaskOutcome::Skipped => queue_outcome.skipped += 1,
        }
    }

    debug!(
        phase = phase.prefix(),
        succeeded = queue_outcome.results.len(),
        failed = queue_outcome.failures.len(),
        skipped = queue_outcome.skipped,
        "queue finished"
    );

    queue_outcome
}
