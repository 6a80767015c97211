//! Job executor: runs one job of one workflow through its state machine
//!
//! ```text
//! Idle -> InitialTasksRunning -> AwaitingAdditionalInfo -> MainTasksRunning -> Completed
//!   \              \                      \                       \
//!    +--------------+----------------------+-----------------------+--> Failed
//! ```
//!
//! The initial and additional-info states are only entered when the workflow
//! declared the matching capability. The additional-info exchange is the only
//! point at which a job waits on the user.

use anyhow::Error;
use chrono::Local;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use speedwagon_sdk::{
    async_trait, validate_job_arguments, AdditionalData, AdditionalInfoRequest, Capabilities,
    ConfigurationError, JobAbortError, JobArguments, JobLog, JobOutcome, JobState, LogSink,
    SubtaskFailure, TaskBuilder, TaskPhase, TaskResult, Workflow,
};

use crate::registry::RegisteredWorkflow;
use crate::workflow_utils::run_queue;

/// Front-end side of the additional-info exchange
#[async_trait]
pub trait AdditionalInfoProvider: Send + Sync {
    /// Answer the job's question. An error aborts the job.
    async fn request(&self, request: AdditionalInfoRequest) -> Result<AdditionalData, JobAbortError>;
}

/// Answers every request with the fields' declared defaults
pub struct AcceptDefaults;

#[async_trait]
impl AdditionalInfoProvider for AcceptDefaults {
    async fn request(&self, request: AdditionalInfoRequest) -> Result<AdditionalData, JobAbortError> {
        request
            .defaults()
            .map_err(|e| JobAbortError::new(e.to_string()))
    }
}

/// Runs a single job. Consumed by [`JobExecutor::run`].
pub struct JobExecutor {
    workflow: Arc<dyn Workflow>,
    capabilities: Capabilities,
    max_workers: usize,
    sink: LogSink,
    cancel: CancellationToken,
    state: watch::Sender<JobState>,
}

/// Everything accumulated so far, for building the outcome on any exit path
struct Progress {
    results: Vec<TaskResult>,
    failures: Vec<SubtaskFailure>,
}

impl JobExecutor {
    pub fn new(registered: &RegisteredWorkflow) -> Self {
        Self::from_parts(registered.workflow.clone(), registered.capabilities)
    }

    pub fn from_parts(workflow: Arc<dyn Workflow>, capabilities: Capabilities) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            workflow,
            capabilities,
            max_workers: 1,
            sink: LogSink::discard(),
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state_receiver(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&self, to: JobState) {
        let from = *self.state.borrow();
        if !from.can_transition_to(to) {
            error!(%from, %to, "refusing invalid job state transition");
            return;
        }
        self.state.send_replace(to);
        self.sink.emit(JobLog::StateChanged { from, to });
    }

    /// Run the job to a terminal state
    ///
    /// Invalid arguments are returned as a [`ConfigurationError`] before any
    /// task is built. Everything else, including aborts and cancellation,
    /// ends in a [`JobOutcome`].
    pub async fn run(
        self,
        args: JobArguments,
        provider: &dyn AdditionalInfoProvider,
    ) -> Result<JobOutcome, ConfigurationError> {
        let started_at = Local::now();
        let metadata = self.workflow.metadata();

        self.sink.emit(JobLog::JobStarted {
            workflow_id: metadata.id.clone(),
            workflow_name: metadata.name.clone(),
        });
        info!(workflow = %metadata.id, "job started");

        if let Err(e) = self.workflow.validate_user_options(&args) {
            warn!(workflow = %metadata.id, "rejected job arguments: {}", e);
            self.transition(JobState::Failed);
            self.sink.emit(JobLog::JobFailed {
                error: e.to_string(),
            });
            return Err(e);
        }

        let mut progress = Progress {
            results: Vec::new(),
            failures: Vec::new(),
        };

        // Pretask phase
        let mut initial_results = Vec::new();
        if self.capabilities.initial_task {
            self.transition(JobState::InitialTasksRunning);

            let mut builder = TaskBuilder::new();
            if let Err(e) = self.workflow.initial_task(&mut builder, &args) {
                return self.fail_or_reject(e, progress, &args, started_at);
            }

            let queue = run_queue(
                TaskPhase::Initial,
                builder.build(),
                self.max_workers,
                &self.sink,
                &self.cancel,
            )
            .await;
            progress.failures.extend(queue.failures);

            if let Some(abort) = queue.abort {
                return Ok(self.finish_failed(abort.reason, progress, &args, started_at));
            }
            if self.cancel.is_cancelled() {
                return Ok(self.finish_failed(JobAbortError::cancelled().reason, progress, &args, started_at));
            }
            initial_results = queue.results;
        }

        // The single interactive point
        let additional_data = if self.capabilities.additional_info {
            self.transition(JobState::AwaitingAdditionalInfo);

            let request = match self.workflow.additional_info_request(&initial_results, &args) {
                Ok(request) => request,
                Err(e) => return self.fail_or_reject(e, progress, &args, started_at),
            };
            self.sink.emit(JobLog::AdditionalInfoRequested {
                prompt: request.prompt.clone(),
            });

            let fields = request.fields.clone();
            let answer = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(JobAbortError::cancelled()),
                answer = provider.request(request) => answer,
            };

            match answer {
                Ok(data) => {
                    if let Err(e) = validate_job_arguments(&fields, &data) {
                        let reason = format!("additional information rejected: {}", e);
                        return Ok(self.finish_failed(reason, progress, &args, started_at));
                    }
                    data
                }
                Err(abort) => {
                    return Ok(self.finish_failed(abort.reason, progress, &args, started_at));
                }
            }
        } else {
            AdditionalData::default()
        };

        // Discovery and main queue
        self.transition(JobState::MainTasksRunning);

        let task_metadata =
            match self
                .workflow
                .discover_task_metadata(&initial_results, &additional_data, &args)
            {
                Ok(task_metadata) => task_metadata,
                Err(e) => return self.fail_or_reject(e, progress, &args, started_at),
            };
        self.sink.emit(JobLog::TasksDiscovered {
            count: task_metadata.len(),
        });
        info!(workflow = %metadata.id, tasks = task_metadata.len(), "discovered tasks");

        let mut builder = TaskBuilder::new();
        for task in &task_metadata {
            if let Err(e) = self.workflow.create_new_task(&mut builder, task, &args) {
                return self.fail_or_reject(e, progress, &args, started_at);
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(self.finish_failed(JobAbortError::cancelled().reason, progress, &args, started_at));
        }

        let queue = run_queue(
            TaskPhase::Main,
            builder.build(),
            self.max_workers,
            &self.sink,
            &self.cancel,
        )
        .await;
        progress.results.extend(queue.results);
        progress.failures.extend(queue.failures);

        if let Some(abort) = queue.abort {
            return Ok(self.finish_failed(abort.reason, progress, &args, started_at));
        }
        // A cancel that lands after the last subtask started has nothing left to stop
        if queue.skipped > 0 && self.cancel.is_cancelled() {
            return Ok(self.finish_failed(JobAbortError::cancelled().reason, progress, &args, started_at));
        }

        let report = self.report(&progress.results, &args);
        self.transition(JobState::Completed);
        self.sink.emit(JobLog::JobCompleted {
            succeeded: progress.results.len(),
            failed: progress.failures.len(),
        });
        info!(
            workflow = %metadata.id,
            succeeded = progress.results.len(),
            failed = progress.failures.len(),
            "job completed"
        );

        Ok(JobOutcome {
            workflow_id: metadata.id,
            state: JobState::Completed,
            results: progress.results,
            failures: progress.failures,
            abort_reason: None,
            report,
            started_at,
            finished_at: Local::now(),
        })
    }

    fn report(&self, results: &[TaskResult], args: &JobArguments) -> Option<String> {
        if self.capabilities.report {
            self.workflow.generate_report(results, args)
        } else {
            None
        }
    }

    /// Hook errors that are configuration problems go back to the caller;
    /// anything else fails the job
    fn fail_or_reject(
        &self,
        e: Error,
        progress: Progress,
        args: &JobArguments,
        started_at: chrono::DateTime<Local>,
    ) -> Result<JobOutcome, ConfigurationError> {
        match e.downcast::<ConfigurationError>() {
            Ok(config) => {
                self.transition(JobState::Failed);
                self.sink.emit(JobLog::JobFailed {
                    error: config.to_string(),
                });
                Err(config)
            }
            Err(e) => {
                let reason = match e.downcast_ref::<JobAbortError>() {
                    Some(abort) => abort.reason.clone(),
                    None => format!("{:#}", e),
                };
                Ok(self.finish_failed(reason, progress, args, started_at))
            }
        }
    }

    fn finish_failed(
        &self,
        reason: String,
        progress: Progress,
        args: &JobArguments,
        started_at: chrono::DateTime<Local>,
    ) -> JobOutcome {
        warn!(workflow = %self.workflow.metadata().id, %reason, "job failed");
        self.transition(JobState::Failed);
        self.sink.emit(JobLog::JobFailed {
            error: reason.clone(),
        });

        // Completed results stay reportable after an abort
        let report = if progress.results.is_empty() {
            None
        } else {
            self.report(&progress.results, args)
        };

        JobOutcome {
            workflow_id: self.workflow.metadata().id,
            state: JobState::Failed,
            results: progress.results,
            failures: progress.failures,
            abort_reason: Some(reason),
            report,
            started_at,
            finished_at: Local::now(),
        }
    }
}
