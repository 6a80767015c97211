use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use speedwagon_sdk::{
    async_trait, validate_job_arguments, AdditionalData, AdditionalInfoRequest, ConfigurationError,
    FullWorkflowMetadata, JobAbortError, JobArguments, JobHandle, JobLog, JobOutcome, JobRuntime,
    JobState, LogHistory, LogSink, RunOptions, RuntimeError,
};

use crate::executor::{AdditionalInfoProvider, JobExecutor};
use crate::registry::{PluginRegistry, RegisteredWorkflow};

type SharedPending = Arc<Mutex<Option<PendingRequest>>>;

/// Events kept per job for `get_logs`; older ones are dropped
pub const LOG_HISTORY_LIMIT: usize = 10_000;
type JobResult = Result<JobOutcome, ConfigurationError>;

/// A question the job is blocked on, with the channel its answer goes back through
struct PendingRequest {
    request: AdditionalInfoRequest,
    reply: oneshot::Sender<AdditionalData>,
}

/// Parks the executor's question where [`InProcessRuntime::provide_additional_info`] can answer it
struct ChannelInfoProvider {
    pending: SharedPending,
}

#[async_trait]
impl AdditionalInfoProvider for ChannelInfoProvider {
    async fn request(&self, request: AdditionalInfoRequest) -> Result<AdditionalData, JobAbortError> {
        let (reply, answer) = oneshot::channel();
        match self.pending.lock() {
            Ok(mut slot) => *slot = Some(PendingRequest { request, reply }),
            Err(_) => return Err(JobAbortError::new("additional info slot poisoned")),
        }
        answer
            .await
            .map_err(|_| JobAbortError::new("additional information was never provided"))
    }
}

/// Internal execution state for a running job
struct ExecutionState {
    workflow_id: String,
    state: watch::Receiver<JobState>,
    logs_tx: broadcast::Sender<JobLog>,
    /// Most recent logs for historical retrieval, capped at `LOG_HISTORY_LIMIT`
    logs_buffer: LogHistory,
    cancel: CancellationToken,
    pending: SharedPending,
    outcome: watch::Receiver<Option<JobResult>>,
    started_at: DateTime<Local>,
}

/// Runs jobs as tokio tasks inside the current process
pub struct InProcessRuntime {
    registry: Arc<PluginRegistry>,
    default_workers: usize,
    /// Active executions (uuid -> state)
    executions: Arc<tokio::sync::Mutex<HashMap<Uuid, ExecutionState>>>,
}

impl InProcessRuntime {
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            default_workers: 1,
            executions: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Worker pool size for jobs that do not override it
    pub fn with_default_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers.max(1);
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    fn workflow(&self, id: &str) -> Result<&RegisteredWorkflow, RuntimeError> {
        self.registry
            .get(id)
            .ok_or_else(|| RuntimeError::WorkflowNotFound(id.to_string()))
    }

    /// Drop bookkeeping for jobs that reached a terminal state, returning how many went
    ///
    /// Finished jobs are kept until this is called, so long-lived callers should call it.
    pub async fn cleanup_finished_jobs(&self) -> usize {
        let mut execs = self.executions.lock().await;
        let before = execs.len();
        execs.retain(|_, state| !state.state.borrow().is_terminal());
        before - execs.len()
    }

    /// When a job was accepted
    pub async fn started_at(&self, handle_id: &Uuid) -> Result<DateTime<Local>, RuntimeError> {
        let execs = self.executions.lock().await;
        execs
            .get(handle_id)
            .map(|s| s.started_at)
            .ok_or(RuntimeError::JobNotFound(*handle_id))
    }
}

#[async_trait]
impl JobRuntime for InProcessRuntime {
    fn list_workflows(&self) -> Vec<FullWorkflowMetadata> {
        self.registry
            .registered_workflows()
            .values()
            .map(RegisteredWorkflow::full_metadata)
            .collect()
    }

    fn get_workflow_metadata(&self, id: &str) -> Result<FullWorkflowMetadata, RuntimeError> {
        self.workflow(id).map(RegisteredWorkflow::full_metadata)
    }

    fn validate_job_arguments(&self, id: &str, args: &JobArguments) -> Result<(), RuntimeError> {
        let registered = self.workflow(id)?;
        registered.workflow.validate_user_options(args)?;
        Ok(())
    }

    async fn execute_workflow(
        &self,
        id: &str,
        args: JobArguments,
        options: RunOptions,
    ) -> Result<JobHandle, RuntimeError> {
        // Invalid arguments never become a job
        self.validate_job_arguments(id, &args)?;
        let registered = self.workflow(id)?;
        let workflow_id = registered.id();

        // Create broadcast channel for logs (capacity 1000)
        let (logs_tx, _) = broadcast::channel(1000);
        let logs_buffer = LogHistory::default();
        let cancel = CancellationToken::new();
        let pending: SharedPending = Arc::new(Mutex::new(None));
        let workers = options.max_workers.unwrap_or(self.default_workers);

        let executor = JobExecutor::new(registered)
            .with_max_workers(workers)
            .with_log_sink(
                LogSink::new(logs_tx.clone(), logs_buffer.clone()).with_history_limit(LOG_HISTORY_LIMIT),
            )
            .with_cancellation(cancel.clone());
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let exec_id = Uuid::new_v4();
        let state = ExecutionState {
            workflow_id: workflow_id.clone(),
            state: executor.state_receiver(),
            logs_tx,
            logs_buffer,
            cancel,
            pending: pending.clone(),
            outcome: outcome_rx,
            started_at: Local::now(),
        };
        self.executions.lock().await.insert(exec_id, state);

        info!(job = %exec_id, workflow = %workflow_id, workers, "job accepted");

        tokio::spawn(async move {
            let provider = ChannelInfoProvider { pending };
            let result = executor.run(args, &provider).await;
            match &result {
                Ok(outcome) => info!(
                    job = %exec_id,
                    state = %outcome.state,
                    succeeded = outcome.results.len(),
                    failed = outcome.failures.len(),
                    "job finished"
                ),
                Err(e) => warn!(job = %exec_id, "job rejected: {}", e),
            }
            outcome_tx.send_replace(Some(result));
        });

        Ok(JobHandle::new(exec_id, workflow_id))
    }

    async fn subscribe_logs(
        &self,
        handle_id: &Uuid,
    ) -> Result<broadcast::Receiver<JobLog>, RuntimeError> {
        let execs = self.executions.lock().await;
        let state = execs
            .get(handle_id)
            .ok_or(RuntimeError::JobNotFound(*handle_id))?;
        Ok(state.logs_tx.subscribe())
    }

    async fn get_logs(
        &self,
        handle_id: &Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<JobLog>, RuntimeError> {
        let execs = self.executions.lock().await;
        let state = execs
            .get(handle_id)
            .ok_or(RuntimeError::JobNotFound(*handle_id))?;

        let logs = match state.logs_buffer.lock() {
            Ok(buffer) => match limit {
                Some(limit) => buffer.iter().rev().take(limit).rev().cloned().collect(),
                None => buffer.iter().cloned().collect(),
            },
            Err(_) => Vec::new(),
        };
        Ok(logs)
    }

    async fn get_status(&self, handle_id: &Uuid) -> Result<JobState, RuntimeError> {
        let execs = self.executions.lock().await;
        execs
            .get(handle_id)
            .map(|s| *s.state.borrow())
            .ok_or(RuntimeError::JobNotFound(*handle_id))
    }

    async fn pending_additional_info(
        &self,
        handle_id: &Uuid,
    ) -> Result<Option<AdditionalInfoRequest>, RuntimeError> {
        let execs = self.executions.lock().await;
        let state = execs
            .get(handle_id)
            .ok_or(RuntimeError::JobNotFound(*handle_id))?;
        let request = state
            .pending
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|p| p.request.clone()));
        Ok(request)
    }

    async fn provide_additional_info(
        &self,
        handle_id: &Uuid,
        data: AdditionalData,
    ) -> Result<(), RuntimeError> {
        let execs = self.executions.lock().await;
        let state = execs
            .get(handle_id)
            .ok_or(RuntimeError::JobNotFound(*handle_id))?;

        let mut slot = state
            .pending
            .lock()
            .map_err(|_| RuntimeError::NoPendingRequest(*handle_id))?;
        let Some(pending) = slot.take() else {
            return Err(RuntimeError::NoPendingRequest(*handle_id));
        };

        // A rejected answer leaves the question open
        if let Err(e) = validate_job_arguments(&pending.request.fields, &data) {
            *slot = Some(pending);
            return Err(e.into());
        }

        pending
            .reply
            .send(data)
            .map_err(|_| RuntimeError::NoPendingRequest(*handle_id))
    }

    async fn cancel_job(&self, handle_id: &Uuid) -> Result<(), RuntimeError> {
        let execs = self.executions.lock().await;
        let state = execs
            .get(handle_id)
            .ok_or(RuntimeError::JobNotFound(*handle_id))?;

        let current = *state.state.borrow();
        if current.is_terminal() {
            return Err(RuntimeError::InvalidTransition {
                from: current,
                to: JobState::Failed,
            });
        }

        info!(job = %handle_id, workflow = %state.workflow_id, "cancelling job");
        state.cancel.cancel();
        if let Ok(mut slot) = state.pending.lock() {
            slot.take();
        }
        Ok(())
    }

    async fn wait_for_outcome(&self, handle_id: &Uuid) -> Result<JobOutcome, RuntimeError> {
        let mut rx = {
            let execs = self.executions.lock().await;
            execs
                .get(handle_id)
                .map(|s| s.outcome.clone())
                .ok_or(RuntimeError::JobNotFound(*handle_id))?
        };

        let waited = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
        let result = match waited {
            Ok(result) => result,
            Err(_) => rx.borrow().clone(),
        };

        match result {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::JobNotFound(*handle_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Plugin;
    use anyhow::Result;
    use serde_json::json;
    use speedwagon_sdk::{
        Capabilities, JobOption, OptionType, Subtask, SubtaskContext, TaskBuilder, TaskMetadata,
        TaskResult, Workflow, WorkflowMetadata,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Asks how many tasks to run, then runs that many
    struct Asking;

    struct Sleepy(u64);

    #[async_trait]
    impl Subtask for Sleepy {
        fn name(&self) -> &str {
            "Sleepy"
        }

        async fn work(&mut self, ctx: &mut SubtaskContext) -> Result<bool> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            ctx.set_results(json!({ "slept": self.0 }))?;
            Ok(true)
        }
    }

    impl Workflow for Asking {
        fn metadata(&self) -> WorkflowMetadata {
            WorkflowMetadata {
                id: "asking".to_string(),
                name: "Asking".to_string(),
                description: String::new(),
            }
        }

        fn job_options(&self) -> Vec<JobOption> {
            vec![JobOption::new(
                "delay",
                "Delay",
                OptionType::Number { min: Some(0), max: Some(1000) },
            )
            .with_default(0)]
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default().with_additional_info()
        }

        fn additional_info_request(
            &self,
            _initial_results: &[TaskResult],
            _args: &JobArguments,
        ) -> Result<AdditionalInfoRequest> {
            Ok(AdditionalInfoRequest {
                prompt: "How many tasks?".to_string(),
                fields: vec![JobOption::new(
                    "count",
                    "Count",
                    OptionType::Number { min: Some(1), max: Some(3) },
                )],
            })
        }

        fn discover_task_metadata(
            &self,
            _initial_results: &[TaskResult],
            additional_data: &AdditionalData,
            args: &JobArguments,
        ) -> Result<Vec<TaskMetadata>> {
            let count = additional_data.get_i64("count").unwrap_or(0);
            let delay = args.get_i64("delay").unwrap_or(0);
            Ok((0..count).map(|_| TaskMetadata::new().with("delay", delay)).collect())
        }

        fn create_new_task(
            &self,
            builder: &mut TaskBuilder,
            task: &TaskMetadata,
            _args: &JobArguments,
        ) -> Result<()> {
            let delay = task.get("delay").and_then(|v| v.as_u64()).unwrap_or(0);
            builder.add_subtask(Sleepy(delay));
            Ok(())
        }
    }

    fn runtime() -> InProcessRuntime {
        let registry = PluginRegistry::builder()
            .plugin(Plugin::new("test", || {
                let mut workflows: BTreeMap<String, Arc<dyn Workflow>> = BTreeMap::new();
                workflows.insert("Asking".to_string(), Arc::new(Asking));
                Ok(workflows)
            }))
            .build();
        InProcessRuntime::new(registry)
    }

    fn args(rt: &InProcessRuntime, delay: i64) -> JobArguments {
        let options = rt.get_workflow_metadata("asking").unwrap().options;
        JobArguments::builder(&options)
            .set("delay", delay)
            .unwrap()
            .build()
            .unwrap()
    }

    async fn wait_for_question(rt: &InProcessRuntime, id: &Uuid) -> AdditionalInfoRequest {
        for _ in 0..200 {
            if let Some(request) = rt.pending_additional_info(id).await.unwrap() {
                return request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never asked for additional information");
    }

    fn answer(request: &AdditionalInfoRequest, count: i64) -> AdditionalData {
        JobArguments::builder(&request.fields)
            .set("count", count)
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_additional_info_round_trip() {
        let rt = runtime();
        let handle = rt
            .execute_workflow("Asking", args(&rt, 0), RunOptions::default())
            .await
            .unwrap();

        let request = wait_for_question(&rt, &handle.id).await;
        assert_eq!(request.prompt, "How many tasks?");
        assert_eq!(rt.get_status(&handle.id).await.unwrap(), JobState::AwaitingAdditionalInfo);

        // Out-of-range answer is rejected and the question stays open
        let err = rt
            .provide_additional_info(&handle.id, answer(&request, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
        assert!(rt.pending_additional_info(&handle.id).await.unwrap().is_some());

        rt.provide_additional_info(&handle.id, answer(&request, 2))
            .await
            .unwrap();
        let outcome = rt.wait_for_outcome(&handle.id).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.results.len(), 2);
        assert!(matches!(
            rt.provide_additional_info(&handle.id, answer(&request, 1)).await,
            Err(RuntimeError::NoPendingRequest(_))
        ));

        let logs = rt.get_logs(&handle.id, None).await.unwrap();
        assert!(matches!(logs.first(), Some(JobLog::JobStarted { .. })));
        assert!(matches!(logs.last(), Some(JobLog::JobCompleted { succeeded: 2, failed: 0 })));
        assert_eq!(rt.get_logs(&handle.id, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let rt = runtime();
        let handle = rt
            .execute_workflow("asking", args(&rt, 0), RunOptions::default())
            .await
            .unwrap();
        wait_for_question(&rt, &handle.id).await;

        rt.cancel_job(&handle.id).await.unwrap();
        let outcome = rt.wait_for_outcome(&handle.id).await.unwrap();

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.abort_reason.as_deref(), Some("cancelled"));
        assert!(outcome.results.is_empty());
        assert!(matches!(
            rt.cancel_job(&handle.id).await,
            Err(RuntimeError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_start_a_job() {
        let rt = runtime();
        let options = rt.get_workflow_metadata("asking").unwrap().options;
        let bad = JobArguments::builder(&options)
            .set("delay", 5000)
            .unwrap()
            .build()
            .unwrap();

        let err = rt
            .execute_workflow("asking", bad, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
        assert_eq!(rt.cleanup_finished_jobs().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_job() {
        let rt = runtime();
        assert!(matches!(
            rt.execute_workflow("nope", JobArguments::default(), RunOptions::default())
                .await,
            Err(RuntimeError::WorkflowNotFound(_))
        ));
        assert!(matches!(
            rt.get_status(&Uuid::new_v4()).await,
            Err(RuntimeError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_finished_jobs() {
        let rt = runtime();
        let handle = rt
            .execute_workflow("asking", args(&rt, 0), RunOptions::default())
            .await
            .unwrap();
        let request = wait_for_question(&rt, &handle.id).await;

        assert_eq!(rt.cleanup_finished_jobs().await, 0);

        rt.provide_additional_info(&handle.id, answer(&request, 1))
            .await
            .unwrap();
        rt.wait_for_outcome(&handle.id).await.unwrap();

        assert_eq!(rt.cleanup_finished_jobs().await, 1);
        assert!(rt.started_at(&handle.id).await.is_err());
    }
}
