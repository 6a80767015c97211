// Re-export the derive macro
pub use speedwagon_macros::WorkflowDefinition;

// Re-exported for derive-generated code and for workflow authors
pub use serde_json;

// Re-export async trait for convenience
pub use async_trait::async_trait;

pub mod error;
pub mod options;
pub mod task;
pub mod workflow;

pub use error::{
    ConfigurationError, JobAbortError, PluginDiscoveryError, RuntimeError, SubtaskFailure,
};
pub use options::{validate_job_arguments, JobArguments, JobArgumentsBuilder, JobOption, OptionType};
pub use task::{Subtask, SubtaskContext, TaskBuilder, TaskMetadata, TaskQueue, TaskResult};
pub use workflow::{AdditionalData, AdditionalInfoRequest, Capabilities, Workflow};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Workflow metadata (id, name, description)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Complete workflow metadata with options (for JSON export)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullWorkflowMetadata {
    #[serde(flatten)]
    pub metadata: WorkflowMetadata,
    pub plugin: String,
    pub capabilities: Capabilities,
    pub options: Vec<JobOption>,
}

/// Implemented by `#[derive(WorkflowDefinition)]` on a workflow's options struct
pub trait WorkflowDefinition: Sized {
    fn metadata() -> WorkflowMetadata;
    fn job_options() -> Vec<JobOption>;
    fn from_job_arguments(args: &JobArguments) -> Result<Self, ConfigurationError>;
}

/// Typed extraction of a single option value, used by derived `from_job_arguments`
pub trait FromOptionValue: Sized {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError>;
}

fn present<'a>(name: &str, value: Option<&'a Value>) -> Result<&'a Value, ConfigurationError> {
    match value {
        None | Some(Value::Null) => Err(ConfigurationError::missing(name)),
        Some(v) => Ok(v),
    }
}

impl FromOptionValue for String {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError> {
        let value = present(name, value)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConfigurationError::invalid(name, format!("expected text, got {}", value)))
    }
}

impl FromOptionValue for PathBuf {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError> {
        String::from_option_value(name, value).map(PathBuf::from)
    }
}

impl FromOptionValue for bool {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError> {
        let value = present(name, value)?;
        value
            .as_bool()
            .ok_or_else(|| ConfigurationError::invalid(name, format!("expected true or false, got {}", value)))
    }
}

impl FromOptionValue for i64 {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError> {
        let value = present(name, value)?;
        value
            .as_i64()
            .ok_or_else(|| ConfigurationError::invalid(name, format!("expected a whole number, got {}", value)))
    }
}

impl FromOptionValue for usize {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError> {
        let n = i64::from_option_value(name, value)?;
        usize::try_from(n)
            .map_err(|_| ConfigurationError::invalid(name, format!("{} must not be negative", n)))
    }
}

impl<T: FromOptionValue> FromOptionValue for Option<T> {
    fn from_option_value(name: &str, value: Option<&Value>) -> Result<Self, ConfigurationError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(_) => T::from_option_value(name, value).map(Some),
        }
    }
}

/// Where a job is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    InitialTasksRunning,
    AwaitingAdditionalInfo,
    MainTasksRunning,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Idle, InitialTasksRunning | AwaitingAdditionalInfo | MainTasksRunning) => true,
            (InitialTasksRunning, AwaitingAdditionalInfo | MainTasksRunning) => true,
            (AwaitingAdditionalInfo, MainTasksRunning) => true,
            (MainTasksRunning, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::InitialTasksRunning => "initial tasks running",
            JobState::AwaitingAdditionalInfo => "awaiting additional info",
            JobState::MainTasksRunning => "main tasks running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which queue a subtask belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Initial,
    Main,
}

impl TaskPhase {
    pub fn prefix(&self) -> &'static str {
        match self {
            TaskPhase::Initial => "initial",
            TaskPhase::Main => "main",
        }
    }
}

/// Structured logging events emitted while a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobLog {
    /// Job accepted by the executor
    JobStarted {
        workflow_id: String,
        workflow_name: String,
    },
    /// State machine moved
    StateChanged { from: JobState, to: JobState },
    /// Discovery finished
    TasksDiscovered { count: usize },
    /// The job is waiting on the user
    AdditionalInfoRequested { prompt: String },
    /// Task started
    TaskStarted {
        phase: TaskPhase,
        task_id: String,
        description: String,
        total_tasks: usize,
    },
    /// Task progress update
    TaskProgress { task_id: String, message: String },
    /// Task completed
    TaskCompleted {
        task_id: String,
        result: Option<Value>,
    },
    /// Task failed
    TaskFailed { task_id: String, error: String },
    /// Job finished with every scheduled task accounted for
    JobCompleted { succeeded: usize, failed: usize },
    /// Job stopped early
    JobFailed { error: String },
}

/// Shared event history, oldest first
pub type LogHistory = Arc<Mutex<VecDeque<JobLog>>>;

/// Destination for [`JobLog`] events: a broadcast channel, a history buffer, both or neither
#[derive(Clone, Default)]
pub struct LogSink {
    tx: Option<broadcast::Sender<JobLog>>,
    history: Option<LogHistory>,
    history_limit: Option<usize>,
}

impl LogSink {
    pub fn new(tx: broadcast::Sender<JobLog>, history: LogHistory) -> Self {
        Self {
            tx: Some(tx),
            history: Some(history),
            history_limit: None,
        }
    }

    /// Keep at most `limit` events in the history, dropping the oldest
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn discard() -> Self {
        Self::default()
    }

    /// Sink that only keeps history; handy in tests
    pub fn recording() -> (Self, LogHistory) {
        let history = LogHistory::default();
        (
            Self {
                tx: None,
                history: Some(history.clone()),
                history_limit: None,
            },
            history,
        )
    }

    pub fn emit(&self, event: JobLog) {
        if let Some(history) = &self.history {
            if let Ok(mut buffer) = history.lock() {
                buffer.push_back(event.clone());
                if let Some(limit) = self.history_limit {
                    while buffer.len() > limit {
                        buffer.pop_front();
                    }
                }
            }
        }
        if let Some(tx) = &self.tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}

/// Job execution handle for tracking async execution
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uuid,
    pub workflow_id: String,
}

impl JobHandle {
    pub fn new(id: Uuid, workflow_id: String) -> Self {
        Self { id, workflow_id }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }
}

/// Per-job execution overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Worker pool size; falls back to the runtime's configured default
    pub max_workers: Option<usize>,
}

/// Everything a finished job leaves behind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub workflow_id: String,
    pub state: JobState,
    pub results: Vec<TaskResult>,
    pub failures: Vec<SubtaskFailure>,
    pub abort_reason: Option<String>,
    pub report: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }
}

/// Runtime trait for workflow discovery and execution.
/// One API for the CLI and any other front end.
#[async_trait]
pub trait JobRuntime: Send + Sync {
    /// List all registered workflows with metadata
    fn list_workflows(&self) -> Vec<FullWorkflowMetadata>;

    /// Get detailed metadata for a specific workflow
    fn get_workflow_metadata(&self, id: &str) -> Result<FullWorkflowMetadata, RuntimeError>;

    /// Validate arguments against the workflow's options before execution
    fn validate_job_arguments(&self, id: &str, args: &JobArguments) -> Result<(), RuntimeError>;

    /// Start a job in the background
    async fn execute_workflow(
        &self,
        id: &str,
        args: JobArguments,
        options: RunOptions,
    ) -> Result<JobHandle, RuntimeError>;

    /// Subscribe to logs from a running job
    async fn subscribe_logs(
        &self,
        handle_id: &Uuid,
    ) -> Result<broadcast::Receiver<JobLog>, RuntimeError>;

    /// Logs emitted so far, optionally only the last `limit`
    async fn get_logs(&self, handle_id: &Uuid, limit: Option<usize>)
        -> Result<Vec<JobLog>, RuntimeError>;

    /// Get current state of a job
    async fn get_status(&self, handle_id: &Uuid) -> Result<JobState, RuntimeError>;

    /// The question a job is waiting on, if any
    async fn pending_additional_info(
        &self,
        handle_id: &Uuid,
    ) -> Result<Option<AdditionalInfoRequest>, RuntimeError>;

    /// Answer the pending question and let the job continue
    async fn provide_additional_info(
        &self,
        handle_id: &Uuid,
        data: AdditionalData,
    ) -> Result<(), RuntimeError>;

    /// Cancel a running job
    async fn cancel_job(&self, handle_id: &Uuid) -> Result<(), RuntimeError>;

    /// Wait for a job to finish
    async fn wait_for_outcome(&self, handle_id: &Uuid) -> Result<JobOutcome, RuntimeError>;
}
