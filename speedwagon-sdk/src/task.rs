//! Task metadata, subtasks and the task queue

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{async_trait, JobLog, LogSink};

/// Serializable description of one unit of work, produced before any subtask exists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskMetadata(Map<String, Value>);

impl TaskMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| anyhow!("task metadata is missing '{}'", key))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for TaskMetadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Output of a completed subtask together with the subtask type that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub source: String,
    pub data: Value,
}

impl TaskResult {
    pub fn new(source: impl Into<String>, data: Value) -> Self {
        Self {
            source: source.into(),
            data,
        }
    }

    pub fn is_from(&self, source: &str) -> bool {
        self.source == source
    }
}

/// Handle a running subtask uses to log progress, publish its result and
/// observe cancellation
pub struct SubtaskContext {
    task_id: String,
    sink: LogSink,
    cancel: CancellationToken,
    messages: Vec<String>,
    results: Option<Value>,
}

impl SubtaskContext {
    pub fn new(task_id: impl Into<String>, sink: LogSink, cancel: CancellationToken) -> Self {
        Self {
            task_id: task_id.into(),
            sink,
            cancel,
            messages: Vec::new(),
            results: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.sink.emit(JobLog::TaskProgress {
            task_id: self.task_id.clone(),
            message: message.clone(),
        });
        self.messages.push(message);
    }

    /// Publish the result payload. A result can only be set once.
    pub fn set_results(&mut self, data: impl Into<Value>) -> Result<()> {
        if self.results.is_some() {
            return Err(anyhow!("results for task {} were already set", self.task_id));
        }
        self.results = Some(data.into());
        Ok(())
    }

    pub fn results(&self) -> Option<&Value> {
        self.results.as_ref()
    }

    pub fn take_results(&mut self) -> Option<Value> {
        self.results.take()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for `tokio::select!` inside long-running work
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One executable unit of work
#[async_trait]
pub trait Subtask: Send {
    /// Subtask type name, recorded as the provenance of its result
    fn name(&self) -> &str;

    fn task_description(&self) -> String {
        self.name().to_string()
    }

    /// Do the work. `Ok(true)` is success, `Ok(false)` a recorded failure.
    ///
    /// Returning an error that wraps [`crate::JobAbortError`] stops the rest of the job.
    async fn work(&mut self, ctx: &mut SubtaskContext) -> Result<bool>;
}

/// Append-only queue filled while a job discovers its work
#[derive(Default)]
pub struct TaskBuilder {
    subtasks: Vec<Box<dyn Subtask>>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subtask(&mut self, subtask: impl Subtask + 'static) {
        self.subtasks.push(Box::new(subtask));
    }

    pub fn add_boxed(&mut self, subtask: Box<dyn Subtask>) {
        self.subtasks.push(subtask);
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Freeze the queue; nothing can be added once execution starts
    pub fn build(self) -> TaskQueue {
        TaskQueue {
            subtasks: self.subtasks,
        }
    }
}

/// Read-only queue handed to the executor
pub struct TaskQueue {
    subtasks: Vec<Box<dyn Subtask>>,
}

impl TaskQueue {
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn into_subtasks(self) -> Vec<Box<dyn Subtask>> {
        self.subtasks
    }
}
