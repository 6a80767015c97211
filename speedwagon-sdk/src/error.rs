//! Error taxonomy shared by workflows, the executor and the runtime

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::JobState;

/// Job arguments failed validation before any task ran
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("required option '{option}' is missing")]
    MissingOption { option: String },

    #[error("invalid value for option '{option}': {reason}")]
    InvalidValue { option: String, reason: String },

    #[error("unknown option '{option}'")]
    UnknownOption { option: String },
}

impl ConfigurationError {
    pub fn missing(option: impl Into<String>) -> Self {
        Self::MissingOption {
            option: option.into(),
        }
    }

    pub fn invalid(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            option: option.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown(option: impl Into<String>) -> Self {
        Self::UnknownOption {
            option: option.into(),
        }
    }

    /// Name (or label, for imported files) of the offending option
    pub fn option(&self) -> &str {
        match self {
            Self::MissingOption { option }
            | Self::InvalidValue { option, .. }
            | Self::UnknownOption { option } => option,
        }
    }
}

/// Record of a single subtask that returned `false` or errored.
///
/// Failures are collected into the job outcome; they never abort the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{subtask} [{task_id}] failed: {reason}")]
pub struct SubtaskFailure {
    pub task_id: String,
    pub subtask: String,
    pub reason: String,
}

/// A plugin could not contribute its workflows
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginDiscoveryError {
    #[error("plugin '{plugin}' failed to load: {reason}")]
    HookFailed { plugin: String, reason: String },

    #[error("plugin '{plugin}' panicked during discovery: {reason}")]
    HookPanicked { plugin: String, reason: String },

    #[error(
        "workflow '{workflow}' from plugin '{plugin}' conflicts with the one registered by plugin '{existing_plugin}'"
    )]
    DuplicateWorkflow {
        workflow: String,
        plugin: String,
        existing_plugin: String,
    },
}

impl PluginDiscoveryError {
    pub fn plugin(&self) -> &str {
        match self {
            Self::HookFailed { plugin, .. }
            | Self::HookPanicked { plugin, .. }
            | Self::DuplicateWorkflow { plugin, .. } => plugin,
        }
    }
}

/// Fatal condition that stops the remaining queue of a job.
///
/// Subtasks raise it by returning an `anyhow::Error` wrapping this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job aborted: {reason}")]
pub struct JobAbortError {
    pub reason: String,
}

impl JobAbortError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new("cancelled")
    }
}

/// Errors returned by [`crate::JobRuntime`] operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {0} is not waiting for additional information")]
    NoPendingRequest(Uuid),

    #[error("invalid job state transition {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
