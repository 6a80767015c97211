//! The workflow interface every job type implements

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::options::{validate_job_arguments, JobArguments, JobOption};
use crate::task::{TaskBuilder, TaskMetadata, TaskResult};
use crate::WorkflowMetadata;

/// Optional hooks a workflow provides, recorded once at registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub initial_task: bool,
    pub additional_info: bool,
    pub report: bool,
}

impl Capabilities {
    pub fn with_initial_task(mut self) -> Self {
        self.initial_task = true;
        self
    }

    pub fn with_additional_info(mut self) -> Self {
        self.additional_info = true;
        self
    }

    pub fn with_report(mut self) -> Self {
        self.report = true;
        self
    }
}

/// Mid-job question put to the user, rendered from option descriptors like the job form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfoRequest {
    pub prompt: String,
    pub fields: Vec<JobOption>,
}

impl AdditionalInfoRequest {
    /// Answer built from the declared defaults alone
    pub fn defaults(&self) -> Result<AdditionalData, ConfigurationError> {
        JobArguments::builder(&self.fields).build()
    }
}

/// The user's answer to an [`AdditionalInfoRequest`]
pub type AdditionalData = JobArguments;

/// A job type: option definitions plus the hooks that turn arguments into subtasks
///
/// Only `metadata`, `job_options`, `discover_task_metadata` and `create_new_task`
/// are mandatory. The optional hooks are called only when [`Workflow::capabilities`]
/// declares them.
pub trait Workflow: Send + Sync {
    fn metadata(&self) -> WorkflowMetadata;

    fn job_options(&self) -> Vec<JobOption>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Reject bad arguments before anything runs
    fn validate_user_options(&self, args: &JobArguments) -> Result<(), ConfigurationError> {
        validate_job_arguments(&self.job_options(), args)
    }

    /// Queue subtasks whose results feed `discover_task_metadata`
    fn initial_task(&self, _builder: &mut TaskBuilder, _args: &JobArguments) -> Result<()> {
        Ok(())
    }

    /// Build the single mid-job question for the user
    fn additional_info_request(
        &self,
        _initial_results: &[TaskResult],
        _args: &JobArguments,
    ) -> Result<AdditionalInfoRequest> {
        bail!(
            "workflow '{}' does not request additional information",
            self.metadata().id
        )
    }

    /// Describe the units of work. Must not perform them.
    fn discover_task_metadata(
        &self,
        initial_results: &[TaskResult],
        additional_data: &AdditionalData,
        args: &JobArguments,
    ) -> Result<Vec<TaskMetadata>>;

    /// Turn one metadata item into subtasks on the builder's queue
    fn create_new_task(
        &self,
        builder: &mut TaskBuilder,
        task: &TaskMetadata,
        args: &JobArguments,
    ) -> Result<()>;

    fn generate_report(&self, _results: &[TaskResult], _args: &JobArguments) -> Option<String> {
        None
    }
}
