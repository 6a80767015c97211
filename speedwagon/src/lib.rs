// Plugin registry module
pub mod registry;

// Job state machine
pub mod executor;

// In-process job runtime
pub mod runtime;

// Settings and job configuration files
pub mod config;

// Final summary rendering
pub mod report;

// Command line definitions
pub mod cli;

// Built-in workflows
pub mod workflows;

// Workflow utilities (worker pool, subtask runner)
pub mod workflow_utils;

pub use executor::{AcceptDefaults, AdditionalInfoProvider, JobExecutor};
pub use registry::{Plugin, PluginRegistry, RegisteredWorkflow, RegistryBuilder};
pub use runtime::InProcessRuntime;
