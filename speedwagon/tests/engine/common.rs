//! Common test utilities for engine tests

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use speedwagon::workflows::builtin_plugin;
use speedwagon::{InProcessRuntime, PluginRegistry};
use speedwagon_sdk::{AdditionalInfoRequest, JobArguments, JobRuntime};

/// Runtime with only the built-in workflows registered
pub fn builtin_runtime() -> InProcessRuntime {
    let registry = PluginRegistry::builder().plugin(builtin_plugin()).build();
    InProcessRuntime::new(registry)
}

/// Scratch folder populated with `(relative path, contents)` pairs
pub fn scratch_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (relative, contents) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
    dir
}

/// Arguments for a workflow, set by label
pub fn arguments(runtime: &InProcessRuntime, workflow: &str, sets: &[(&str, &str)]) -> JobArguments {
    let options = runtime.get_workflow_metadata(workflow).unwrap().options;
    let mut builder = JobArguments::builder(&options);
    for (label, value) in sets {
        builder = builder.set_by_label(label, *value).unwrap();
    }
    builder.build().unwrap()
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Poll until the job asks its question
pub async fn wait_for_question(runtime: &InProcessRuntime, id: &Uuid) -> AdditionalInfoRequest {
    for _ in 0..400 {
        if let Some(request) = runtime.pending_additional_info(id).await.unwrap() {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never asked for additional information", id);
}
