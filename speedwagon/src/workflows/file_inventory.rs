//! List every regular file in a folder with its size

use anyhow::{Context, Result};
use serde_json::json;
use std::fmt::Write;
use std::path::PathBuf;

use speedwagon_sdk::{
    async_trait, AdditionalData, Capabilities, JobArguments, JobOption, Subtask, SubtaskContext,
    TaskBuilder, TaskMetadata, TaskResult, Workflow, WorkflowDefinition, WorkflowMetadata,
};

#[derive(Debug, Clone, WorkflowDefinition)]
#[workflow(
    id = "file_inventory",
    name = "File Inventory",
    description = "Lists the files in a folder along with their sizes"
)]
pub struct FileInventoryOptions {
    #[field(label = "Input", description = "Folder to inventory", type = "directory")]
    pub input: PathBuf,
}

pub struct FileInventory;

impl Workflow for FileInventory {
    fn metadata(&self) -> WorkflowMetadata {
        FileInventoryOptions::metadata()
    }

    fn job_options(&self) -> Vec<JobOption> {
        FileInventoryOptions::job_options()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_report()
    }

    fn discover_task_metadata(
        &self,
        _initial_results: &[TaskResult],
        _additional_data: &AdditionalData,
        args: &JobArguments,
    ) -> Result<Vec<TaskMetadata>> {
        let opts = FileInventoryOptions::from_job_arguments(args)?;

        let entries = std::fs::read_dir(&opts.input)
            .with_context(|| format!("Failed to read {}", opts.input.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        Ok(files
            .into_iter()
            .map(|path| TaskMetadata::new().with("path", path.to_string_lossy().into_owned()))
            .collect())
    }

    fn create_new_task(
        &self,
        builder: &mut TaskBuilder,
        task: &TaskMetadata,
        _args: &JobArguments,
    ) -> Result<()> {
        let path = PathBuf::from(task.require_str("path")?);
        builder.add_subtask(FileSizeTask { path });
        Ok(())
    }

    fn generate_report(&self, results: &[TaskResult], args: &JobArguments) -> Option<String> {
        let mut files: Vec<(&str, u64)> = results
            .iter()
            .filter(|r| r.is_from("FileSize"))
            .filter_map(|r| Some((r.data.get("name")?.as_str()?, r.data.get("size")?.as_u64()?)))
            .collect();
        files.sort();

        let mut report = String::new();
        let folder = args.get_str("input").unwrap_or_default();
        let _ = writeln!(report, "{} files in {}", files.len(), folder);
        for (name, size) in files {
            let _ = writeln!(report, "{}\t{} bytes", name, size);
        }
        Some(report)
    }
}

struct FileSizeTask {
    path: PathBuf,
}

#[async_trait]
impl Subtask for FileSizeTask {
    fn name(&self) -> &str {
        "FileSize"
    }

    fn task_description(&self) -> String {
        format!("Reading size of {}", self.path.display())
    }

    async fn work(&mut self, ctx: &mut SubtaskContext) -> Result<bool> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("Failed to stat {}", self.path.display()))?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        ctx.log(format!("{} is {} bytes", name, metadata.len()));
        ctx.set_results(json!({ "name": name, "size": metadata.len() }))?;
        Ok(true)
    }
}
