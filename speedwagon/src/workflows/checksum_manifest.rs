//! SHA-256 manifest of the files under a folder
//!
//! Runs in three steps: an initial task lists candidate files, the user picks
//! which ones to include, then one subtask per file computes its digest.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use speedwagon_sdk::options::file_pattern;
use speedwagon_sdk::{
    async_trait, AdditionalData, AdditionalInfoRequest, Capabilities, JobArguments, JobOption,
    OptionType, Subtask, SubtaskContext, TaskBuilder, TaskMetadata, TaskResult, Workflow,
    WorkflowDefinition, WorkflowMetadata,
};

#[derive(Debug, Clone, WorkflowDefinition)]
#[workflow(
    id = "checksum_manifest",
    name = "Generate Checksum Manifest",
    description = "Computes a SHA-256 digest for each file and writes a manifest"
)]
pub struct ChecksumOptions {
    #[field(label = "Input", description = "Folder to checksum", type = "directory")]
    pub input: PathBuf,

    #[field(
        label = "Recursive",
        description = "Include files in subfolders",
        type = "boolean",
        default = "false"
    )]
    pub recursive: bool,
}

pub struct ChecksumManifest;

/// Relative paths listed by the initial task
fn listed_files(initial_results: &[TaskResult]) -> Vec<String> {
    initial_results
        .iter()
        .filter(|r| r.is_from("ListFiles"))
        .filter_map(|r| r.data.get("files").and_then(Value::as_array))
        .flatten()
        .filter_map(|f| f.as_str().map(str::to_string))
        .collect()
}

impl Workflow for ChecksumManifest {
    fn metadata(&self) -> WorkflowMetadata {
        ChecksumOptions::metadata()
    }

    fn job_options(&self) -> Vec<JobOption> {
        ChecksumOptions::job_options()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
            .with_initial_task()
            .with_additional_info()
            .with_report()
    }

    fn initial_task(&self, builder: &mut TaskBuilder, args: &JobArguments) -> Result<()> {
        let opts = ChecksumOptions::from_job_arguments(args)?;
        builder.add_subtask(ListFilesTask {
            root: opts.input,
            recursive: opts.recursive,
        });
        Ok(())
    }

    fn additional_info_request(
        &self,
        initial_results: &[TaskResult],
        _args: &JobArguments,
    ) -> Result<AdditionalInfoRequest> {
        let count = listed_files(initial_results).len();
        Ok(AdditionalInfoRequest {
            prompt: format!("Found {} files. Which should go into the manifest?", count),
            fields: vec![
                JobOption::new("include", "Include", OptionType::Text)
                    .description("Wildcard pattern of files to include")
                    .with_default("*"),
                JobOption::new("exclude", "Exclude", OptionType::Text)
                    .description("Wildcard pattern of files to leave out")
                    .optional(),
            ],
        })
    }

    fn discover_task_metadata(
        &self,
        initial_results: &[TaskResult],
        additional_data: &AdditionalData,
        _args: &JobArguments,
    ) -> Result<Vec<TaskMetadata>> {
        let include = file_pattern("include", additional_data.get_str("include").unwrap_or("*"))?;
        let exclude = additional_data
            .get_str("exclude")
            .filter(|p| !p.trim().is_empty())
            .map(|p| file_pattern("exclude", p))
            .transpose()?;

        Ok(listed_files(initial_results)
            .into_iter()
            .filter(|f| include.matches(f))
            .filter(|f| !exclude.as_ref().is_some_and(|p| p.matches(f)))
            .map(|f| TaskMetadata::new().with("path", f))
            .collect())
    }

    fn create_new_task(
        &self,
        builder: &mut TaskBuilder,
        task: &TaskMetadata,
        args: &JobArguments,
    ) -> Result<()> {
        let opts = ChecksumOptions::from_job_arguments(args)?;
        builder.add_subtask(ChecksumTask {
            root: opts.input,
            relative: task.require_str("path")?.to_string(),
        });
        Ok(())
    }

    fn generate_report(&self, results: &[TaskResult], _args: &JobArguments) -> Option<String> {
        let mut lines: Vec<(&str, &str)> = results
            .iter()
            .filter(|r| r.is_from("Checksum"))
            .filter_map(|r| Some((r.data.get("path")?.as_str()?, r.data.get("sha256")?.as_str()?)))
            .collect();
        lines.sort();

        Some(
            lines
                .into_iter()
                .map(|(path, digest)| format!("{} *{}\n", digest, path))
                .collect(),
        )
    }
}

/// Files under `root` as `/`-separated relative paths, in name order
fn list_files(root: &Path, recursive: bool) -> Result<Vec<String>> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(parts.join("/"));
    }
    Ok(files)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

struct ListFilesTask {
    root: PathBuf,
    recursive: bool,
}

#[async_trait]
impl Subtask for ListFilesTask {
    fn name(&self) -> &str {
        "ListFiles"
    }

    fn task_description(&self) -> String {
        format!("Listing files in {}", self.root.display())
    }

    async fn work(&mut self, ctx: &mut SubtaskContext) -> Result<bool> {
        let root = self.root.clone();
        let recursive = self.recursive;
        let files = tokio::task::spawn_blocking(move || list_files(&root, recursive)).await??;

        ctx.log(format!("found {} files", files.len()));
        ctx.set_results(json!({ "files": files }))?;
        Ok(true)
    }
}

struct ChecksumTask {
    root: PathBuf,
    relative: String,
}

#[async_trait]
impl Subtask for ChecksumTask {
    fn name(&self) -> &str {
        "Checksum"
    }

    fn task_description(&self) -> String {
        format!("Calculating checksum for {}", self.relative)
    }

    async fn work(&mut self, ctx: &mut SubtaskContext) -> Result<bool> {
        let path = self.root.join(&self.relative);
        let digest = tokio::task::spawn_blocking(move || sha256_file(&path)).await??;

        ctx.set_results(json!({ "path": self.relative, "sha256": digest }))?;
        Ok(true)
    }
}
