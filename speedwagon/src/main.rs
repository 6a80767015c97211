use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use speedwagon::cli::{build_job_arguments, default_answer, Cli, Command};
use speedwagon::config::{export_job_config, import_job_config, load_settings, settings_file_path, Settings};
use speedwagon::report::render_summary;
use speedwagon::workflows::builtin_plugin;
use speedwagon::{InProcessRuntime, PluginRegistry};
use speedwagon_sdk::{
    AdditionalData, AdditionalInfoRequest, FullWorkflowMetadata, JobArguments, JobLog, JobRuntime,
    OptionType, RunOptions, RuntimeError,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "speedwagon={level},speedwagon_sdk={level}",
            level = cli.log_level()
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let settings_path = cli.settings.clone().unwrap_or_else(settings_file_path);
    let settings = load_settings(&settings_path)?;
    debug!(path = %settings_path.display(), ?settings, "loaded settings");

    let runtime = build_runtime(&settings)?;

    match cli.command {
        Command::List { json } => list(&runtime, json),
        Command::Show { workflow, json } => show(&runtime, &workflow, json),
        Command::Export {
            workflow,
            output,
            sets,
        } => {
            let metadata = runtime.get_workflow_metadata(&workflow)?;
            let args = build_job_arguments(&metadata.options, None, &sets)?;
            export_job_config(&output, &metadata.options, &args)?;
            println!("Wrote {}", output.display());
            Ok(())
        }
        Command::Run {
            workflow,
            config,
            sets,
            workers,
            yes,
        } => {
            let metadata = runtime.get_workflow_metadata(&workflow)?;
            let base = match &config {
                Some(path) => Some(import_job_config(path, &metadata.options)?),
                None => None,
            };
            let args = build_job_arguments(&metadata.options, base.as_ref(), &sets)?;
            run(&runtime, &workflow, args, RunOptions { max_workers: workers }, yes).await
        }
    }
}

fn build_runtime(settings: &Settings) -> Result<InProcessRuntime> {
    let registry = PluginRegistry::builder()
        .plugin(builtin_plugin())
        .disable(settings.disabled_plugins.iter().cloned())
        .build();

    let registry = if settings.strict_plugins {
        registry.into_strict().map_err(|problems| {
            let lines: Vec<String> = problems.iter().map(|p| format!("  {}", p)).collect();
            anyhow!("plugin discovery failed:\n{}", lines.join("\n"))
        })?
    } else {
        registry
    };

    info!(workflows = registry.len(), "registry ready");
    Ok(InProcessRuntime::new(registry).with_default_workers(settings.max_workers))
}

fn list(runtime: &InProcessRuntime, json: bool) -> Result<()> {
    let workflows = runtime.list_workflows();
    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    for workflow in &workflows {
        println!(
            "{:<30} {:<20} {}",
            workflow.metadata.name, workflow.metadata.id, workflow.metadata.description
        );
    }
    Ok(())
}

fn describe_type(option_type: &OptionType) -> String {
    match option_type {
        OptionType::Text => "text".to_string(),
        OptionType::Number { min, max } => match (min, max) {
            (Some(min), Some(max)) => format!("number {}..={}", min, max),
            (Some(min), None) => format!("number >= {}", min),
            (None, Some(max)) => format!("number <= {}", max),
            (None, None) => "number".to_string(),
        },
        OptionType::Boolean => "boolean".to_string(),
        OptionType::Choice { options } => format!("one of {}", options.join(", ")),
        OptionType::DirectorySelect => "directory".to_string(),
        OptionType::FileSelect { pattern: Some(p) } => format!("file matching {}", p),
        OptionType::FileSelect { pattern: None } => "file".to_string(),
    }
}

fn show(runtime: &InProcessRuntime, workflow: &str, json: bool) -> Result<()> {
    let metadata: FullWorkflowMetadata = runtime.get_workflow_metadata(workflow)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("{} ({})", metadata.metadata.name, metadata.metadata.id);
    if !metadata.metadata.description.is_empty() {
        println!("{}", metadata.metadata.description);
    }
    println!("Plugin: {}", metadata.plugin);
    println!("\nOptions:");
    for option in &metadata.options {
        let mut line = format!("  {} [{}]", option.label, describe_type(&option.option_type));
        if option.required {
            line.push_str(" required");
        }
        if let Some(default) = &option.default {
            line.push_str(&format!(" default={}", default));
        }
        if !option.description.is_empty() {
            line.push_str(&format!(" - {}", option.description));
        }
        println!("{}", line);
    }
    Ok(())
}

fn print_event(event: &JobLog) {
    match event {
        JobLog::TaskStarted {
            task_id,
            description,
            total_tasks,
            ..
        } => eprintln!("[{} of {}] {}", task_id, total_tasks, description),
        JobLog::TaskFailed { task_id, error } => eprintln!("[{}] failed: {}", task_id, error),
        JobLog::TasksDiscovered { count } => eprintln!("{} tasks to run", count),
        other => debug!(?other, "job event"),
    }
}

/// Ask for each field on stdin; blank input keeps the default
fn prompt_user(request: &AdditionalInfoRequest) -> Result<AdditionalData> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();
    let mut builder = JobArguments::builder(&request.fields);

    eprintln!("{}", request.prompt);
    for field in &request.fields {
        match &field.default {
            Some(default) => write!(stderr, "  {} [{}]: ", field.label, default)?,
            None => write!(stderr, "  {}: ", field.label)?,
        }
        stderr.flush()?;

        let mut line = String::new();
        stdin.lock().read_line(&mut line).context("Failed to read answer")?;
        let line = line.trim();
        if !line.is_empty() {
            builder = builder.set_raw(&field.name, line)?;
        }
    }
    Ok(builder.build()?)
}

async fn run(
    runtime: &InProcessRuntime,
    workflow: &str,
    args: JobArguments,
    options: RunOptions,
    accept_defaults: bool,
) -> Result<()> {
    let handle = runtime.execute_workflow(workflow, args, options).await?;
    let mut logs = runtime.subscribe_logs(&handle.id).await?;
    info!(job = %handle.id, workflow = %handle.workflow_id, "job started");

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let outcome = loop {
        tokio::select! {
            outcome = runtime.wait_for_outcome(&handle.id) => break outcome?,
            event = logs.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "log output fell behind"),
                Err(RecvError::Closed) => {}
            },
            _ = ticker.tick() => {
                let Some(request) = runtime.pending_additional_info(&handle.id).await? else {
                    continue;
                };
                let data = if accept_defaults {
                    match default_answer(&request) {
                        Ok(data) => data,
                        // Asking again would get the same answer
                        Err(e) => {
                            if let Err(cancel) = runtime.cancel_job(&handle.id).await {
                                warn!("cancel failed: {}", cancel);
                            }
                            bail!("cannot answer with defaults: {}", e);
                        }
                    }
                } else {
                    tokio::task::spawn_blocking(move || prompt_user(&request)).await??
                };
                match runtime.provide_additional_info(&handle.id, data).await {
                    Ok(()) => {}
                    // Ask again on the next tick
                    Err(RuntimeError::Configuration(e)) => eprintln!("{}", e),
                    Err(e) => return Err(e.into()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling, waiting for running tasks to finish...");
                if let Err(e) = runtime.cancel_job(&handle.id).await {
                    warn!("cancel failed: {}", e);
                }
            }
        }
    };

    loop {
        match logs.try_recv() {
            Ok(event) => print_event(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    print!("{}", render_summary(&outcome));
    if !outcome.is_success() {
        bail!("job did not complete");
    }
    Ok(())
}
