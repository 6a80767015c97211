//! Command line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use speedwagon_sdk::{
    validate_job_arguments, AdditionalData, AdditionalInfoRequest, ConfigurationError, JobArguments,
    JobOption,
};

#[derive(Parser, Debug)]
#[command(name = "speedwagon", version, about = "Run batch workflows over folders of files")]
pub struct Cli {
    /// Settings file (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// More diagnostics on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered workflows
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show a workflow's options
    Show {
        workflow: String,
        #[arg(long)]
        json: bool,
    },

    /// Run a workflow to completion
    Run {
        workflow: String,

        /// Job configuration file to start from
        #[arg(long)]
        config: Option<PathBuf>,

        /// Set an option by label or name
        #[arg(long = "set", value_name = "LABEL=VALUE", value_parser = parse_assignment)]
        sets: Vec<(String, String)>,

        /// Worker pool size for this job
        #[arg(long)]
        workers: Option<usize>,

        /// Accept defaults when the job asks for more information
        #[arg(short, long)]
        yes: bool,
    },

    /// Write a job configuration file
    Export {
        workflow: String,

        #[arg(short, long)]
        output: PathBuf,

        /// Set an option by label or name
        #[arg(long = "set", value_name = "LABEL=VALUE", value_parser = parse_assignment)]
        sets: Vec<(String, String)>,
    },
}

impl Cli {
    /// Default tracing directive for the verbosity flag
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Parse `LABEL=VALUE`; the value may itself contain `=`
pub fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((label, value)) if !label.trim().is_empty() => {
            Ok((label.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected LABEL=VALUE, got '{}'", s)),
    }
}

/// Merge an imported configuration with `--set` overrides; later sets win
pub fn build_job_arguments(
    options: &[JobOption],
    base: Option<&JobArguments>,
    sets: &[(String, String)],
) -> Result<JobArguments, ConfigurationError> {
    let mut builder = JobArguments::builder(options);
    if let Some(base) = base {
        for (name, value) in base.iter() {
            builder = builder.set(name, value.clone())?;
        }
    }
    for (label, value) in sets {
        builder = builder.set_by_label(label, value.as_str())?;
    }
    builder.build()
}

/// Answer for `--yes`: the request's defaults, which must satisfy its fields
pub fn default_answer(request: &AdditionalInfoRequest) -> Result<AdditionalData, ConfigurationError> {
    let data = request.defaults()?;
    validate_job_arguments(&request.fields, &data)?;
    Ok(data)
}
