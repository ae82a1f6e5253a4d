use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Submit research jobs and follow them until the report is written.
#[derive(Parser, Debug)]
#[command(name = "deepresearch")]
#[command(version, about = "Client for long-running remote research jobs", long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long = "config", default_value = "~/.deepresearch/config.json")]
    pub config: PathBuf,

    /// Enable debug logging for this crate
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a new job and poll it until it finishes
    Submit {
        /// Research prompt
        prompt: String,

        /// Rewritten prompt sent instead of the original
        #[arg(long = "optimized")]
        optimized_prompt: Option<String>,

        /// Documents whose contents accompany the prompt
        #[arg(short = 'd', long = "document")]
        documents: Vec<PathBuf>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long = "max-retries")]
        max_retries: Option<u32>,

        /// Return right after submission instead of polling
        #[arg(long = "no-wait")]
        no_wait: bool,
    },

    /// Resume polling for stored jobs that have not finished
    Resume {
        /// Maximum number of jobs to resume (defaults to the config value)
        #[arg(long)]
        limit: Option<u64>,
    },

    /// List stored jobs
    Jobs {
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u64,

        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Print the event log of a job
    Events {
        job_id: String,
    },

    /// Show one job, optionally writing its report if missing
    Show {
        job_id: String,

        /// Write the report now if the job completed without one
        #[arg(long = "write-report")]
        write_report: bool,
    },
}
