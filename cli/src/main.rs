//! `deepresearch` command line front-end.
//!
//! ```bash
//! deepresearch submit "state of rust async runtimes" -d notes/runtimes.md
//! deepresearch resume
//! deepresearch jobs --status running
//! deepresearch events <job-id>
//! deepresearch show <job-id> --write-report
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;

use deepresearch::config::LogFormat;
use deepresearch::db::{event_repo, job_repo, JobFilter, JobRow};
use deepresearch::logging::{init_tracing, LoggingOptions};
use deepresearch::secrets::expand_home;
use deepresearch::{
    load_config, Database, HttpResearchClient, JobManager, JobNotice, ManagerSettings,
    MarkdownReportWriter, NoticeBroadcaster, ResearchConfig, SubmitJob,
    TaggedDocument,
};

mod args;

use args::{Cli, Command};

/// How often the front-end checks whether its loops are done.
const WAIT_TICK: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = expand_home(&cli.config.to_string_lossy());
    let config = load_config(&config_path).with_context(|| format!("Failed to load config from {}", config_path))?;

    let mut logging = LoggingOptions::from(&config.logging);
    logging.verbose = cli.verbose;
    if cli.json_logs {
        logging.format = LogFormat::Json;
    }
    init_tracing(&logging);

    let database_path = config.database_path()?;
    let db = Database::open(&database_path)
        .with_context(|| format!("Failed to open database at {}", database_path.display()))?;

    match cli.command {
        Command::Jobs { status, limit, offset } => list_jobs(&db, status, limit, offset),
        Command::Events { job_id } => print_events(&db, &job_id),
        Command::Show { job_id, write_report } => {
            if write_report {
                let manager = build_manager(&config, db.clone())?;
                match manager.materialize_report(&job_id).await? {
                    Some(path) => println!("Report written to {}", path.display()),
                    None => println!("No report written"),
                }
            }
            show_job(&db, &job_id)
        }
        Command::Resume { limit } => {
            let manager = build_manager(&config, db)?;
            let started = manager.resume_incomplete_jobs(limit.unwrap_or(config.resume_limit))?;
            if started.is_empty() {
                println!("No incomplete jobs to resume");
                return Ok(());
            }
            println!("Resumed {} job(s)", started.len());
            wait_for_jobs(&manager).await;
            Ok(())
        }
        Command::Submit {
            prompt,
            optimized_prompt,
            documents,
            model,
            priority,
            max_retries,
            no_wait,
        } => {
            let manager = build_manager(&config, db)?;
            let mut job = SubmitJob::new(prompt);
            job.optimized_prompt = optimized_prompt;
            job.meta.model = model;
            job.meta.priority = priority;
            job.meta.max_retries = max_retries;
            job.tagged_documents = documents
                .iter()
                .map(|path| TaggedDocument::from_path(path.to_string_lossy()))
                .collect();

            let row = manager.submit_job(job).await?;
            println!("Submitted job {} ({})", row.id, row.status);
            if no_wait {
                manager.shutdown().await;
                return Ok(());
            }
            wait_for_jobs(&manager).await;
            show_job(manager.database(), &row.id)
        }
    }
}

fn build_manager(config: &ResearchConfig, db: Database) -> Result<JobManager> {
    let api = HttpResearchClient::from_config(config)?;
    let reports = MarkdownReportWriter::new(config.report_directory());
    let notices = NoticeBroadcaster::default();
    tokio::spawn(print_notices(notices.subscribe()));

    Ok(JobManager::new(
        Arc::new(api),
        db,
        Arc::new(reports),
        notices,
        ManagerSettings::from_config(config),
    ))
}

async fn print_notices(mut rx: broadcast::Receiver<JobNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => eprintln!("[{}] {}: {}", notice.level, notice.job_id, notice.message),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Blocks until every polling loop has finished or Ctrl-C is pressed.
async fn wait_for_jobs(manager: &JobManager) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if manager.active_jobs().is_empty() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(WAIT_TICK) => {}
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping polling loops");
                manager.shutdown().await;
                return;
            }
        }
    }
}

fn list_jobs(db: &Database, status: Option<String>, limit: u64, offset: u64) -> Result<()> {
    let filter = JobFilter {
        status,
        limit: Some(limit),
        offset: Some(offset),
        ..Default::default()
    };
    let (jobs, total) = job_repo::query(db, &filter)?;
    for job in &jobs {
        println!(
            "{:<38} {:<10} {:>4}  {}",
            job.id,
            job.status,
            job.progress.map(|p| format!("{}%", p)).unwrap_or_else(|| "-".to_string()),
            job.title.as_deref().unwrap_or(&job.instructions)
        );
    }
    println!("{} of {} job(s)", jobs.len(), total);
    Ok(())
}

fn print_events(db: &Database, job_id: &str) -> Result<()> {
    if job_repo::find_by_id(db, job_id)?.is_none() {
        bail!("Job '{}' not found", job_id);
    }
    for event in event_repo::list_by_job(db, job_id)? {
        let progress = event.progress.map(|p| format!(" [{}%]", p)).unwrap_or_default();
        println!("{} {:<16} {}{}", event.created_at, event.event_type, event.message, progress);
    }
    Ok(())
}

fn show_job(db: &Database, job_id: &str) -> Result<()> {
    let Some(job) = job_repo::find_by_id(db, job_id)? else {
        bail!("Job '{}' not found", job_id);
    };
    println!("{}", serde_json::to_string_pretty(&job_summary(&job))?);
    Ok(())
}

fn job_summary(job: &JobRow) -> serde_json::Value {
    serde_json::json!({
        "id": job.id,
        "status": job.status,
        "progress": job.progress,
        "title": job.title,
        "summary": job.summary,
        "citation_count": job.citation_count,
        "error": job.error,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "completed_at": job.completed_at,
        "report_note_path": job.report_note_path,
    })
}
