//! Job lifecycle manager.
//!
//! Owns one polling task per in-flight job. Each tick fetches the remote
//! status, ingests new sub-events, merges the job row, records lifecycle
//! events on change, and on completion writes the report note once.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::prompt::SubmitJob;
use super::state_cache::{JobSnapshot, JobStateCache};
use super::status::JobStatus;
use crate::api::{ResearchApi, StatusResponse};
use crate::config::ResearchConfig;
use crate::db::{event_repo, job_repo, Database, JobRow, JobUpsert};
use crate::error::{ResearchError, Result};
use crate::events::lifecycle;
use crate::events::{ingest_events, IngestContext};
use crate::notices::NoticeBroadcaster;
use crate::probe;
use crate::report::{extract_from_normalized, ExtractedReportData, ReportDocument, ReportWriter};

/// Polling never runs faster than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Exponent cap for the failure backoff.
const MAX_BACKOFF_EXPONENT: u32 = 16;

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    /// Owner recorded on jobs submitted without an explicit user.
    pub user_id: String,
}

impl ManagerSettings {
    /// Clamps `poll_interval` to [`MIN_POLL_INTERVAL`].
    pub fn new(poll_interval: Duration, max_backoff: Duration, user_id: impl Into<String>) -> Self {
        let poll_interval = if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = poll_interval.as_millis() as u64,
                minimum_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "Poll interval below minimum, clamping"
            );
            MIN_POLL_INTERVAL
        } else {
            poll_interval
        };
        Self {
            poll_interval,
            max_backoff: max_backoff.max(poll_interval),
            user_id: user_id.into(),
        }
    }

    pub fn from_config(config: &ResearchConfig) -> Self {
        Self::new(config.poll_interval(), config.max_backoff(), config.user_id.clone())
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60), "local")
    }
}

/// Delay before the next tick after `failures` consecutive failed ticks:
/// `interval * 2^failures`, capped at `max`.
pub fn backoff_delay(interval: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 2u32.saturating_pow(failures.min(MAX_BACKOFF_EXPONENT));
    interval.saturating_mul(factor).min(max.max(interval))
}

/// What one poll tick concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Job still in flight.
    Continue,
    /// Terminal status reached; polling stopped.
    Terminal,
    /// The status fetch failed; the job row is unchanged.
    FetchFailed,
}

struct PollHandle {
    generation: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ManagerInner {
    api: Arc<dyn ResearchApi>,
    db: Database,
    reports: Arc<dyn ReportWriter>,
    notices: NoticeBroadcaster,
    cache: JobStateCache,
    settings: ManagerSettings,
    pollers: Mutex<HashMap<String, PollHandle>>,
    next_generation: Mutex<u64>,
    tick_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    empty_report_warned: Mutex<HashSet<String>>,
}

/// Submits research jobs and keeps them in sync with the remote service.
///
/// Cloning is cheap; clones share the same polling tasks.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    pub fn new(
        api: Arc<dyn ResearchApi>,
        db: Database,
        reports: Arc<dyn ReportWriter>,
        notices: NoticeBroadcaster,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                api,
                db,
                reports,
                notices,
                cache: JobStateCache::new(),
                settings,
                pollers: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
                tick_locks: Mutex::new(HashMap::new()),
                empty_report_warned: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn notices(&self) -> &NoticeBroadcaster {
        &self.inner.notices
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn state_cache(&self) -> &JobStateCache {
        &self.inner.cache
    }

    /// Submits a job, records it with a `job_submitted` event and starts
    /// polling. Submission failures are returned as-is, without retry.
    pub async fn submit_job(&self, job: SubmitJob) -> Result<JobRow> {
        if job.instructions().is_empty() {
            return Err(ResearchError::InvalidRequest("prompt is empty".to_string()));
        }

        let request = job.to_request().await;
        let response = self.inner.api.submit(&request).await?;

        let now = now_iso();
        let job_id = response.job_id.trim().to_string();
        let status = JobStatus::parse(response.status.as_deref().unwrap_or("pending"));
        let user_id = job
            .meta
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.inner.settings.user_id.clone());
        let created_at = response
            .created_at
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| now.clone());

        let patch = JobUpsert {
            user_id: Some(user_id.clone()),
            instructions: Some(request.instructions.clone()),
            original_query: Some(job.prompt.trim().to_string()),
            status: Some(status.as_str().to_string()),
            progress: Some(0),
            priority: response.priority_label().or_else(|| job.meta.priority.clone()),
            created_at: Some(created_at.clone()),
            ..JobUpsert::new(job_id.clone())
        };
        let row = job_repo::upsert(&self.inner.db, patch, &now)?;

        let details = serde_json::to_value(&response).ok();
        event_repo::insert_if_absent(
            &self.inner.db,
            &lifecycle::submitted(&job_id, &user_id, status.as_str(), details.as_ref(), &created_at),
        )?;

        self.inner.cache.record(
            &job_id,
            JobSnapshot {
                status: Some(status.as_str().to_string()),
                progress: Some(0),
                event_count: Some(0),
            },
        );

        info!(
            job_id = %job_id,
            status = %status,
            documents = request.tagged_documents.len(),
            "Research job submitted"
        );

        self.start_polling(&job_id);
        Ok(row)
    }

    /// Resumes polling for stored jobs that have not reached a terminal
    /// status. Returns the ids whose loops were started.
    pub fn resume_incomplete_jobs(&self, limit: u64) -> Result<Vec<String>> {
        let jobs = job_repo::list_incomplete(&self.inner.db, limit)?;
        let started: Vec<String> = jobs
            .into_iter()
            .filter(|job| self.start_polling(&job.id))
            .map(|job| job.id)
            .collect();

        if !started.is_empty() {
            info!(count = started.len(), "Resumed polling for incomplete research jobs");
        }
        Ok(started)
    }

    /// Starts the polling loop for a job. Returns `false` when a loop is
    /// already running. Must be called inside a tokio runtime.
    pub fn start_polling(&self, job_id: &str) -> bool {
        let mut pollers = lock(&self.inner.pollers);
        if let Some(existing) = pollers.get(job_id) {
            if !existing.task.is_finished() {
                return false;
            }
        }

        let generation = {
            let mut next = lock(&self.inner.next_generation);
            *next += 1;
            *next
        };
        let (stop, stop_rx) = watch::channel(false);
        let manager = self.clone();
        let id = job_id.to_string();
        let task = tokio::spawn(async move { manager.run_poll_loop(id, generation, stop_rx).await });

        // the lock is still held, so the loop cannot remove its entry
        // before it is inserted
        pollers.insert(
            job_id.to_string(),
            PollHandle {
                generation,
                stop,
                task,
            },
        );
        debug!(job_id, "Polling started");
        true
    }

    /// Stops future ticks for a job. An in-flight fetch is not aborted.
    /// Returns `false` when the job was not being polled.
    pub fn stop_polling(&self, job_id: &str) -> bool {
        let removed = lock(&self.inner.pollers).remove(job_id);
        match removed {
            Some(handle) => {
                let _ = handle.stop.send(true);
                debug!(job_id, "Polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.inner.pollers)
            .get(job_id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Ids of jobs with a live polling loop, sorted.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.pollers)
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stops every loop and waits for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, PollHandle)> = lock(&self.inner.pollers).drain().collect();
        for (_, handle) in &handles {
            let _ = handle.stop.send(true);
        }
        for (job_id, handle) in handles {
            if let Err(e) = handle.task.await {
                warn!(job_id = %job_id, error = %e, "Polling task ended abnormally");
            }
        }
        info!("Job manager shut down");
    }

    async fn run_poll_loop(self, job_id: String, generation: u64, mut stop_rx: watch::Receiver<bool>) {
        let settings = self.inner.settings.clone();
        let mut failures: u32 = 0;
        let mut finished = false;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let outcome = self
                .poll_once(&job_id)
                .instrument(info_span!("poll_tick", job_id = %job_id))
                .await;

            let delay = match outcome {
                Ok(TickOutcome::Terminal) => {
                    finished = true;
                    break;
                }
                Ok(TickOutcome::Continue) => {
                    failures = 0;
                    settings.poll_interval
                }
                Ok(TickOutcome::FetchFailed) => {
                    failures = failures.saturating_add(1);
                    backoff_delay(settings.poll_interval, settings.max_backoff, failures)
                }
                Err(ResearchError::JobNotFound(_)) => {
                    warn!(job_id = %job_id, "Job no longer stored, stopping its polling loop");
                    lock(&self.inner.empty_report_warned).remove(&job_id);
                    finished = true;
                    break;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    error!(job_id = %job_id, error = %e, "Poll tick failed");
                    backoff_delay(settings.poll_interval, settings.max_backoff, failures)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let mut pollers = lock(&self.inner.pollers);
        if pollers.get(&job_id).is_some_and(|h| h.generation == generation) {
            pollers.remove(&job_id);
        }
        drop(pollers);
        if finished {
            self.release_job_state(&job_id);
        }
        debug!(job_id = %job_id, "Polling loop exited");
    }

    /// Drops the cached snapshot and the idle tick lock of a job whose
    /// loop ended for good. The empty-report marker is kept so the warning
    /// stays one-time for the job.
    fn release_job_state(&self, job_id: &str) {
        self.inner.cache.remove(job_id);
        let mut tick_locks = lock(&self.inner.tick_locks);
        if tick_locks
            .get(job_id)
            .is_some_and(|tick_lock| Arc::strong_count(tick_lock) == 1)
        {
            tick_locks.remove(job_id);
        }
    }

    /// Number of jobs with a tick lock currently allocated.
    pub fn tracked_tick_locks(&self) -> usize {
        lock(&self.inner.tick_locks).len()
    }

    fn tick_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.inner.tick_locks)
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    /// Runs one poll tick now. Ticks for the same job never overlap.
    pub async fn poll_once(&self, job_id: &str) -> Result<TickOutcome> {
        let tick_lock = self.tick_lock(job_id);
        let _guard = tick_lock.lock().await;
        self.poll_tick(job_id).await
    }

    async fn poll_tick(&self, job_id: &str) -> Result<TickOutcome> {
        let db = &self.inner.db;
        let Some(existing) = job_repo::find_by_id(db, job_id)? else {
            self.stop_polling(job_id);
            return Err(ResearchError::JobNotFound(job_id.to_string()));
        };

        let response = match self.inner.api.fetch_status(job_id).await {
            Ok(response) => response,
            Err(e) => {
                warn!(job_id, error = %e, "Status check failed");
                let event = lifecycle::status_error(job_id, &existing.user_id, &e.to_string(), &now_iso());
                event_repo::insert_if_absent(db, &event)?;
                return Ok(TickOutcome::FetchFailed);
            }
        };

        let now = now_iso();
        let status = JobStatus::parse(response.status.as_deref().unwrap_or(&existing.status));
        let normalized = probe::normalize_results(response.results.as_ref());
        let report = normalized
            .as_ref()
            .map(extract_from_normalized)
            .unwrap_or_default();

        let ctx = IngestContext {
            job_id,
            user_id: &existing.user_id,
            polled_at: &now,
        };
        let ingest = ingest_events(db, normalized.as_ref(), self.inner.cache.event_cursor(job_id), &ctx)?;

        let patch = build_patch(job_id, &existing, &status, &response, &report, &now);
        let job = job_repo::upsert(db, patch, &now)?;

        let changed = self.inner.cache.has_changed(job_id, &job.status, job.progress);
        self.inner.cache.record(
            job_id,
            JobSnapshot {
                status: Some(job.status.clone()),
                progress: job.progress,
                event_count: Some(ingest.next_cursor()),
            },
        );
        if changed {
            let event = lifecycle::progress_changed(job_id, &job.user_id, &job.status, job.progress, &now);
            event_repo::insert_if_absent(db, &event)?;
            info!(job_id, status = %job.status, progress = ?job.progress, "Research job progressed");
        }

        if !status.is_terminal() {
            return Ok(TickOutcome::Continue);
        }

        self.stop_polling(job_id);
        info!(job_id, status = %status, "Research job reached terminal status");
        if status == JobStatus::Completed {
            if let Err(e) = self.write_report_once(&job).await {
                error!(job_id, error = %e, "Failed to materialize research report");
                self.inner
                    .notices
                    .error(job_id, &format!("Could not write the research report: {}", e));
            }
        }
        Ok(TickOutcome::Terminal)
    }

    /// Writes the report for a completed job if none was written yet.
    /// Returns the new note path, or `None` when nothing was written.
    pub async fn materialize_report(&self, job_id: &str) -> Result<Option<PathBuf>> {
        let tick_lock = self.tick_lock(job_id);
        let _guard = tick_lock.lock().await;

        let job = job_repo::find_by_id(&self.inner.db, job_id)?
            .ok_or_else(|| ResearchError::JobNotFound(job_id.to_string()))?;
        if JobStatus::parse(&job.status) != JobStatus::Completed {
            debug!(job_id, status = %job.status, "Job not completed, no report to write");
            return Ok(None);
        }
        self.write_report_once(&job).await
    }

    async fn write_report_once(&self, job: &JobRow) -> Result<Option<PathBuf>> {
        if let Some(path) = &job.report_note_path {
            debug!(job_id = %job.id, path = %path, "Report already written");
            return Ok(None);
        }

        let Some(document) = ReportDocument::from_job(job) else {
            if lock(&self.inner.empty_report_warned).insert(job.id.clone()) {
                warn!(job_id = %job.id, "Completed research job has no report content");
                self.inner.notices.warn(
                    &job.id,
                    "Research finished, but the report is empty. No note was created.",
                );
            }
            return Ok(None);
        };

        let path = self.inner.reports.write(&document).await?;
        let path_text = path.to_string_lossy().into_owned();
        let now = now_iso();

        if !job_repo::set_report_note_path(&self.inner.db, &job.id, &path_text, &now)? {
            warn!(job_id = %job.id, path = %path_text, "Job already had a report path; keeping the stored one");
            return Ok(None);
        }

        event_repo::insert_if_absent(
            &self.inner.db,
            &lifecycle::report_written(&job.id, &job.user_id, &path_text, &now),
        )?;
        info!(job_id = %job.id, path = %path_text, "Research report written");
        self.inner
            .notices
            .info(&job.id, &format!("Research report saved to {}", path_text));
        Ok(Some(path))
    }
}

/// Derives the job patch for one successful status response.
fn build_patch(
    job_id: &str,
    existing: &JobRow,
    status: &JobStatus,
    response: &StatusResponse,
    report: &ExtractedReportData,
    now: &str,
) -> JobUpsert {
    let results = match &response.results {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    };

    let started_at = response.started_at.clone().filter(|s| !s.trim().is_empty()).or_else(|| {
        (existing.started_at.is_none() && (*status == JobStatus::Running || status.is_terminal()))
            .then(|| now.to_string())
    });
    let completed_at = response.completed_at.clone().filter(|s| !s.trim().is_empty()).or_else(|| {
        (existing.completed_at.is_none() && status.is_terminal()).then(|| now.to_string())
    });

    JobUpsert {
        status: Some(status.as_str().to_string()),
        progress: probe::clamp_progress(response.progress.as_ref()),
        results,
        title: report.title.clone(),
        summary: report.summary.clone(),
        processed_markdown: report.processed_markdown.clone(),
        citation_count: report.citation_count,
        sections: report.sections_json(),
        enhanced_content: report.enhanced_content.clone(),
        current_section_index: report.current_section_index,
        total_sections: report.total_sections,
        exa_research_id: response.exa_task_id().or_else(|| report.research_id.clone()),
        error: response.error_text(),
        priority: response.priority_label(),
        started_at,
        completed_at,
        ..JobUpsert::new(job_id)
    }
}
