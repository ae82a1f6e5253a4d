#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use deepresearch::api::{ApiError, ResearchApi, StatusResponse, SubmitRequest, SubmitResponse};
use deepresearch::db::{event_repo, Database};
use deepresearch::error::ReportError;
use deepresearch::jobs::{JobManager, ManagerSettings};
use deepresearch::notices::NoticeBroadcaster;
use deepresearch::report::{ReportDocument, ReportWriter};

enum Scripted {
    Status(Value),
    Failure(u16, String),
}

/// Research service double that replays scripted responses.
///
/// Each job's status queue is consumed in order; the last entry repeats.
#[derive(Default)]
pub struct FakeResearchApi {
    submit_responses: Mutex<VecDeque<Value>>,
    statuses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fetches: Mutex<HashMap<String, usize>>,
    pub submitted: Mutex<Vec<SubmitRequest>>,
}

impl FakeResearchApi {
    pub fn push_submit(&self, response: Value) {
        self.submit_responses.lock().unwrap().push_back(response);
    }

    pub fn push_status(&self, job_id: &str, response: Value) {
        self.statuses
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push_back(Scripted::Status(response));
    }

    pub fn push_failure(&self, job_id: &str, status: u16, body: &str) {
        self.statuses
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push_back(Scripted::Failure(status, body.to_string()));
    }

    pub fn fetch_count(&self, job_id: &str) -> usize {
        self.fetches.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ResearchApi for FakeResearchApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError> {
        self.submitted.lock().unwrap().push(request.clone());
        let response = self
            .submit_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::status(500, "no submit response scripted"))?;
        serde_json::from_value(response).map_err(|e| ApiError::Decode {
            url: "fake://submit".to_string(),
            message: e.to_string(),
        })
    }

    async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, ApiError> {
        *self.fetches.lock().unwrap().entry(job_id.to_string()).or_default() += 1;

        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses
            .get_mut(job_id)
            .ok_or_else(|| ApiError::status(404, "unknown job"))?;
        let scripted = if queue.len() > 1 {
            queue.pop_front()
        } else {
            None
        };
        let current = match scripted.as_ref() {
            Some(s) => s,
            None => queue.front().ok_or_else(|| ApiError::status(404, "unknown job"))?,
        };

        match current {
            Scripted::Status(value) => serde_json::from_value(value.clone()).map_err(|e| ApiError::Decode {
                url: "fake://status".to_string(),
                message: e.to_string(),
            }),
            Scripted::Failure(status, body) => Err(ApiError::status(*status, body)),
        }
    }
}

/// Report writer that records documents instead of touching the disk.
#[derive(Default)]
pub struct RecordingReportWriter {
    pub documents: Mutex<Vec<ReportDocument>>,
    pub fail: AtomicBool,
}

impl RecordingReportWriter {
    pub fn written(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReportWriter for RecordingReportWriter {
    async fn write(&self, document: &ReportDocument) -> Result<PathBuf, ReportError> {
        let path = PathBuf::from(format!("/reports/{}.md", document.file_stem()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ReportError::WriteFile {
                path,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.documents.lock().unwrap().push(document.clone());
        Ok(path)
    }
}

pub struct Harness {
    pub api: Arc<FakeResearchApi>,
    pub reports: Arc<RecordingReportWriter>,
    pub db: Database,
    pub notices: NoticeBroadcaster,
    pub manager: JobManager,
}

pub fn harness() -> Harness {
    let api = Arc::new(FakeResearchApi::default());
    let reports = Arc::new(RecordingReportWriter::default());
    let db = Database::open_in_memory().expect("in-memory database");
    let notices = NoticeBroadcaster::new(32);
    let manager = JobManager::new(
        api.clone(),
        db.clone(),
        reports.clone(),
        notices.clone(),
        ManagerSettings::new(Duration::from_secs(1), Duration::from_secs(8), "tester"),
    );
    Harness {
        api,
        reports,
        db,
        notices,
        manager,
    }
}

pub fn count_events(db: &Database, job_id: &str, event_type: &str) -> u64 {
    event_repo::count_by_type(db, job_id, event_type).unwrap()
}

/// Waits (in virtual time when paused) until the job's loop has exited.
pub async fn wait_until_idle(manager: &JobManager, job_id: &str) {
    for _ in 0..10_000 {
        if !manager.is_polling(job_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("polling loop for {} never finished", job_id);
}
