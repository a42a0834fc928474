//! Per-job crawl state: resume cursors, progress and cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use chrono::Utc;
use harvest_core::{Cursor, JobId, JobProgress, ResumeKey, ResumeState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{CheckpointError, QueryError};

pub type CheckpointFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CheckpointError>> + Send + 'a>>;

/// Persists a job's resume state at page boundaries.
pub trait Checkpointer: Send + Sync {
    fn save<'a>(&'a self, state: &'a ResumeState, progress: &'a JobProgress)
    -> CheckpointFuture<'a>;
}

struct RunState {
    resume: ResumeState,
    progress: JobProgress,
}

/// State of one job's crawl, shared by every unit and enhancement of it.
pub struct CrawlRun<'a> {
    job_id: Option<JobId>,
    state: Mutex<RunState>,
    checkpointer: &'a dyn Checkpointer,
    cancel: CancellationToken,
    credential_failure: OnceLock<QueryError>,
}

impl<'a> CrawlRun<'a> {
    pub fn new(
        job_id: Option<JobId>,
        resume: ResumeState,
        progress: JobProgress,
        checkpointer: &'a dyn Checkpointer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            state: Mutex::new(RunState { resume, progress }),
            checkpointer,
            cancel,
            credential_failure: OnceLock::new(),
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cursor(&self, key: &ResumeKey) -> Option<Cursor> {
        self.state.lock().await.resume.cursor(key).cloned()
    }

    pub async fn is_complete(&self, key: &ResumeKey) -> bool {
        self.state.lock().await.resume.is_complete(key)
    }

    /// Record where `key` stands and persist the whole state.
    ///
    /// `None` marks the unit complete. A failed save is logged; the unit is
    /// then re-crawled from the previous checkpoint on resume.
    pub async fn checkpoint(&self, key: ResumeKey, cursor: Option<Cursor>) {
        let (resume, progress) = {
            let mut state = self.state.lock().await;
            match cursor {
                Some(cursor) => state.resume.record(key.clone(), cursor),
                None => state.resume.complete(key.clone()),
            }
            (state.resume.clone(), state.progress.clone())
        };

        if let Err(e) = self.checkpointer.save(&resume, &progress).await {
            tracing::warn!(job_id = ?self.job_id, %key, "{}", e);
        }
    }

    /// Count a page written to the sink.
    pub async fn record_page(&self, records: usize) {
        let mut state = self.state.lock().await;
        state.progress.pages += 1;
        state.progress.records += records as u64;
        state.progress.last_page_at = Some(Utc::now());
    }

    /// Remember a credential rejection so the rest of the run stops early.
    pub fn note_failure(&self, error: &QueryError) {
        if error.is_credential_failure() {
            let _ = self.credential_failure.set(error.clone());
        }
    }

    pub fn credential_failure(&self) -> Option<&QueryError> {
        self.credential_failure.get()
    }

    /// Final resume state and progress.
    pub fn finish(self) -> (ResumeState, JobProgress) {
        let state = self.state.into_inner();
        (state.resume, state.progress)
    }
}
