//! Executing one job: build a client for its credential, crawl from its
//! resume state, and report how it went.

use std::sync::Arc;

use crawler::{
    CheckpointError, CheckpointFuture, Checkpointer, ClientFactory, CrawlConfig, CrawlRequest,
    CrawlRun, Crawler, OutputSink,
};
use db::repositories::{CredentialRepository, JobRepository};
use harvest_core::{Command, Job, JobId, JobProgress, ResumeState};
use tokio_util::sync::CancellationToken;

use crate::reconcile::{RunOutcome, RunReport};

/// Persists a running job's resume state through the job table.
pub struct JobCheckpointer {
    jobs: JobRepository,
    job_id: JobId,
}

impl JobCheckpointer {
    pub fn new(jobs: JobRepository, job_id: JobId) -> Self {
        Self { jobs, job_id }
    }
}

impl Checkpointer for JobCheckpointer {
    fn save<'a>(
        &'a self,
        state: &'a ResumeState,
        progress: &'a JobProgress,
    ) -> CheckpointFuture<'a> {
        Box::pin(async move {
            self.jobs
                .save_checkpoint(self.job_id, Some(state), progress)
                .await
                .map_err(|e| CheckpointError(format!("checkpoint of job {}: {e}", self.job_id)))
        })
    }
}

/// Runs jobs handed out by the scheduler. Shared by every runner actor.
pub struct JobRunner {
    jobs: JobRepository,
    credentials: CredentialRepository,
    clients: Arc<dyn ClientFactory>,
    sink: Arc<dyn OutputSink>,
    config: CrawlConfig,
}

impl JobRunner {
    pub fn new(
        db: db::Db,
        clients: Arc<dyn ClientFactory>,
        sink: Arc<dyn OutputSink>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            credentials: CredentialRepository::new(db),
            clients,
            sink,
            config,
        }
    }

    /// Crawl `job` until it completes, fails or `cancel` fires.
    ///
    /// Never returns an error: setup failures are reported as
    /// [`RunOutcome::Error`] so the scheduler can settle the job.
    pub async fn run(&self, job: &Job, cancel: CancellationToken) -> RunReport {
        let crawler = match self.crawler_for(job).await {
            Ok(crawler) => crawler,
            Err(message) => {
                tracing::warn!(job_id = %job.id, "cannot start job: {}", message);
                return RunReport::error(job, message);
            }
        };

        let progress = job.progress.clone().unwrap_or_default();
        let pages_before = progress.pages;
        let checkpointer = JobCheckpointer::new(self.jobs.clone(), job.id);
        let run = CrawlRun::new(
            Some(job.id),
            job.resume_state.clone().unwrap_or_default(),
            progress,
            &checkpointer,
            cancel,
        );

        tracing::info!(job_id = %job.id, command = %job.command, scope = ?job.scope_path, "job started");
        let (outcome, areas) = match job.command {
            Command::ScopeDiscovery => {
                let (areas, outcome) = crawler.discover(&run).await;
                (outcome, areas)
            }
            _ => (crawler.crawl(&CrawlRequest::from(job), &run).await, Vec::new()),
        };

        let (resume, progress) = run.finish();
        let report = RunReport {
            job_id: job.id,
            outcome: RunOutcome::from(outcome),
            made_progress: progress.pages > pages_before,
            resume,
            progress,
            areas,
        };
        tracing::info!(
            job_id = %job.id,
            outcome = ?report.outcome,
            pages = report.progress.pages,
            records = report.progress.records,
            "job stopped"
        );
        report
    }

    async fn crawler_for(&self, job: &Job) -> Result<Crawler, String> {
        let credential_id = job.owner.credential_id;
        let credential = self
            .credentials
            .get(credential_id)
            .await
            .map_err(|e| e.to_string())?;
        let token = self
            .credentials
            .token(credential_id)
            .await
            .map_err(|e| e.to_string())?;
        let client = self
            .clients
            .client(&credential, token)
            .map_err(|e| e.to_string())?;
        Ok(Crawler::new(client, self.sink.clone(), self.config.clone()))
    }
}
