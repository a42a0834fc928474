//! Job scheduling against the job table: claiming work, settling finished
//! runs, turning discoveries into jobs, and the credential side-chain.

use db::Db;
use db::repositories::{
    AreaRepository, CredentialRepository, IncidentRepository, JobRepository,
};
use harvest_core::{Area, Command, CredentialId, Incident, Job, JobId, JobStatus};
use secrecy::SecretString;
use serde_json::json;

use crate::reconcile::{Decision, RunOutcome, RunReport, reconcile};
use crate::sync::{SyncPlan, plan_sync, synthesize_candidates};
use crate::{ActorError, ActorResult};

/// Rows written by one job sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: u64,
    pub reset: u64,
}

/// Owns every job-row mutation outside of checkpointing.
#[derive(Clone)]
pub struct Scheduler {
    jobs: JobRepository,
    areas: AreaRepository,
    credentials: CredentialRepository,
    incidents: IncidentRepository,
}

impl Scheduler {
    pub fn new(db: Db) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            areas: AreaRepository::new(db.clone()),
            credentials: CredentialRepository::new(db.clone()),
            incidents: IncidentRepository::new(db),
        }
    }

    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    /// Return jobs left `running` by a previous process to the queue.
    pub async fn recover(&self) -> ActorResult<u64> {
        let requeued = self.jobs.requeue_stale().await?;
        if requeued > 0 {
            tracing::warn!(requeued, "requeued jobs left running by a previous process");
        }
        Ok(requeued)
    }

    /// Schedule scope discovery for a credential.
    ///
    /// Discovery is unique per credential account: an existing discovery job
    /// is returned as is, or reset when it failed.
    pub async fn enqueue_discovery(&self, credential_id: CredentialId) -> ActorResult<Job> {
        let credential = self.credentials.get(credential_id).await?;
        let job = Job::discovery(credential.owner());

        if let Some(existing) = self.jobs.find_by_dedup_key(&job.dedup_key()).await? {
            if existing.status == JobStatus::Failed {
                tracing::info!(job_id = %existing.id, "resetting failed discovery");
                return Ok(self.jobs.transition(existing.id, JobStatus::Queued).await?);
            }
            tracing::info!(job_id = %existing.id, status = %existing.status, "discovery already scheduled");
            return Ok(existing);
        }

        let job = self.jobs.create(&job).await?;
        tracing::info!(job_id = %job.id, account = %credential.account, "discovery enqueued");
        Ok(job)
    }

    /// Mark the oldest runnable job running and hand it out.
    pub async fn claim_next(&self) -> ActorResult<Option<Job>> {
        let Some(job) = self.jobs.next_runnable().await? else {
            return Ok(None);
        };
        let job = self.jobs.transition(job.id, JobStatus::Running).await?;
        tracing::debug!(job_id = %job.id, command = %job.command, "job claimed");
        Ok(Some(job))
    }

    /// Persist a run's resume state and move the job to its next status.
    ///
    /// A job is never left `running` by a failed settle: it is moved back to
    /// the queue or to `failed` before the error is returned.
    pub async fn settle(&self, report: RunReport) -> ActorResult<Job> {
        let job_id = report.job_id;
        let made_progress = report.made_progress;
        match self.apply_report(report).await {
            Ok(job) => Ok(job),
            Err(e) => {
                tracing::error!(%job_id, "failed to settle job: {}", e);
                self.release(job_id, made_progress).await?;
                Err(e)
            }
        }
    }

    /// Settle a job whose runner stopped without reporting, as if it ended
    /// with `outcome`. The job's last checkpoint is where it resumes.
    pub async fn abandon(
        &self,
        job_id: JobId,
        pages_at_claim: u64,
        outcome: RunOutcome,
    ) -> ActorResult<Job> {
        let job = self.jobs.get(job_id).await?;
        let progress = job.progress.clone().unwrap_or_default();
        let report = RunReport {
            job_id,
            outcome,
            resume: job.resume_state.clone().unwrap_or_default(),
            made_progress: progress.pages > pages_at_claim,
            progress,
            areas: Vec::new(),
        };
        self.settle(report).await
    }

    async fn apply_report(&self, report: RunReport) -> ActorResult<Job> {
        let job = self.jobs.get(report.job_id).await?;
        let mut decision = reconcile(job.status, &report.outcome, report.made_progress);

        if job.command == Command::ScopeDiscovery {
            let finished = decision.target() == Some(JobStatus::Finished);
            if let Err(e) = self.store_discovery(&job, &report.areas, finished).await {
                tracing::warn!(job_id = %job.id, "discovery results not stored: {}", e);
                if finished {
                    decision = Decision::unfinished(report.made_progress);
                }
            }
        }

        let mut resume = report.resume;
        if decision.clear_resume {
            resume.clear_scope(job.scope_path.as_deref());
        }
        self.jobs
            .save_checkpoint(job.id, Some(&resume), &report.progress)
            .await?;

        if let RunOutcome::CredentialRejected(reason) = &report.outcome {
            tracing::warn!(
                job_id = %job.id,
                credential_id = %job.owner.credential_id,
                "credential rejected: {}",
                reason
            );
            self.credentials.mark_expired(job.owner.credential_id).await?;
        }

        let mut settled = job;
        for next in decision.path {
            settled = self.jobs.transition(settled.id, *next).await?;
        }
        tracing::info!(job_id = %settled.id, status = %settled.status, "job settled");
        Ok(settled)
    }

    /// Upsert a discovery's areas, and synthesize jobs once it finished.
    /// A finished discovery that found nothing still yields the global jobs.
    async fn store_discovery(&self, job: &Job, areas: &[Area], finished: bool) -> ActorResult<()> {
        let areas = if areas.is_empty() {
            Vec::new()
        } else {
            self.areas.upsert_many(areas).await?
        };
        if finished {
            self.sync_discovery(job, &areas).await?;
        }
        Ok(())
    }

    /// Move a job still `running` off that status after settling it failed.
    async fn release(&self, job_id: JobId, made_progress: bool) -> ActorResult<()> {
        let job = self.jobs.get(job_id).await?;
        if job.status != JobStatus::Running {
            return Ok(());
        }
        let decision = Decision::unfinished(made_progress);
        for next in decision.path {
            self.jobs.transition(job_id, *next).await?;
        }
        tracing::warn!(%job_id, status = ?decision.target(), "released job after failed settle");
        Ok(())
    }

    /// Turn a discovery's areas into jobs.
    pub async fn sync_discovery(&self, discovery: &Job, areas: &[Area]) -> ActorResult<SyncReport> {
        let candidates = synthesize_candidates(discovery, areas);
        let existing = self.jobs.list_for_provider(&discovery.owner.provider).await?;
        let plan = plan_sync(&existing, candidates);
        tracing::info!(
            job_id = %discovery.id,
            areas = areas.len(),
            inserts = plan.inserts.len(),
            resets = plan.resets.len(),
            "job sync planned"
        );
        self.apply_sync(plan).await
    }

    /// Write a sync plan. Row-count mismatches are recorded as incidents and
    /// do not fail the sync.
    pub async fn apply_sync(&self, plan: SyncPlan) -> ActorResult<SyncReport> {
        let mut report = SyncReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        if !plan.inserts.is_empty() {
            report.inserted = self.jobs.insert_ignore(&plan.inserts).await?;
            let expected = plan.inserts.len() as u64;
            if report.inserted != expected {
                let keys: Vec<String> = plan.inserts.iter().map(Job::dedup_key).collect();
                self.incident("insert_jobs", expected, report.inserted, json!({ "dedup_keys": keys }))
                    .await;
            }
        }

        if !plan.resets.is_empty() {
            report.reset = self.jobs.reset_failed(&plan.resets).await?;
            let expected = plan.resets.len() as u64;
            if report.reset != expected {
                let ids: Vec<String> = plan.resets.iter().map(JobId::to_string).collect();
                self.incident("reset_jobs", expected, report.reset, json!({ "job_ids": ids }))
                    .await;
            }
        }
        Ok(report)
    }

    async fn incident(&self, operation: &str, expected: u64, actual: u64, payload: serde_json::Value) {
        let incident = Incident::new(operation, expected, actual, payload);
        if let Err(e) = self.incidents.record(&incident).await {
            tracing::error!(operation, expected, actual, "failed to record incident: {}", e);
        }
    }

    /// Pause a queued, renewed or running job. A running job's crawl stops at
    /// its next page boundary.
    pub async fn pause(&self, id: JobId) -> ActorResult<Job> {
        let job = self.jobs.transition(id, JobStatus::Paused).await?;
        tracing::info!(job_id = %id, "job paused");
        Ok(job)
    }

    /// Queue a paused job again; it continues from its resume state.
    pub async fn resume(&self, id: JobId) -> ActorResult<Job> {
        let job = self.jobs.get(id).await?;
        if job.status != JobStatus::Paused {
            return Err(ActorError::Database(db::DbError::InvalidTransition {
                job: id.to_string(),
                from: job.status.to_string(),
                to: JobStatus::Queued.to_string(),
            }));
        }
        let job = self.jobs.transition(id, JobStatus::Queued).await?;
        tracing::info!(job_id = %id, "job resumed");
        Ok(job)
    }

    /// Store a new token and release the jobs waiting on it.
    pub async fn rotate_credential(
        &self,
        id: CredentialId,
        token: &SecretString,
    ) -> ActorResult<u64> {
        self.credentials.rotate(id, token).await?;
        let renewed = self.jobs.renew_waiting(id).await?;
        tracing::info!(credential_id = %id, renewed, "credential rotated");
        Ok(renewed)
    }
}
