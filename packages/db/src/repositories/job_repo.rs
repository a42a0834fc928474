//! Job repository: the job table contract.

use chrono::{DateTime, Utc};
use harvest_core::{
    Command, CredentialId, Job, JobId, JobOwner, JobProgress, JobStatus, ResumeState,
};
use serde::{Deserialize, Serialize};

use crate::{Db, DbError};

/// Storage row: the job plus its uniqueness key. The record id is the job id.
#[derive(Debug, Serialize, Deserialize)]
struct JobRow {
    job_id: JobId,
    dedup_key: String,
    status: JobStatus,
    command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<DateTime<Utc>>,
    owner: JobOwner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resume_state: Option<ResumeState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    progress: Option<JobProgress>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            dedup_key: job.dedup_key(),
            status: job.status,
            command: job.command,
            scope_path: job.scope_path.clone(),
            branch: job.branch.clone(),
            from: job.from,
            to: job.to,
            owner: job.owner.clone(),
            origin_job_id: job.origin_job_id,
            resume_state: job.resume_state.clone(),
            progress: job.progress.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.job_id,
            status: row.status,
            command: row.command,
            scope_path: row.scope_path,
            branch: row.branch,
            from: row.from,
            to: row.to,
            owner: row.owner,
            origin_job_id: row.origin_job_id,
            resume_state: row.resume_state,
            progress: row.progress,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

/// Statuses a runner may pick up.
fn runnable_statuses() -> Vec<String> {
    JobStatus::ALL
        .iter()
        .filter(|status| status.is_runnable())
        .map(|status| status.as_str().to_string())
        .collect()
}

/// Whether a write was refused because the row or its `dedup_key` is taken.
///
/// Matched on the message so embedded and remote engines agree.
fn is_conflict(error: &surrealdb::Error) -> bool {
    let message = error.to_string();
    message.contains("already contains") || message.contains("already exists")
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub command: Option<Command>,
    pub credential_id: Option<CredentialId>,
    pub origin_job_id: Option<JobId>,
    pub limit: Option<usize>,
}

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Db,
}

impl JobRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        let record: Option<JobRow> = self
            .db
            .conn()
            .create(("job", job.id.to_string()))
            .content(JobRow::from(job))
            .await?;

        record
            .map(Job::from)
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Insert jobs, skipping any that conflict with an existing row.
    ///
    /// Returns how many rows were actually inserted.
    pub async fn insert_ignore(&self, jobs: &[Job]) -> Result<u64, DbError> {
        let mut inserted = 0;
        for job in jobs {
            match self.create(job).await {
                Ok(_) => inserted += 1,
                Err(DbError::Connection(e)) if is_conflict(&e) => {
                    tracing::debug!("Skipped job {} ({}): {}", job.id, job.dedup_key(), e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRow> = self.db.conn().select(("job", id.to_string())).await?;

        record
            .map(Job::from)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// List jobs with optional filtering, oldest first.
    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, DbError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<(&'static str, serde_json::Value)> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = $status");
            bindings.push(("status", serde_json::json!(status)));
        }

        if let Some(command) = filter.command {
            conditions.push("command = $command");
            bindings.push(("command", serde_json::json!(command)));
        }

        if let Some(credential_id) = filter.credential_id {
            conditions.push("owner.credential_id = $credential_id");
            bindings.push(("credential_id", serde_json::json!(credential_id)));
        }

        if let Some(origin) = filter.origin_job_id {
            conditions.push("origin_job_id = $origin");
            bindings.push(("origin", serde_json::json!(origin)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY created_at ASC {}",
            where_clause, limit_clause
        );

        let mut result = self.db.conn().query(&query);
        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRow> = response.take(0)?;

        Ok(records.into_iter().map(Job::from).collect())
    }

    /// Every job crawling with credentials of `provider`, discovery jobs included.
    pub async fn list_for_provider(&self, provider: &str) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .conn()
            .query("SELECT * FROM job WHERE owner.provider = $provider")
            .bind(("provider", provider.to_string()))
            .await?;
        let records: Vec<JobRow> = response.take(0)?;
        Ok(records.into_iter().map(Job::from).collect())
    }

    /// Find the job occupying a uniqueness key.
    pub async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<Job>, DbError> {
        let mut response = self
            .db
            .conn()
            .query("SELECT * FROM job WHERE dedup_key = $key LIMIT 1")
            .bind(("key", dedup_key.to_string()))
            .await?;
        let records: Vec<JobRow> = response.take(0)?;
        Ok(records.into_iter().next().map(Job::from))
    }

    /// Oldest job a runner may pick up.
    pub async fn next_runnable(&self) -> Result<Option<Job>, DbError> {
        let mut response = self
            .db
            .conn()
            .query(
                r#"
                SELECT * FROM job
                WHERE status IN $runnable
                ORDER BY created_at ASC
                LIMIT 1
                "#,
            )
            .bind(("runnable", runnable_statuses()))
            .await?;
        let records: Vec<JobRow> = response.take(0)?;
        Ok(records.into_iter().next().map(Job::from))
    }

    /// Move a job to `next`, enforcing the status state machine.
    ///
    /// Entering `running` stamps `started_at`; entering a terminal status
    /// stamps `finished_at`; returning to `queued` clears both.
    pub async fn transition(&self, id: JobId, next: JobStatus) -> Result<Job, DbError> {
        let job = self.get(id).await?;
        if !job.status.can_transition_to(next) {
            return Err(DbError::InvalidTransition {
                job: id.to_string(),
                from: job.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        let (started_at, finished_at) = match next {
            JobStatus::Running => (Some(now), None),
            JobStatus::Finished | JobStatus::Failed => (job.started_at, Some(now)),
            JobStatus::Queued => (None, None),
            _ => (job.started_at, job.finished_at),
        };

        let record: Option<JobRow> = self
            .db
            .conn()
            .update(("job", id.to_string()))
            .merge(serde_json::json!({
                "status": next,
                "started_at": started_at,
                "finished_at": finished_at,
            }))
            .await?;

        record
            .map(Job::from)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// Reset failed jobs to queued, clearing their timestamps.
    ///
    /// Only rows still `failed` are touched; returns how many were reset.
    pub async fn reset_failed(&self, ids: &[JobId]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(JobId::to_string).collect();
        let mut response = self
            .db
            .conn()
            .query(
                r#"
                UPDATE job
                SET status = "queued", started_at = NONE, finished_at = NONE
                WHERE job_id IN $ids AND status = "failed"
                RETURN AFTER
                "#,
            )
            .bind(("ids", ids))
            .await?;
        let records: Vec<JobRow> = response.take(0)?;
        Ok(records.len() as u64)
    }

    /// Persist a job's resume state and progress counters.
    pub async fn save_checkpoint(
        &self,
        id: JobId,
        resume_state: Option<&ResumeState>,
        progress: &JobProgress,
    ) -> Result<(), DbError> {
        let resume_state = resume_state.filter(|state| !state.is_empty());
        let _: Option<JobRow> = self
            .db
            .conn()
            .update(("job", id.to_string()))
            .merge(serde_json::json!({
                "resume_state": resume_state,
                "progress": progress,
            }))
            .await?;
        Ok(())
    }

    /// Return jobs left `running` by a process that died to the queue.
    pub async fn requeue_stale(&self) -> Result<u64, DbError> {
        let mut response = self
            .db
            .conn()
            .query(r#"UPDATE job SET status = "queued" WHERE status = "running" RETURN AFTER"#)
            .await?;
        let records: Vec<JobRow> = response.take(0)?;
        Ok(records.len() as u64)
    }

    /// Make jobs suspended on a rotated credential runnable again.
    pub async fn renew_waiting(&self, credential_id: CredentialId) -> Result<u64, DbError> {
        let mut response = self
            .db
            .conn()
            .query(
                r#"
                UPDATE job
                SET status = "credential_renewed"
                WHERE owner.credential_id = $credential_id
                    AND status = "waiting_credential_renewal"
                RETURN AFTER
                "#,
            )
            .bind(("credential_id", credential_id.to_string()))
            .await?;
        let records: Vec<JobRow> = response.take(0)?;
        Ok(records.len() as u64)
    }

    /// Count jobs by status.
    pub async fn count_by_status(
        &self,
    ) -> Result<std::collections::HashMap<JobStatus, u64>, DbError> {
        let mut response = self
            .db
            .conn()
            .query("SELECT status, count() AS count FROM job GROUP BY status")
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: JobStatus,
            count: i64,
        }

        let counts: Vec<StatusCount> = response.take(0)?;
        Ok(counts
            .into_iter()
            .map(|c| (c.status, c.count.max(0) as u64))
            .collect())
    }
}
