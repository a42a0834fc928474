//! Turning a finished run into the job's next status.

use crawler::{CrawlOutcome, Interruption};
use harvest_core::{Area, Job, JobId, JobProgress, JobStatus, ResumeState};

/// How a run ended, as reported by a runner.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every sequence of the job was consumed.
    Complete,
    /// The command has no crawl routine.
    Skipped,
    /// Stopped between pages by pause or shutdown.
    Cancelled,
    /// The API rejected the job's credential.
    CredentialRejected(String),
    /// A query, extraction or sink failure ended the crawl early.
    Interrupted(String),
    /// The run could not start.
    Error(String),
}

impl From<CrawlOutcome> for RunOutcome {
    fn from(outcome: CrawlOutcome) -> Self {
        match outcome {
            CrawlOutcome::Complete => RunOutcome::Complete,
            CrawlOutcome::Skipped => RunOutcome::Skipped,
            CrawlOutcome::Incomplete(Interruption::Cancelled) => RunOutcome::Cancelled,
            CrawlOutcome::Incomplete(Interruption::Credential(e)) => {
                RunOutcome::CredentialRejected(e.to_string())
            }
            CrawlOutcome::Incomplete(other) => RunOutcome::Interrupted(other.to_string()),
        }
    }
}

/// What a runner hands back after executing a job.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_id: JobId,
    pub outcome: RunOutcome,
    /// Resume state as of the last page written.
    pub resume: ResumeState,
    pub progress: JobProgress,
    /// Whether this run wrote at least one page.
    pub made_progress: bool,
    /// Areas found by a scope-discovery run.
    pub areas: Vec<Area>,
}

impl RunReport {
    /// Report for a run that never reached the API.
    pub fn error(job: &Job, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            outcome: RunOutcome::Error(message.into()),
            resume: job.resume_state.clone().unwrap_or_default(),
            progress: job.progress.clone().unwrap_or_default(),
            made_progress: false,
            areas: Vec::new(),
        }
    }
}

/// Status changes to apply after a run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub path: &'static [JobStatus],
    /// Drop the job's resume cursors; set when the job finished.
    pub clear_resume: bool,
}

impl Decision {
    const KEEP: Decision = Decision::to(&[]);
    pub const REQUEUE: Decision = Decision::to(&[JobStatus::Queued]);

    const fn to(path: &'static [JobStatus]) -> Self {
        Self {
            path,
            clear_resume: false,
        }
    }

    /// Where a run that did not finish goes: back to the queue when it wrote
    /// pages, `failed` otherwise.
    pub const fn unfinished(made_progress: bool) -> Self {
        if made_progress {
            Decision::REQUEUE
        } else {
            Decision::to(&[JobStatus::Failed])
        }
    }

    pub fn target(&self) -> Option<JobStatus> {
        self.path.last().copied()
    }
}

/// Decide where a job goes after a run.
///
/// `current` is the job's stored status when the report arrives. A job that
/// is no longer `running` was paused while it ran and stays where it is.
pub fn reconcile(current: JobStatus, outcome: &RunOutcome, made_progress: bool) -> Decision {
    if current != JobStatus::Running {
        return Decision::KEEP;
    }
    match outcome {
        RunOutcome::Complete | RunOutcome::Skipped => Decision {
            path: &[JobStatus::Finished],
            clear_resume: true,
        },
        RunOutcome::Cancelled => Decision::REQUEUE,
        RunOutcome::CredentialRejected(_) => Decision::to(&[
            JobStatus::CredentialExpired,
            JobStatus::WaitingCredentialRenewal,
        ]),
        RunOutcome::Interrupted(_) | RunOutcome::Error(_) => Decision::unfinished(made_progress),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crawler::QueryError;

    #[test]
    fn complete_and_skipped_finish() {
        for outcome in [RunOutcome::Complete, RunOutcome::Skipped] {
            let decision = reconcile(JobStatus::Running, &outcome, false);
            assert_eq!(decision.target(), Some(JobStatus::Finished));
            assert!(decision.clear_resume);
        }
    }

    #[test]
    fn interrupted_job_requeues_only_after_progress() {
        let outcome = RunOutcome::Interrupted("HTTP 502".into());
        assert_eq!(
            reconcile(JobStatus::Running, &outcome, true),
            Decision::REQUEUE
        );
        assert_eq!(
            reconcile(JobStatus::Running, &outcome, false).target(),
            Some(JobStatus::Failed)
        );
    }

    #[test]
    fn credential_rejection_enters_side_chain() {
        let outcome = RunOutcome::from(CrawlOutcome::Incomplete(Interruption::Credential(
            QueryError::Credential("HTTP 401".into()),
        )));
        let decision = reconcile(JobStatus::Running, &outcome, true);
        assert_eq!(
            decision.path,
            &[
                JobStatus::CredentialExpired,
                JobStatus::WaitingCredentialRenewal
            ]
        );

        let mut status = JobStatus::Running;
        for next in decision.path {
            assert!(status.can_transition_to(*next));
            status = *next;
        }
    }

    #[test]
    fn cancelled_run_requeues() {
        let decision = reconcile(JobStatus::Running, &RunOutcome::Cancelled, false);
        assert_eq!(decision, Decision::REQUEUE);
    }

    #[test]
    fn paused_job_is_left_alone() {
        let decision = reconcile(JobStatus::Paused, &RunOutcome::Cancelled, true);
        assert!(decision.path.is_empty());
        assert!(!decision.clear_resume);
    }
}
