//! Message types for actor communication.
//!
//! Runners and the scheduler exchange job requests and reports; the
//! supervisor only starts and stops them.

use harvest_core::{CredentialId, Job, JobId, JobStatus};
use ractor::RpcReplyPort;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::reconcile::RunReport;

/// A job handed to a runner, with the token that stops it.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub job: Job,
    pub cancel: CancellationToken,
}

/// Messages for the SchedulerActor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Request the next runnable job for a runner.
    RequestJob {
        runner_id: String,
        reply: RpcReplyPort<Option<Assignment>>,
    },

    /// A runner finished with a job.
    ReportOutcome {
        runner_id: String,
        report: Box<RunReport>,
    },

    /// A runner stopped; any job it still held is settled from its last
    /// checkpoint.
    RunnerStopped { runner_id: String },

    /// A runner is still working on a job.
    Heartbeat { runner_id: String, job_id: JobId },

    /// Schedule scope discovery for a credential.
    EnqueueDiscovery {
        credential_id: CredentialId,
        reply: RpcReplyPort<Result<Job, String>>,
    },

    /// Pause a job, cancelling it if it is running here.
    Pause {
        job_id: JobId,
        reply: RpcReplyPort<Result<JobStatus, String>>,
    },

    /// Queue a paused job again.
    Resume {
        job_id: JobId,
        reply: RpcReplyPort<Result<JobStatus, String>>,
    },

    /// A credential got a new token; release its waiting jobs.
    CredentialRotated {
        credential_id: CredentialId,
        token: SecretString,
        reply: RpcReplyPort<Result<u64, String>>,
    },

    /// Cancel running jobs, hand out no more, and stop once every running
    /// job was reported.
    Drain,

    /// Periodic tick for housekeeping.
    Tick,
}

/// Messages for the RunnerActor.
#[derive(Debug)]
pub enum RunnerMessage {
    /// Ask the scheduler for work if idle.
    Poll,

    /// Run an assigned job to its end.
    Run { assignment: Box<Assignment> },

    /// Stop after the current job.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Reference to the scheduler, for sending it commands.
    GetScheduler {
        reply: RpcReplyPort<ractor::ActorRef<SchedulerMessage>>,
    },

    /// Drain the scheduler and stop every runner.
    Shutdown,
}
