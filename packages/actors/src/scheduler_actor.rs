//! Scheduler actor: the only place jobs are claimed and settled.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harvest_core::{JobId, JobStatus};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio_util::sync::CancellationToken;

use crate::RunnerConfig;
use crate::messages::{Assignment, SchedulerMessage};
use crate::reconcile::RunOutcome;
use crate::scheduler::Scheduler;

/// A job currently out with a runner.
struct RunningJob {
    runner_id: String,
    cancel: CancellationToken,
    last_heartbeat: DateTime<Utc>,
    /// Pages the job had written when it was handed out.
    pages_at_claim: u64,
}

/// State for the scheduler actor.
pub struct SchedulerState {
    scheduler: Scheduler,
    config: RunnerConfig,
    running: HashMap<JobId, RunningJob>,
    draining: bool,
}

impl SchedulerState {
    pub fn new(scheduler: Scheduler, config: RunnerConfig) -> Self {
        Self {
            scheduler,
            config,
            running: HashMap::new(),
            draining: false,
        }
    }

    fn cancel(&self, job_id: JobId) {
        if let Some(job) = self.running.get(&job_id) {
            tracing::info!(%job_id, runner_id = %job.runner_id, "cancelling running job");
            job.cancel.cancel();
        }
    }

    /// Stop once draining and nothing is out with a runner.
    fn stop_if_drained(&self, myself: &ActorRef<SchedulerMessage>) {
        if self.draining && self.running.is_empty() {
            tracing::info!("scheduler drained");
            myself.stop(None);
        }
    }
}

/// Scheduler actor that hands out jobs and settles their runs.
pub struct SchedulerActor;

impl Actor for SchedulerActor {
    type Msg = SchedulerMessage;
    type State = SchedulerState;
    type Arguments = SchedulerState;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("starting scheduler");

        let tick = args.config.heartbeat_interval.max(Duration::from_secs(1));
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SchedulerMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SchedulerMessage::RequestJob { runner_id, reply } => {
                if state.draining {
                    let _ = reply.send(None);
                    return Ok(());
                }

                match state.scheduler.claim_next().await {
                    Ok(Some(job)) => {
                        let cancel = CancellationToken::new();
                        state.running.insert(
                            job.id,
                            RunningJob {
                                runner_id: runner_id.clone(),
                                cancel: cancel.clone(),
                                last_heartbeat: Utc::now(),
                                pages_at_claim: job.progress.as_ref().map_or(0, |p| p.pages),
                            },
                        );
                        tracing::info!(job_id = %job.id, %runner_id, "job assigned");
                        let _ = reply.send(Some(Assignment { job, cancel }));
                    }
                    Ok(None) => {
                        let _ = reply.send(None);
                    }
                    Err(e) => {
                        tracing::warn!(%runner_id, "failed to claim a job: {}", e);
                        let _ = reply.send(None);
                    }
                }
            }

            SchedulerMessage::ReportOutcome { runner_id, report } => {
                let job_id = report.job_id;
                state.running.remove(&job_id);
                if let Err(e) = state.scheduler.settle(*report).await {
                    tracing::error!(%job_id, %runner_id, "failed to settle job: {}", e);
                }
                state.stop_if_drained(&myself);
            }

            SchedulerMessage::RunnerStopped { runner_id } => {
                let lost: Vec<(JobId, u64)> = state
                    .running
                    .iter()
                    .filter(|(_, running)| running.runner_id == runner_id)
                    .map(|(job_id, running)| (*job_id, running.pages_at_claim))
                    .collect();
                for (job_id, pages_at_claim) in lost {
                    state.running.remove(&job_id);
                    tracing::warn!(%job_id, %runner_id, "runner stopped without reporting");
                    // A runner told to stop before it started its job is a
                    // cancellation, not a failure.
                    let outcome = if state.draining {
                        RunOutcome::Cancelled
                    } else {
                        RunOutcome::Interrupted("runner stopped without reporting".into())
                    };
                    if let Err(e) = state.scheduler.abandon(job_id, pages_at_claim, outcome).await {
                        tracing::error!(%job_id, "failed to settle abandoned job: {}", e);
                    }
                }
                state.stop_if_drained(&myself);
            }

            SchedulerMessage::Heartbeat { runner_id, job_id } => {
                let Some(running) = state
                    .running
                    .get_mut(&job_id)
                    .filter(|running| running.runner_id == runner_id)
                else {
                    tracing::debug!(%job_id, %runner_id, "heartbeat for unknown job");
                    return Ok(());
                };
                running.last_heartbeat = Utc::now();

                // Paused from another process: the job row is the only signal.
                match state.scheduler.jobs().get(job_id).await {
                    Ok(job) if job.status != JobStatus::Running => state.cancel(job_id),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(%job_id, "heartbeat status check failed: {}", e),
                }
            }

            SchedulerMessage::EnqueueDiscovery {
                credential_id,
                reply,
            } => {
                let result = state
                    .scheduler
                    .enqueue_discovery(credential_id)
                    .await
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }

            SchedulerMessage::Pause { job_id, reply } => {
                let result = state.scheduler.pause(job_id).await;
                if result.is_ok() {
                    state.cancel(job_id);
                }
                let _ = reply.send(result.map(|job| job.status).map_err(|e| e.to_string()));
            }

            SchedulerMessage::Resume { job_id, reply } => {
                let result = state
                    .scheduler
                    .resume(job_id)
                    .await
                    .map(|job| job.status)
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }

            SchedulerMessage::CredentialRotated {
                credential_id,
                token,
                reply,
            } => {
                let result = state
                    .scheduler
                    .rotate_credential(credential_id, &token)
                    .await
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }

            SchedulerMessage::Drain => {
                tracing::info!(running = state.running.len(), "draining scheduler");
                state.draining = true;
                for running in state.running.values() {
                    running.cancel.cancel();
                }
                state.stop_if_drained(&myself);
            }

            SchedulerMessage::Tick => {
                let stall_after = chrono::Duration::from_std(state.config.stall_after())
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                let now = Utc::now();
                for (job_id, running) in &state.running {
                    if now - running.last_heartbeat > stall_after {
                        tracing::warn!(
                            %job_id,
                            runner_id = %running.runner_id,
                            last_heartbeat = %running.last_heartbeat,
                            "runner stalled"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}
