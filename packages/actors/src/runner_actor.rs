//! Runner actor: polls the scheduler for work and runs one job at a time.

use std::sync::Arc;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio_util::sync::CancellationToken;

use crate::RunnerConfig;
use crate::messages::{RunnerMessage, SchedulerMessage};
use crate::runner::JobRunner;

/// State for the runner actor.
pub struct RunnerState {
    pub runner_id: String,
    pub scheduler: ActorRef<SchedulerMessage>,
    pub runner: Arc<JobRunner>,
    pub config: RunnerConfig,
    /// Whether a job is being run.
    pub busy: bool,
}

/// Runner actor arguments.
pub struct RunnerArgs {
    pub runner_id: String,
    pub scheduler: ActorRef<SchedulerMessage>,
    pub runner: Arc<JobRunner>,
    pub config: RunnerConfig,
}

/// Runner actor that executes jobs.
pub struct RunnerActor;

impl Actor for RunnerActor {
    type Msg = RunnerMessage;
    type State = RunnerState;
    type Arguments = RunnerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(runner_id = %args.runner_id, "starting runner");

        let poll_interval = args.config.poll_interval;
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if myself_clone.send_message(RunnerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(RunnerState {
            runner_id: args.runner_id,
            scheduler: args.scheduler,
            runner: args.runner,
            config: args.config,
            busy: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RunnerMessage::Poll => {
                if state.busy {
                    return Ok(());
                }
                let result = ractor::rpc::call(
                    &state.scheduler,
                    |reply| SchedulerMessage::RequestJob {
                        runner_id: state.runner_id.clone(),
                        reply,
                    },
                    Some(state.config.request_timeout),
                )
                .await;
                if let Ok(ractor::rpc::CallResult::Success(Some(assignment))) = result {
                    myself.send_message(RunnerMessage::Run {
                        assignment: Box::new(assignment),
                    })?;
                }
            }

            RunnerMessage::Run { assignment } => {
                let job = assignment.job;
                state.busy = true;

                // Heartbeats stop when the guard drops, also if the run panics.
                let heartbeat = CancellationToken::new();
                let heartbeat_guard = heartbeat.clone().drop_guard();
                {
                    let scheduler = state.scheduler.clone();
                    let runner_id = state.runner_id.clone();
                    let job_id = job.id;
                    let every = state.config.heartbeat_interval;
                    tokio::spawn(async move {
                        let mut interval = tokio::time::interval(every);
                        interval.tick().await;
                        loop {
                            tokio::select! {
                                _ = heartbeat.cancelled() => break,
                                _ = interval.tick() => {}
                            }
                            let beat = SchedulerMessage::Heartbeat {
                                runner_id: runner_id.clone(),
                                job_id,
                            };
                            if scheduler.send_message(beat).is_err() {
                                break;
                            }
                        }
                    });
                }

                let report = state.runner.run(&job, assignment.cancel).await;
                drop(heartbeat_guard);
                state.busy = false;

                state.scheduler.send_message(SchedulerMessage::ReportOutcome {
                    runner_id: state.runner_id.clone(),
                    report: Box::new(report),
                })?;
            }

            RunnerMessage::Shutdown => {
                tracing::info!(runner_id = %state.runner_id, "shutting down runner");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
