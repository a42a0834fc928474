//! Supervisor actor: starts the scheduler and the runner pool, restarts
//! runners that die, and stops once the scheduler drained.

use std::collections::HashMap;
use std::sync::Arc;

use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::RunnerConfig;
use crate::messages::{RunnerMessage, SchedulerMessage, SupervisorMessage};
use crate::runner::JobRunner;
use crate::runner_actor::{RunnerActor, RunnerArgs};
use crate::scheduler::Scheduler;
use crate::scheduler_actor::{SchedulerActor, SchedulerState};

/// What the supervisor needs to build its children.
pub struct SupervisorArgs {
    pub scheduler: Scheduler,
    pub runner: Arc<JobRunner>,
    pub config: RunnerConfig,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    scheduler: ActorRef<SchedulerMessage>,
    runners: HashMap<ActorId, (String, ActorRef<RunnerMessage>)>,
    runner: Arc<JobRunner>,
    config: RunnerConfig,
    /// Runner counter for unique IDs.
    runner_counter: u64,
    shutting_down: bool,
}

impl SupervisorState {
    fn next_runner_id(&mut self) -> String {
        self.runner_counter += 1;
        format!("runner-{}", self.runner_counter)
    }
}

async fn spawn_runner(
    supervisor: ActorCell,
    state: &mut SupervisorState,
) -> Result<(), ActorProcessingErr> {
    let runner_id = state.next_runner_id();
    let args = RunnerArgs {
        runner_id: runner_id.clone(),
        scheduler: state.scheduler.clone(),
        runner: state.runner.clone(),
        config: state.config.clone(),
    };
    let (actor, _handle) =
        Actor::spawn_linked(Some(runner_id.clone()), RunnerActor, args, supervisor)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("failed to spawn runner: {}", e)))?;
    state.runners.insert(actor.get_id(), (runner_id, actor));
    Ok(())
}

/// Supervisor actor that owns the scheduler and runners.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(runners = args.config.runners, "starting harvester supervisor");

        args.scheduler
            .recover()
            .await
            .map_err(|e| ActorProcessingErr::from(format!("stale-run recovery failed: {}", e)))?;

        let (scheduler, _handle) = Actor::spawn_linked(
            Some("scheduler".to_string()),
            SchedulerActor,
            SchedulerState::new(args.scheduler, args.config.clone()),
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("failed to spawn scheduler: {}", e)))?;

        let mut state = SupervisorState {
            scheduler,
            runners: HashMap::new(),
            runner: args.runner,
            config: args.config,
            runner_counter: 0,
            shutting_down: false,
        };
        for _ in 0..state.config.runners {
            spawn_runner(myself.get_cell(), &mut state).await?;
        }
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetScheduler { reply } => {
                let _ = reply.send(state.scheduler.clone());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("shutting down harvester");
                state.shutting_down = true;
                for (_, runner) in state.runners.values() {
                    let _ = runner.send_message(RunnerMessage::Shutdown);
                }
                let _ = state.scheduler.send_message(SchedulerMessage::Drain);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            SupervisionEvent::ActorFailed(cell, error) => (cell, Some(error.to_string())),
            _ => return Ok(()),
        };

        if cell.get_id() == state.scheduler.get_id() {
            if !state.shutting_down {
                tracing::error!(reason = ?reason, "scheduler stopped unexpectedly");
            }
            for (_, runner) in state.runners.values() {
                runner.stop(None);
            }
            myself.stop(None);
            return Ok(());
        }

        if let Some((runner_id, _)) = state.runners.remove(&cell.get_id()) {
            let _ = state.scheduler.send_message(SchedulerMessage::RunnerStopped {
                runner_id: runner_id.clone(),
            });
            if state.shutting_down {
                tracing::debug!(%runner_id, "runner stopped");
            } else {
                tracing::warn!(%runner_id, reason = ?reason, "runner died, starting a replacement");
                spawn_runner(myself.get_cell(), state).await?;
            }
        }
        Ok(())
    }
}

/// Start the supervisor with its scheduler and runners.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) =
        Actor::spawn(Some("supervisor".to_string()), Supervisor, args).await?;

    Ok((actor, handle))
}
