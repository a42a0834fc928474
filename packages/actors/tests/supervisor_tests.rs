//! The actor system draining a discovery and every job it spawned.

#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use actors::{
    JobRunner, RunnerConfig, SchedulerMessage, SupervisorArgs, SupervisorMessage,
    start_supervisor,
};
use common::*;
use crawler::testing::MemorySink;
use crawler::{ApiClient, ClientFactory, CrawlConfig, CrawlError};
use harvest_core::{Collection, Command, Credential, Job, JobStatus};
use secrecy::SecretString;

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        runners: 2,
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn supervisor_runs_discovery_and_spawned_jobs() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    let (runner, sink) = runner(&db, discovery_client());

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        scheduler: scheduler.clone(),
        runner: Arc::new(runner),
        config: fast_config(),
    })
    .await
    .expect("start supervisor");

    let scheduler_ref = match ractor::rpc::call(
        &supervisor,
        |reply| SupervisorMessage::GetScheduler { reply },
        Some(Duration::from_secs(5)),
    )
    .await
    {
        Ok(ractor::rpc::CallResult::Success(scheduler_ref)) => scheduler_ref,
        other => panic!("no scheduler: {other:?}"),
    };
    let enqueued = ractor::rpc::call(
        &scheduler_ref,
        |reply| SchedulerMessage::EnqueueDiscovery {
            credential_id: credential.id,
            reply,
        },
        Some(Duration::from_secs(5)),
    )
    .await;
    assert!(matches!(
        enqueued,
        Ok(ractor::rpc::CallResult::Success(Ok(_)))
    ));

    // Discovery plus two groups, three projects and three global jobs.
    let mut finished = 0;
    for _ in 0..400 {
        let counts = scheduler.jobs().count_by_status().await.unwrap();
        finished = counts.get(&JobStatus::Finished).copied().unwrap_or(0);
        if finished == 9 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(finished, 9);
    assert_eq!(sink.records(Collection::Projects).len(), 3);
    assert_eq!(sink.records(Collection::Groups).len(), 2);

    supervisor
        .send_message(SupervisorMessage::Shutdown)
        .expect("shutdown");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stopped")
        .expect("supervisor task");
}

/// Kills the runner that asks it for a client.
struct PanickingFactory;

impl ClientFactory for PanickingFactory {
    fn client(
        &self,
        _credential: &Credential,
        _token: SecretString,
    ) -> Result<Arc<dyn ApiClient>, CrawlError> {
        panic!("client construction blew up");
    }
}

#[tokio::test]
async fn job_of_a_dead_runner_is_settled() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    let job = scheduler
        .jobs()
        .create(&Job::new(Command::Users, None, credential.owner()))
        .await
        .unwrap();
    let runner = JobRunner::new(
        db.clone(),
        Arc::new(PanickingFactory),
        Arc::new(MemorySink::new()),
        CrawlConfig::default(),
    );

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        scheduler: scheduler.clone(),
        runner: Arc::new(runner),
        config: RunnerConfig {
            runners: 1,
            ..fast_config()
        },
    })
    .await
    .expect("start supervisor");

    let mut status = JobStatus::Queued;
    for _ in 0..200 {
        status = scheduler.jobs().get(job.id).await.unwrap().status;
        if status == JobStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    // Nothing was written before the runner died.
    assert_eq!(status, JobStatus::Failed);

    // The replacement runner is idle and the scheduler holds no job, so
    // shutdown completes.
    supervisor
        .send_message(SupervisorMessage::Shutdown)
        .expect("shutdown");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stopped")
        .expect("supervisor task");
}
