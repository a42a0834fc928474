//! Scheduler behaviour against an in-memory database.

#![allow(clippy::disallowed_methods)]

mod common;

use actors::sync::SyncPlan;
use actors::{RunOutcome, RunReport, SyncReport};
use common::*;
use crawler::QueryError;
use crawler::testing::ScriptedClient;
use db::repositories::{AreaRepository, CredentialRepository, IncidentRepository, JobFilter};
use harvest_core::{
    Area, AreaType, Collection, Command, CredentialState, Job, JobProgress, JobStatus, ResumeKey,
    ResumeState,
};
use secrecy::SecretString;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn discovery_run_synthesizes_jobs() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);

    let discovery = scheduler.enqueue_discovery(credential.id).await.unwrap();
    let claimed = scheduler.claim_next().await.unwrap().expect("discovery job");
    assert_eq!(claimed.id, discovery.id);
    assert_eq!(claimed.status, JobStatus::Running);

    let (runner, _sink) = runner(&db, discovery_client());
    let report = runner.run(&claimed, CancellationToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Complete);
    assert_eq!(report.areas.len(), 5);

    let settled = scheduler.settle(report).await.unwrap();
    assert_eq!(settled.status, JobStatus::Finished);

    let spawned = scheduler
        .jobs()
        .list(JobFilter {
            origin_job_id: Some(discovery.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(spawned.len(), 8);
    assert!(spawned.iter().all(|j| j.status == JobStatus::Queued));
    assert_eq!(
        spawned.iter().filter(|j| j.command == Command::Project).count(),
        3
    );

    let areas = AreaRepository::new(db.clone()).list(None).await.unwrap();
    assert_eq!(areas.len(), 5);

    let again = scheduler.sync_discovery(&settled, &areas).await.unwrap();
    assert_eq!(again, SyncReport::default());
}

#[tokio::test]
async fn enqueue_discovery_is_unique_per_account() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);

    let first = scheduler.enqueue_discovery(credential.id).await.unwrap();
    let second = scheduler.enqueue_discovery(credential.id).await.unwrap();
    assert_eq!(first.id, second.id);
}

fn project_areas() -> Vec<Area> {
    vec![
        Area::new(AreaType::Group, "g1", "acme", "Acme"),
        Area::new(AreaType::Project, "p1", "acme/api", "API"),
    ]
}

async fn job_in_status(scheduler: &actors::Scheduler, job: &Job, path: &[JobStatus]) -> Job {
    let mut job = scheduler.jobs().create(job).await.unwrap();
    for status in path {
        job = scheduler.jobs().transition(job.id, *status).await.unwrap();
    }
    job
}

#[tokio::test]
async fn sync_resets_failed_and_skips_running_jobs() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    let discovery = Job::discovery(credential.owner());

    let failed = job_in_status(
        &scheduler,
        &Job::new(Command::Group, Some("acme".into()), credential.owner()),
        &[JobStatus::Running, JobStatus::Failed],
    )
    .await;
    let running = job_in_status(
        &scheduler,
        &Job::new(Command::Project, Some("acme/api".into()), credential.owner()),
        &[JobStatus::Running],
    )
    .await;

    let report = scheduler
        .sync_discovery(&discovery, &project_areas())
        .await
        .unwrap();
    assert_eq!(report, SyncReport { inserted: 3, reset: 1 });

    let failed = scheduler.jobs().get(failed.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Queued);
    assert!(failed.started_at.is_none());
    assert!(failed.finished_at.is_none());
    let running = scheduler.jobs().get(running.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);

    let again = scheduler
        .sync_discovery(&discovery, &project_areas())
        .await
        .unwrap();
    assert_eq!(again, SyncReport::default());
}

#[tokio::test]
async fn sync_mismatch_records_incident() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);

    let existing = Job::new(Command::Users, None, credential.owner());
    scheduler.jobs().create(&existing).await.unwrap();

    let duplicate = Job::new(Command::Users, None, credential.owner());
    let fresh = Job::new(Command::Timelogs, None, credential.owner());
    let report = scheduler
        .apply_sync(SyncPlan {
            inserts: vec![duplicate, fresh],
            resets: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);

    let incidents = IncidentRepository::new(db.clone()).list(10).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].operation, "insert_jobs");
    assert_eq!(incidents[0].expected, 2);
    assert_eq!(incidents[0].actual, 1);
}

#[tokio::test]
async fn credential_rejection_waits_for_rotation() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    scheduler
        .jobs()
        .create(&Job::new(
            Command::Project,
            Some("acme/api".into()),
            credential.owner(),
        ))
        .await
        .unwrap();

    let job = scheduler.claim_next().await.unwrap().expect("project job");
    let client = ScriptedClient::new().fail("project", QueryError::Credential("HTTP 401".into()));
    let (runner, _sink) = runner(&db, client);
    let report = runner.run(&job, CancellationToken::new()).await;
    assert!(matches!(report.outcome, RunOutcome::CredentialRejected(_)));

    let settled = scheduler.settle(report).await.unwrap();
    assert_eq!(settled.status, JobStatus::WaitingCredentialRenewal);
    let stored = CredentialRepository::new(db.clone())
        .get(credential.id)
        .await
        .unwrap();
    assert_eq!(stored.state, CredentialState::Expired);
    assert!(scheduler.claim_next().await.unwrap().is_none());

    let renewed = scheduler
        .rotate_credential(credential.id, &SecretString::from("glpat-new"))
        .await
        .unwrap();
    assert_eq!(renewed, 1);
    assert_eq!(
        scheduler.jobs().get(job.id).await.unwrap().status,
        JobStatus::CredentialRenewed
    );

    let reclaimed = scheduler.claim_next().await.unwrap().expect("renewed job");
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.status, JobStatus::Running);
}

#[tokio::test]
async fn interrupted_run_keeps_its_cursor() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    scheduler
        .jobs()
        .create(&Job::new(Command::Users, None, credential.owner()))
        .await
        .unwrap();

    let job = scheduler.claim_next().await.unwrap().expect("users job");
    let client = ScriptedClient::new()
        .pages(
            "users",
            vec![
                vec![json!({ "id": "u1" }), json!({ "id": "u2" })],
                vec![json!({ "id": "u3" })],
            ],
        )
        .fail_at("users", 1, QueryError::Status {
            status: 502,
            message: "bad gateway".into(),
        });
    let (runner, sink) = runner(&db, client);
    let report = runner.run(&job, CancellationToken::new()).await;
    assert!(report.made_progress);
    assert_eq!(sink.records(Collection::Users).len(), 2);

    let settled = scheduler.settle(report).await.unwrap();
    assert_eq!(settled.status, JobStatus::Queued);
    let resume = settled.resume_state.expect("resume state");
    assert_eq!(
        resume.cursor(&ResumeKey::global("users")).map(|c| c.as_str()),
        Some("cursor-1")
    );
    assert_eq!(settled.progress.map(|p| p.records), Some(2));
}

#[tokio::test]
async fn run_without_progress_fails() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    scheduler
        .jobs()
        .create(&Job::new(Command::Users, None, credential.owner()))
        .await
        .unwrap();

    let job = scheduler.claim_next().await.unwrap().expect("users job");
    let client = ScriptedClient::new().fail("users", QueryError::Api("boom".into()));
    let (runner, _sink) = runner(&db, client);
    let report = runner.run(&job, CancellationToken::new()).await;

    let settled = scheduler.settle(report).await.unwrap();
    assert_eq!(settled.status, JobStatus::Failed);
    assert!(settled.finished_at.is_some());
}

#[tokio::test]
async fn pause_while_running_keeps_the_job_paused() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    scheduler
        .jobs()
        .create(&Job::new(Command::Users, None, credential.owner()))
        .await
        .unwrap();

    let job = scheduler.claim_next().await.unwrap().expect("users job");
    scheduler.pause(job.id).await.unwrap();

    let mut resume = ResumeState::new();
    resume.record(
        ResumeKey::global("users"),
        harvest_core::Cursor::new("cursor-3"),
    );
    let settled = scheduler
        .settle(RunReport {
            job_id: job.id,
            outcome: RunOutcome::Cancelled,
            resume,
            progress: JobProgress::default(),
            made_progress: true,
            areas: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(settled.status, JobStatus::Paused);
    assert!(settled.resume_state.is_some());

    let resumed = scheduler.resume(job.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Queued);
    assert!(scheduler.resume(job.id).await.is_err());
}

#[tokio::test]
async fn recover_requeues_stale_runs() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    scheduler
        .jobs()
        .create(&Job::new(Command::Users, None, credential.owner()))
        .await
        .unwrap();
    let job = scheduler.claim_next().await.unwrap().expect("users job");

    assert_eq!(scheduler.recover().await.unwrap(), 1);
    assert_eq!(
        scheduler.jobs().get(job.id).await.unwrap().status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn empty_discovery_still_spawns_global_jobs() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);

    let discovery = scheduler.enqueue_discovery(credential.id).await.unwrap();
    let claimed = scheduler.claim_next().await.unwrap().expect("discovery job");
    let (runner, _sink) = runner(&db, ScriptedClient::new());
    let report = runner.run(&claimed, CancellationToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Complete);
    assert!(report.areas.is_empty());

    let settled = scheduler.settle(report).await.unwrap();
    assert_eq!(settled.status, JobStatus::Finished);

    let spawned = scheduler
        .jobs()
        .list(JobFilter {
            origin_job_id: Some(discovery.id),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut commands: Vec<Command> = spawned.iter().map(|j| j.command).collect();
    commands.sort_by_key(|c| c.as_str());
    assert_eq!(
        commands,
        vec![Command::Timelogs, Command::Users, Command::Vulnerabilities]
    );
}

#[tokio::test]
async fn discovery_settles_when_a_path_changed_hands() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    let areas = AreaRepository::new(db.clone());
    areas
        .upsert(&Area::new(AreaType::Project, "gid://gitlab/Project/1", "acme/old", "Old"))
        .await
        .unwrap();

    let discovery = scheduler.enqueue_discovery(credential.id).await.unwrap();
    let claimed = scheduler.claim_next().await.unwrap().expect("discovery job");
    let client = ScriptedClient::new().pages(
        "discovery_projects",
        vec![vec![
            json!({ "id": "gid://gitlab/Project/1", "fullPath": "acme/zzz" }),
            json!({ "id": "gid://gitlab/Project/2", "fullPath": "acme/old" }),
        ]],
    );
    let (runner, _sink) = runner(&db, client);
    let report = runner.run(&claimed, CancellationToken::new()).await;

    let settled = scheduler.settle(report).await.unwrap();
    assert_eq!(settled.status, JobStatus::Finished);

    let old = areas.get_by_path("acme/old").await.unwrap().expect("acme/old");
    assert_eq!(old.natural_id, "gid://gitlab/Project/2");
    let spawned = scheduler
        .jobs()
        .list(JobFilter {
            origin_job_id: Some(discovery.id),
            command: Some(Command::Project),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(spawned.len(), 2);
}

#[tokio::test]
async fn failed_settle_does_not_leave_the_job_running() {
    let db = setup_db().await;
    let scheduler = scheduler(&db);
    // The job's credential was never stored, so expiring it fails.
    let ghost = harvest_core::Credential::new("gitlab.example.com", "ghost");
    scheduler
        .jobs()
        .create(&Job::new(Command::Users, None, ghost.owner()))
        .await
        .unwrap();
    let job = scheduler.claim_next().await.unwrap().expect("users job");

    let result = scheduler
        .settle(RunReport {
            job_id: job.id,
            outcome: RunOutcome::CredentialRejected("HTTP 401".into()),
            resume: ResumeState::new(),
            progress: JobProgress::default(),
            made_progress: false,
            areas: Vec::new(),
        })
        .await;
    assert!(result.is_err());
    assert_eq!(
        scheduler.jobs().get(job.id).await.unwrap().status,
        JobStatus::Failed
    );
}

fn lost() -> RunOutcome {
    RunOutcome::Interrupted("runner stopped without reporting".into())
}

#[tokio::test]
async fn abandoned_job_resumes_from_its_last_checkpoint() {
    let db = setup_db().await;
    let credential = credential(&db).await;
    let scheduler = scheduler(&db);
    for command in [Command::Users, Command::Timelogs] {
        scheduler
            .jobs()
            .create(&Job::new(command, None, credential.owner()))
            .await
            .unwrap();
    }

    let first = scheduler.claim_next().await.unwrap().expect("first job");
    let second = scheduler.claim_next().await.unwrap().expect("second job");

    // The first runner checkpointed a page before it died.
    let mut resume = ResumeState::new();
    resume.record(ResumeKey::global(first.command.as_str()), harvest_core::Cursor::new("cursor-1"));
    let progress = JobProgress {
        pages: 1,
        records: 2,
        last_page_at: None,
    };
    scheduler
        .jobs()
        .save_checkpoint(first.id, Some(&resume), &progress)
        .await
        .unwrap();
    let settled = scheduler.abandon(first.id, 0, lost()).await.unwrap();
    assert_eq!(settled.status, JobStatus::Queued);
    assert_eq!(settled.resume_state, Some(resume));

    // The second runner died before writing anything.
    let settled = scheduler.abandon(second.id, 0, lost()).await.unwrap();
    assert_eq!(settled.status, JobStatus::Failed);
}
