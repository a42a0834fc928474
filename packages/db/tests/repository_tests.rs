#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use harvest_core::{
    Area, AreaType, Command, Credential, CredentialState, Cursor, Incident, Job, JobProgress,
    JobStatus, ResumeKey, ResumeState,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use db::DbError;
use db::repositories::{
    AreaRepository, CredentialRepository, IncidentRepository, JobFilter, JobRepository,
};

#[tokio::test]
async fn test_job_lifecycle() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let job = Job::new(Command::Project, Some("acme/api".into()), common::owner());
    let created = jobs.create(&job).await?;
    assert_eq!(created.id, job.id);
    assert_eq!(created.status, JobStatus::Queued);

    let next = jobs.next_runnable().await?.ok_or("no runnable job")?;
    assert_eq!(next.id, job.id);

    let running = jobs.transition(job.id, JobStatus::Running).await?;
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());
    assert!(jobs.next_runnable().await?.is_none());

    let invalid = jobs.transition(job.id, JobStatus::CredentialRenewed).await;
    assert!(matches!(invalid, Err(DbError::InvalidTransition { .. })));

    let mut state = ResumeState::new();
    state.record(ResumeKey::scoped("acme/api", "merge_requests"), Cursor::new("c2"));
    state.complete(ResumeKey::scoped("acme/api", "releases"));
    let progress = JobProgress {
        pages: 3,
        records: 42,
        last_page_at: None,
    };
    jobs.save_checkpoint(job.id, Some(&state), &progress).await?;

    let finished = jobs.transition(job.id, JobStatus::Finished).await?;
    assert!(finished.finished_at.is_some());
    assert_eq!(finished.resume_state.as_ref(), Some(&state));
    assert_eq!(finished.progress.as_ref().map(|p| p.records), Some(42));

    let missing = jobs.get(harvest_core::JobId::new()).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_insert_ignore_skips_duplicates() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);
    let owner = common::owner();

    let first = vec![
        Job::new(Command::Group, Some("acme".into()), owner.clone()),
        Job::new(Command::Project, Some("acme/api".into()), owner.clone()),
    ];
    assert_eq!(jobs.insert_ignore(&first).await?, 2);

    // Same units under fresh ids collide on the uniqueness key.
    let again = vec![
        Job::new(Command::Group, Some("acme".into()), owner.clone()),
        Job::new(Command::Users, None, owner.clone()),
    ];
    assert_eq!(jobs.insert_ignore(&again).await?, 1);

    let all = jobs.list(JobFilter::default()).await?;
    assert_eq!(all.len(), 3);

    let found = jobs
        .find_by_dedup_key(&first[0].dedup_key())
        .await?
        .ok_or("missing group job")?;
    assert_eq!(found.id, first[0].id);

    let for_provider = jobs.list_for_provider("gitlab.example.com").await?;
    assert_eq!(for_provider.len(), 3);
    assert!(jobs.list_for_provider("other.example.com").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reset_failed_and_requeue() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);
    let owner = common::owner();

    let mut failed = Job::new(Command::Issues, Some("acme/api".into()), owner.clone());
    failed.status = JobStatus::Failed;
    let mut running = Job::new(Command::Pipelines, Some("acme/api".into()), owner.clone());
    running.status = JobStatus::Running;
    let finished = {
        let mut job = Job::new(Command::Commits, Some("acme/api".into()), owner.clone());
        job.status = JobStatus::Finished;
        job
    };
    for job in [&failed, &running, &finished] {
        jobs.create(job).await?;
    }

    // Only rows still failed are reset.
    assert_eq!(jobs.reset_failed(&[failed.id, finished.id]).await?, 1);
    assert_eq!(jobs.get(failed.id).await?.status, JobStatus::Queued);
    assert_eq!(jobs.get(finished.id).await?.status, JobStatus::Finished);
    assert_eq!(jobs.reset_failed(&[]).await?, 0);

    assert_eq!(jobs.requeue_stale().await?, 1);
    assert_eq!(jobs.get(running.id).await?.status, JobStatus::Queued);

    let queued = jobs
        .list(JobFilter {
            status: Some(JobStatus::Queued),
            ..Default::default()
        })
        .await?;
    assert_eq!(queued.len(), 2);

    let counts = jobs.count_by_status().await?;
    assert_eq!(counts.get(&JobStatus::Queued).copied(), Some(2));
    assert_eq!(counts.get(&JobStatus::Finished).copied(), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_credential_rotation_renews_waiting_jobs() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let credentials = CredentialRepository::new(db.clone());
    let jobs = JobRepository::new(db);

    let credential = Credential::new("gitlab.example.com", "bot");
    credentials
        .create(&credential, &SecretString::from("old-token".to_string()))
        .await?;
    assert_eq!(
        credentials.token(credential.id).await?.expose_secret(),
        "old-token"
    );

    let mut waiting = Job::new(Command::Project, Some("acme/api".into()), credential.owner());
    waiting.status = JobStatus::WaitingCredentialRenewal;
    jobs.create(&waiting).await?;

    let expired = credentials.mark_expired(credential.id).await?;
    assert_eq!(expired.state, CredentialState::Expired);

    let rotated = credentials
        .rotate(credential.id, &SecretString::from("new-token".to_string()))
        .await?;
    assert_eq!(rotated.state, CredentialState::Valid);
    assert!(rotated.rotated_at.is_some());
    assert_eq!(
        credentials.token(credential.id).await?.expose_secret(),
        "new-token"
    );

    assert_eq!(jobs.renew_waiting(credential.id).await?, 1);
    let renewed = jobs.get(waiting.id).await?;
    assert_eq!(renewed.status, JobStatus::CredentialRenewed);
    assert_eq!(
        jobs.next_runnable().await?.map(|job| job.id),
        Some(waiting.id)
    );
    Ok(())
}

#[tokio::test]
async fn test_area_upsert_keeps_identity() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let areas = AreaRepository::new(db);

    let group = Area::new(AreaType::Group, "gid://gitlab/Group/7", "acme", "Acme");
    let project = Area::new(AreaType::Project, "gid://gitlab/Project/7", "acme/api", "API");
    areas.upsert_many(&[group.clone(), project]).await?;

    // Same natural id, corrected path.
    let moved = Area::new(AreaType::Group, "gid://gitlab/Group/7", "acme-corp", "Acme");
    let stored = areas.upsert(&moved).await?;
    assert_eq!(stored.path, "acme-corp");
    assert_eq!(stored.area_type, AreaType::Group);

    assert_eq!(areas.list(None).await?.len(), 2);
    assert_eq!(areas.list(Some(AreaType::Project)).await?.len(), 1);
    assert!(areas.get_by_path("acme").await?.is_none());
    assert!(areas.get_by_path("acme-corp").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_area_upsert_takes_over_a_vacated_path() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let areas = AreaRepository::new(db);

    areas
        .upsert(&Area::new(AreaType::Project, "gid://gitlab/Project/1", "acme/old", "Old"))
        .await?;

    // Project 1 was renamed and project 2 now lives at its old path. In path
    // order project 2 is written before project 1 gets its new path.
    let stored = areas
        .upsert_many(&[
            Area::new(AreaType::Project, "gid://gitlab/Project/2", "acme/old", "Old"),
            Area::new(AreaType::Project, "gid://gitlab/Project/1", "acme/zzz", "Zzz"),
        ])
        .await?;
    assert_eq!(stored.len(), 2);

    let holder = areas.get_by_path("acme/old").await?.ok_or("acme/old missing")?;
    assert_eq!(holder.natural_id, "gid://gitlab/Project/2");
    let renamed = areas.get_by_path("acme/zzz").await?.ok_or("acme/zzz missing")?;
    assert_eq!(renamed.natural_id, "gid://gitlab/Project/1");
    assert_eq!(areas.list(None).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_incidents_are_appended() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let incidents = IncidentRepository::new(db);

    incidents
        .record(&Incident::new("insert_jobs", 3, 2, json!({"provider": "gitlab"})))
        .await?;
    incidents
        .record(&Incident::new("reset_jobs", 1, 0, json!([])))
        .await?;

    let listed = incidents.list(10).await?;
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|i| i.operation == "insert_jobs" && i.actual == 2));
    Ok(())
}
