//! Job synthesis from discovered areas, and the dedup/reset plan that turns
//! candidates into writes.

use std::collections::{HashMap, HashSet};

use harvest_core::{Area, AreaType, Command, Job, JobId, JobKey, JobStatus};

/// Jobs implied by a finished scope discovery: one per group, one per
/// project, plus the global jobs. All carry the discovery job as origin.
pub fn synthesize_candidates(discovery: &Job, areas: &[Area]) -> Vec<Job> {
    let scoped = areas.iter().map(|area| {
        let command = match area.area_type {
            AreaType::Group => Command::Group,
            AreaType::Project => Command::Project,
        };
        Job::new(command, Some(area.path.clone()), discovery.owner.clone())
    });
    let global = Command::GLOBAL
        .into_iter()
        .map(|command| Job::new(command, None, discovery.owner.clone()));

    let mut seen = HashSet::new();
    scoped
        .chain(global)
        .map(|job| job.with_origin(discovery.id))
        .filter(|job| seen.insert(job.key()))
        .collect()
}

/// Writes needed to bring the job table in line with a candidate set.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Candidates with no existing job.
    pub inserts: Vec<Job>,
    /// Existing failed jobs to return to `queued`.
    pub resets: Vec<JobId>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.resets.is_empty()
    }
}

/// Split candidates into inserts and resets against the existing jobs.
///
/// A candidate whose key is already taken is dropped, unless the job holding
/// the key has failed; that job is reset instead of inserting a duplicate.
pub fn plan_sync(existing: &[Job], candidates: Vec<Job>) -> SyncPlan {
    let lookup: HashMap<JobKey, &Job> = existing.iter().map(|job| (job.key(), job)).collect();

    let mut plan = SyncPlan::default();
    let mut reset = HashSet::new();
    for candidate in candidates {
        match lookup.get(&candidate.key()) {
            None => plan.inserts.push(candidate),
            Some(job) if job.status == JobStatus::Failed => {
                if reset.insert(job.id) {
                    plan.resets.push(job.id);
                }
            }
            Some(job) => {
                tracing::debug!(job_id = %job.id, status = %job.status, "candidate already scheduled");
            }
        }
    }
    plan
}
