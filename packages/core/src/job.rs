//! Job domain types: the unit of crawl work tracked by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::credential::CredentialId;
use crate::resume::{ResumeKey, ResumeState};
use crate::CoreError;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job crawls.
///
/// Values read back from storage that no longer name a known command
/// deserialize to [`Command::Unknown`]; the crawler treats those as no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ScopeDiscovery,
    Group,
    Project,
    Commits,
    MergeRequests,
    Issues,
    WorkItems,
    Vulnerabilities,
    Pipelines,
    Timelogs,
    Users,
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Global jobs spawned for every completed scope discovery.
    pub const GLOBAL: [Command; 3] = [Command::Users, Command::Vulnerabilities, Command::Timelogs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ScopeDiscovery => "scope_discovery",
            Command::Group => "group",
            Command::Project => "project",
            Command::Commits => "commits",
            Command::MergeRequests => "merge_requests",
            Command::Issues => "issues",
            Command::WorkItems => "work_items",
            Command::Vulnerabilities => "vulnerabilities",
            Command::Pipelines => "pipelines",
            Command::Timelogs => "timelogs",
            Command::Users => "users",
            Command::Unknown => "unknown",
        }
    }

    /// Whether the command only makes sense against a scope path.
    pub fn requires_scope(&self) -> bool {
        matches!(
            self,
            Command::Group
                | Command::Project
                | Command::Commits
                | Command::MergeRequests
                | Command::Issues
                | Command::WorkItems
                | Command::Pipelines
        )
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let command = match normalized.as_str() {
            "scope_discovery" | "discovery" => Command::ScopeDiscovery,
            "group" => Command::Group,
            "project" => Command::Project,
            "commits" => Command::Commits,
            "merge_requests" => Command::MergeRequests,
            "issues" => Command::Issues,
            "work_items" => Command::WorkItems,
            "vulnerabilities" => Command::Vulnerabilities,
            "pipelines" => Command::Pipelines,
            "timelogs" => Command::Timelogs,
            "users" => Command::Users,
            _ => return Err(CoreError::UnknownCommand(s.to_string())),
        };
        Ok(command)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a runner.
    #[default]
    Queued,
    /// Being crawled by a runner.
    Running,
    /// Every sequence of the job was consumed.
    Finished,
    /// No meaningful progress was possible.
    Failed,
    /// Stopped on request; resumes via an external command.
    Paused,
    /// The credential was rejected mid-crawl.
    CredentialExpired,
    /// Suspended until an administrator rotates the credential.
    WaitingCredentialRenewal,
    /// Credential rotated; runnable again from its resume state.
    CredentialRenewed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Finished,
        JobStatus::Failed,
        JobStatus::Paused,
        JobStatus::CredentialExpired,
        JobStatus::WaitingCredentialRenewal,
        JobStatus::CredentialRenewed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Whether a runner may pick the job up.
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::CredentialRenewed)
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Paused)
                | (Running, Finished)
                | (Running, Failed)
                | (Running, Paused)
                | (Running, Queued)
                | (Running, CredentialExpired)
                | (Failed, Queued)
                | (Paused, Queued)
                | (CredentialExpired, WaitingCredentialRenewal)
                | (WaitingCredentialRenewal, CredentialRenewed)
                | (CredentialRenewed, Running)
                | (CredentialRenewed, Paused)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
            JobStatus::CredentialExpired => "credential_expired",
            JobStatus::WaitingCredentialRenewal => "waiting_credential_renewal",
            JobStatus::CredentialRenewed => "credential_renewed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// Counters a runner accumulates while crawling a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobProgress {
    /// Pages fetched across every sequence of the job.
    pub pages: u64,
    /// Records appended to the output sink.
    pub records: u64,
    /// When the last page was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_page_at: Option<DateTime<Utc>>,
}

/// Credential a job crawls with, denormalized for dedup lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobOwner {
    pub credential_id: CredentialId,
    /// API provider the credential belongs to, e.g. a GitLab host.
    pub provider: String,
    /// Account on the provider the credential authenticates as.
    pub account: String,
}

/// Lookup key enforcing one live job per unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub provider: String,
    pub scope: String,
    pub command: Command,
}

/// A job represents one crawl unit executed by a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// What to crawl.
    pub command: Command,
    /// Group or project path the command applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_path: Option<String>,
    /// Branch restriction for commit crawls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Lower bound of the time window, for time-sliced commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Upper bound of the time window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
    /// Credential the job crawls with.
    pub owner: JobOwner,
    /// Discovery job that spawned this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<ResumeState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(command: Command, scope_path: Option<String>, owner: JobOwner) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            command,
            scope_path,
            branch: None,
            from: None,
            to: None,
            owner,
            origin_job_id: None,
            resume_state: None,
            progress: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Create the scope-discovery job for a credential.
    ///
    /// Discovery is keyed by credential account; scope and branch stay empty.
    pub fn discovery(owner: JobOwner) -> Self {
        Self::new(Command::ScopeDiscovery, None, owner)
    }

    /// Record the discovery job that spawned this one.
    pub fn with_origin(mut self, origin: JobId) -> Self {
        self.origin_job_id = Some(origin);
        self
    }

    /// Restrict the job to a time window.
    pub fn with_window(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Key used by the scheduler to find an existing job for the same unit.
    pub fn key(&self) -> JobKey {
        match self.command {
            Command::ScopeDiscovery => JobKey {
                provider: format!("{}/{}", self.owner.provider, self.owner.account),
                scope: String::new(),
                command: self.command,
            },
            command => JobKey {
                provider: self.owner.provider.clone(),
                scope: self.scope_path.clone().unwrap_or_default(),
                command,
            },
        }
    }

    /// Storage uniqueness key.
    ///
    /// Scoped jobs are unique per (provider, scope, branch, command);
    /// discovery jobs per (command, provider account).
    pub fn dedup_key(&self) -> String {
        match self.command {
            Command::ScopeDiscovery => format!(
                "{}|{}|{}",
                self.command, self.owner.provider, self.owner.account
            ),
            command => format!(
                "{}|{}|{}|{}",
                self.owner.provider,
                self.scope_path.as_deref().unwrap_or_default(),
                self.branch.as_deref().unwrap_or_default(),
                command
            ),
        }
    }

    /// Resume-state key of the job's own crawl unit.
    pub fn resume_key(&self) -> ResumeKey {
        ResumeKey::new(self.scope_path.clone(), self.command.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> JobOwner {
        JobOwner {
            credential_id: CredentialId::new(),
            provider: "gitlab.example.com".to_string(),
            account: "harvester-bot".to_string(),
        }
    }

    #[test]
    fn discovery_key_ignores_scope() {
        let mut job = Job::discovery(owner());
        job.scope_path = Some("ignored".into());
        let key = job.key();
        assert_eq!(key.scope, "");
        assert_eq!(key.provider, "gitlab.example.com/harvester-bot");
        assert_eq!(
            job.dedup_key(),
            "scope_discovery|gitlab.example.com|harvester-bot"
        );
    }

    #[test]
    fn scoped_key_uses_provider_scope_and_command() {
        let job = Job::new(Command::Project, Some("acme/api".into()), owner());
        assert_eq!(
            job.key(),
            JobKey {
                provider: "gitlab.example.com".into(),
                scope: "acme/api".into(),
                command: Command::Project,
            }
        );
        assert_eq!(job.dedup_key(), "gitlab.example.com|acme/api||project");
        assert_eq!(job.resume_key().to_string(), "acme/api:project");
    }

    #[test]
    fn global_job_resume_key() {
        let job = Job::new(Command::Users, None, owner());
        assert_eq!(job.resume_key().to_string(), "global:users");
    }

    #[test]
    fn status_machine() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Queued));
        assert!(Failed.can_transition_to(Queued));
        assert!(Paused.can_transition_to(Queued));
        assert!(CredentialExpired.can_transition_to(WaitingCredentialRenewal));
        assert!(WaitingCredentialRenewal.can_transition_to(CredentialRenewed));
        assert!(CredentialRenewed.can_transition_to(Running));

        assert!(!Failed.can_transition_to(Running));
        assert!(!Finished.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Finished));
        assert!(!CredentialExpired.can_transition_to(Running));
    }

    #[test]
    fn unknown_command_deserializes() {
        let command: Command = serde_json::from_str("\"wiki_pages\"").unwrap();
        assert_eq!(command, Command::Unknown);
        let command: Command = "merge-requests".parse().unwrap();
        assert_eq!(command, Command::MergeRequests);
        assert!("wiki".parse::<Command>().is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }
}
