//! Output dataset partitioning.

use serde::{Deserialize, Serialize};

/// Record collections written to the output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Groups,
    Members,
    Projects,
    Issues,
    WorkItems,
    Timelogs,
    Releases,
    Milestones,
    MergeRequests,
    Pipelines,
    CodeQualityReports,
    SecurityFindings,
    TestSuites,
    Discussions,
    Commits,
    Vulnerabilities,
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Groups => "groups",
            Collection::Members => "members",
            Collection::Projects => "projects",
            Collection::Issues => "issues",
            Collection::WorkItems => "work_items",
            Collection::Timelogs => "timelogs",
            Collection::Releases => "releases",
            Collection::Milestones => "milestones",
            Collection::MergeRequests => "merge_requests",
            Collection::Pipelines => "pipelines",
            Collection::CodeQualityReports => "code_quality_reports",
            Collection::SecurityFindings => "security_findings",
            Collection::TestSuites => "test_suites",
            Collection::Discussions => "discussions",
            Collection::Commits => "commits",
            Collection::Vulnerabilities => "vulnerabilities",
            Collection::Users => "users",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity that owns written records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Owner {
    Global,
    Group(String),
    Project(String),
}

impl Owner {
    /// Partition prefix, e.g. `groups/acme/platform`.
    pub fn partition(&self) -> String {
        match self {
            Owner::Global => "global".to_string(),
            Owner::Group(path) => format!("groups/{}", path.trim_matches('/')),
            Owner::Project(path) => format!("projects/{}", path.trim_matches('/')),
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Owner::Global => None,
            Owner::Group(path) | Owner::Project(path) => Some(path),
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.partition())
    }
}
