//! Query descriptors.
//!
//! Every paginated query declares where its connection lives in the response.
//! Extraction follows that path exactly; the only fallback is descending into
//! a `data` wrapper (see [`crate::pagination::extract_page`]).

/// A GraphQL document plus the path to the object it returns.
///
/// For paginated queries `path` points at the connection carrying `nodes`
/// (or `edges`) and `pageInfo`; for entity queries it points at the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    pub name: &'static str,
    pub document: &'static str,
    pub path: &'static [&'static str],
}

// Entities

pub const GROUP: Query = Query {
    name: "group",
    document: r#"query($fullPath: ID!) {
  group(fullPath: $fullPath) {
    id name fullPath description visibility createdAt webUrl
    parent { id fullPath }
  }
}"#,
    path: &["group"],
};

pub const PROJECT: Query = Query {
    name: "project",
    document: r#"query($fullPath: ID!) {
  project(fullPath: $fullPath) {
    id name fullPath description visibility createdAt lastActivityAt webUrl
    archived starCount forksCount
    namespace { id fullPath }
    repository { rootRef }
  }
}"#,
    path: &["project"],
};

// Group sub-crawls

pub const DESCENDANT_GROUPS: Query = Query {
    name: "descendant_groups",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  group(fullPath: $fullPath) {
    descendantGroups(first: $first, after: $after) {
      nodes { id name fullPath visibility createdAt parent { id fullPath } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["group", "descendantGroups"],
};

pub const GROUP_MEMBERS: Query = Query {
    name: "group_members",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  group(fullPath: $fullPath) {
    groupMembers(first: $first, after: $after) {
      nodes {
        id createdAt expiresAt
        accessLevel { integerValue stringValue }
        user { id username name state }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["group", "groupMembers"],
};

pub const GROUP_PROJECTS: Query = Query {
    name: "group_projects",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  group(fullPath: $fullPath) {
    projects(first: $first, after: $after, includeSubgroups: false) {
      nodes { id name fullPath visibility createdAt lastActivityAt archived }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["group", "projects"],
};

pub const GROUP_ISSUES: Query = Query {
    name: "group_issues",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  group(fullPath: $fullPath) {
    issues(first: $first, after: $after, includeSubgroups: false) {
      nodes {
        id iid title state createdAt updatedAt closedAt
        author { id username }
        assignees { nodes { id username } }
        labels { nodes { title } }
        timeEstimate totalTimeSpent
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["group", "issues"],
};

pub const GROUP_TIMELOGS: Query = Query {
    name: "group_timelogs",
    document: r#"query($fullPath: ID!, $first: Int, $after: String, $startTime: Time, $endTime: Time) {
  group(fullPath: $fullPath) {
    timelogs(first: $first, after: $after, startTime: $startTime, endTime: $endTime) {
      nodes { id spentAt timeSpent summary user { id username } issue { id } mergeRequest { id } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["group", "timelogs"],
};

// Project sub-crawls

pub const PROJECT_RELEASES: Query = Query {
    name: "project_releases",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    releases(first: $first, after: $after) {
      nodes { tagName name description createdAt releasedAt author { id username } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["project", "releases"],
};

pub const PROJECT_MILESTONES: Query = Query {
    name: "project_milestones",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    milestones(first: $first, after: $after) {
      nodes { id iid title state startDate dueDate createdAt }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["project", "milestones"],
};

pub const PROJECT_MERGE_REQUESTS: Query = Query {
    name: "project_merge_requests",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    mergeRequests(first: $first, after: $after) {
      nodes {
        id iid title state draft createdAt updatedAt mergedAt closedAt
        sourceBranch targetBranch
        author { id username }
        mergeUser { id username }
        approvedBy { nodes { id username } }
        diffStatsSummary { additions deletions fileCount }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["project", "mergeRequests"],
};

pub const PROJECT_ISSUES: Query = Query {
    name: "project_issues",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    issues(first: $first, after: $after) {
      nodes {
        id iid title state createdAt updatedAt closedAt
        author { id username }
        assignees { nodes { id username } }
        labels { nodes { title } }
        timeEstimate totalTimeSpent
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["project", "issues"],
};

pub const PROJECT_WORK_ITEMS: Query = Query {
    name: "project_work_items",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    workItems(first: $first, after: $after) {
      nodes { id iid title state createdAt updatedAt closedAt workItemType { name } author { id username } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["project", "workItems"],
};

pub const PROJECT_PIPELINES: Query = Query {
    name: "project_pipelines",
    document: r#"query($fullPath: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    pipelines(first: $first, after: $after) {
      nodes {
        id iid status source ref sha createdAt startedAt finishedAt duration coverage
        user { id username }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["project", "pipelines"],
};

// Pipeline reports

pub const CODE_QUALITY_REPORTS: Query = Query {
    name: "code_quality_reports",
    document: r#"query($fullPath: ID!, $iid: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    pipeline(iid: $iid) {
      codeQualityReports(first: $first, after: $after) {
        nodes { description fingerprint severity path line webUrl engineName }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}"#,
    path: &["project", "pipeline", "codeQualityReports"],
};

pub const SECURITY_FINDINGS: Query = Query {
    name: "security_findings",
    document: r#"query($fullPath: ID!, $iid: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    pipeline(iid: $iid) {
      securityReportFindings(first: $first, after: $after) {
        nodes { uuid name title severity reportType state scanner { name } location { ... on VulnerabilityLocationSast { file startLine } } }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}"#,
    path: &["project", "pipeline", "securityReportFindings"],
};

pub const TEST_SUITES: Query = Query {
    name: "test_suites",
    document: r#"query($fullPath: ID!, $iid: ID!, $first: Int, $after: String) {
  project(fullPath: $fullPath) {
    pipeline(iid: $iid) {
      testReportSummary {
        testSuites(first: $first, after: $after) {
          nodes { name totalTime totalCount successCount failedCount skippedCount errorCount buildIds }
          pageInfo { hasNextPage endCursor }
        }
      }
    }
  }
}"#,
    path: &["project", "pipeline", "testReportSummary", "testSuites"],
};

// Discussions, addressed by global id

pub const MERGE_REQUEST_DISCUSSIONS: Query = Query {
    name: "merge_request_discussions",
    document: r#"query($id: MergeRequestID!, $first: Int, $after: String) {
  mergeRequest(id: $id) {
    discussions(first: $first, after: $after) {
      nodes { id createdAt resolved notes { nodes { id body system createdAt author { id username } } } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["mergeRequest", "discussions"],
};

pub const ISSUE_DISCUSSIONS: Query = Query {
    name: "issue_discussions",
    document: r#"query($id: IssueID!, $first: Int, $after: String) {
  issue(id: $id) {
    discussions(first: $first, after: $after) {
      nodes { id createdAt resolved notes { nodes { id body system createdAt author { id username } } } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["issue", "discussions"],
};

pub const VULNERABILITY_DISCUSSIONS: Query = Query {
    name: "vulnerability_discussions",
    document: r#"query($id: VulnerabilityID!, $first: Int, $after: String) {
  vulnerability(id: $id) {
    discussions(first: $first, after: $after) {
      nodes { id createdAt resolved notes { nodes { id body system createdAt author { id username } } } }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#,
    path: &["vulnerability", "discussions"],
};

// Global

pub const USERS: Query = Query {
    name: "users",
    document: r#"query($first: Int, $after: String) {
  users(first: $first, after: $after) {
    nodes { id username name state createdAt lastActivityOn bot publicEmail }
    pageInfo { hasNextPage endCursor }
  }
}"#,
    path: &["users"],
};

pub const VULNERABILITIES: Query = Query {
    name: "vulnerabilities",
    document: r#"query($first: Int, $after: String) {
  vulnerabilities(first: $first, after: $after) {
    nodes {
      id title state severity reportType detectedAt resolvedAt dismissedAt
      project { id fullPath }
      scanner { name }
    }
    pageInfo { hasNextPage endCursor }
  }
}"#,
    path: &["vulnerabilities"],
};

pub const TIMELOGS: Query = Query {
    name: "timelogs",
    document: r#"query($first: Int, $after: String, $startTime: Time, $endTime: Time) {
  timelogs(first: $first, after: $after, startTime: $startTime, endTime: $endTime) {
    nodes { id spentAt timeSpent summary user { id username } project { id fullPath } issue { id } mergeRequest { id } }
    pageInfo { hasNextPage endCursor }
  }
}"#,
    path: &["timelogs"],
};

// Scope discovery

pub const DISCOVERY_GROUPS: Query = Query {
    name: "discovery_groups",
    document: r#"query($first: Int, $after: String) {
  groups(first: $first, after: $after) {
    nodes { id name fullPath }
    pageInfo { hasNextPage endCursor }
  }
}"#,
    path: &["groups"],
};

pub const DISCOVERY_PROJECTS: Query = Query {
    name: "discovery_projects",
    document: r#"query($first: Int, $after: String) {
  projects(first: $first, after: $after, membership: true) {
    nodes { id name fullPath }
    pageInfo { hasNextPage endCursor }
  }
}"#,
    path: &["projects"],
};
