//! Entity crawls and their enhancements.

use std::future::ready;

use harvest_core::{Collection, Owner, ResumeKey};
use serde_json::{Value, json};

use super::{CrawlRun, Crawler, Interruption, Target, Units, annotate};
use crate::TimeWindow;
use crate::query::{self, Query};

/// Field linking a sub-crawled record to the entity it was crawled for.
const PARENT_FIELD: &str = "_parent_id";

/// Entities that carry a discussion thread.
#[derive(Debug, Clone, Copy)]
enum Discussable {
    MergeRequest,
    Issue,
    Vulnerability,
}

impl Discussable {
    fn query(self) -> &'static Query {
        match self {
            Discussable::MergeRequest => &query::MERGE_REQUEST_DISCUSSIONS,
            Discussable::Issue => &query::ISSUE_DISCUSSIONS,
            Discussable::Vulnerability => &query::VULNERABILITY_DISCUSSIONS,
        }
    }
}

const PIPELINE_REPORTS: [(&Query, Collection); 3] = [
    (&query::CODE_QUALITY_REPORTS, Collection::CodeQualityReports),
    (&query::SECURITY_FINDINGS, Collection::SecurityFindings),
    (&query::TEST_SUITES, Collection::TestSuites),
];

fn scope_variables(path: &str) -> Value {
    json!({ "fullPath": path })
}

fn with_window(mut variables: Value, window: TimeWindow) -> Value {
    if let Value::Object(map) = &mut variables {
        if let Some(from) = window.from {
            map.insert("startTime".into(), Value::String(from.to_rfc3339()));
        }
        if let Some(to) = window.to {
            map.insert("endTime".into(), Value::String(to.to_rfc3339()));
        }
    }
    variables
}

impl Crawler {
    /// Group record, then descendant groups, members, projects, issues and
    /// time logs.
    pub(super) async fn crawl_group(
        &self,
        path: &str,
        request: &super::CrawlRequest,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Group(path.to_string());
        let target = |collection| Target {
            collection,
            owner: &owner,
        };
        let mut units = Units::default();

        units.absorb(
            self.entity(
                run,
                ResumeKey::scoped(path, "group"),
                &query::GROUP,
                scope_variables(path),
                target(Collection::Groups),
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "descendant_groups"),
                &query::DESCENDANT_GROUPS,
                scope_variables(path),
                target(Collection::Groups),
                ready,
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "members"),
                &query::GROUP_MEMBERS,
                scope_variables(path),
                target(Collection::Members),
                ready,
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "projects"),
                &query::GROUP_PROJECTS,
                scope_variables(path),
                target(Collection::Projects),
                ready,
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "issues"),
                &query::GROUP_ISSUES,
                scope_variables(path),
                target(Collection::Issues),
                |item| self.enhance_discussions(run, Discussable::Issue, &owner, item),
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "timelogs"),
                &query::GROUP_TIMELOGS,
                with_window(scope_variables(path), request.window),
                target(Collection::Timelogs),
                ready,
            )
            .await,
        )?;

        units.finish()
    }

    /// Project record, then releases, milestones, merge requests, pipelines
    /// and commits of every branch.
    pub(super) async fn crawl_project(
        &self,
        path: &str,
        request: &super::CrawlRequest,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Project(path.to_string());
        let target = |collection| Target {
            collection,
            owner: &owner,
        };
        let mut units = Units::default();

        units.absorb(
            self.entity(
                run,
                ResumeKey::scoped(path, "project"),
                &query::PROJECT,
                scope_variables(path),
                target(Collection::Projects),
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "releases"),
                &query::PROJECT_RELEASES,
                scope_variables(path),
                target(Collection::Releases),
                ready,
            )
            .await,
        )?;
        units.absorb(
            self.unit(
                run,
                ResumeKey::scoped(path, "milestones"),
                &query::PROJECT_MILESTONES,
                scope_variables(path),
                target(Collection::Milestones),
                ready,
            )
            .await,
        )?;
        units.absorb(self.crawl_merge_requests(path, run).await)?;
        units.absorb(self.crawl_pipelines(path, run).await)?;
        units.absorb(
            self.crawl_commits(path, request.branch.as_deref(), request.window, run)
                .await,
        )?;

        units.finish()
    }

    pub(super) async fn crawl_merge_requests(
        &self,
        path: &str,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Project(path.to_string());
        self.unit(
            run,
            ResumeKey::scoped(path, "merge_requests"),
            &query::PROJECT_MERGE_REQUESTS,
            scope_variables(path),
            Target {
                collection: Collection::MergeRequests,
                owner: &owner,
            },
            |item| self.enhance_discussions(run, Discussable::MergeRequest, &owner, item),
        )
        .await
    }

    pub(super) async fn crawl_issues(
        &self,
        path: &str,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Project(path.to_string());
        self.unit(
            run,
            ResumeKey::scoped(path, "issues"),
            &query::PROJECT_ISSUES,
            scope_variables(path),
            Target {
                collection: Collection::Issues,
                owner: &owner,
            },
            |item| self.enhance_discussions(run, Discussable::Issue, &owner, item),
        )
        .await
    }

    pub(super) async fn crawl_work_items(
        &self,
        path: &str,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Project(path.to_string());
        self.unit(
            run,
            ResumeKey::scoped(path, "work_items"),
            &query::PROJECT_WORK_ITEMS,
            scope_variables(path),
            Target {
                collection: Collection::WorkItems,
                owner: &owner,
            },
            ready,
        )
        .await
    }

    pub(super) async fn crawl_pipelines(
        &self,
        path: &str,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Project(path.to_string());
        self.unit(
            run,
            ResumeKey::scoped(path, "pipelines"),
            &query::PROJECT_PIPELINES,
            scope_variables(path),
            Target {
                collection: Collection::Pipelines,
                owner: &owner,
            },
            |item| self.enhance_pipeline(run, path, &owner, item),
        )
        .await
    }

    pub(super) async fn crawl_users(&self, run: &CrawlRun<'_>) -> Result<(), Interruption> {
        self.unit(
            run,
            ResumeKey::global("users"),
            &query::USERS,
            json!({}),
            Target {
                collection: Collection::Users,
                owner: &Owner::Global,
            },
            ready,
        )
        .await
    }

    pub(super) async fn crawl_vulnerabilities(
        &self,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let owner = Owner::Global;
        self.unit(
            run,
            ResumeKey::global("vulnerabilities"),
            &query::VULNERABILITIES,
            json!({}),
            Target {
                collection: Collection::Vulnerabilities,
                owner: &owner,
            },
            |item| self.enhance_discussions(run, Discussable::Vulnerability, &owner, item),
        )
        .await
    }

    pub(super) async fn crawl_timelogs(
        &self,
        window: TimeWindow,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        self.unit(
            run,
            ResumeKey::global("timelogs"),
            &query::TIMELOGS,
            with_window(json!({}), window),
            Target {
                collection: Collection::Timelogs,
                owner: &Owner::Global,
            },
            ready,
        )
        .await
    }

    /// Crawl the discussion thread of a merge request, issue or
    /// vulnerability. The item itself passes through unchanged.
    async fn enhance_discussions(
        &self,
        run: &CrawlRun<'_>,
        kind: Discussable,
        owner: &Owner,
        item: Value,
    ) -> Value {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            tracing::debug!(?kind, "item without id, no discussions");
            return item;
        };
        let id = id.to_string();

        self.sweep(
            run,
            kind.query(),
            json!({ "id": id }),
            Target {
                collection: Collection::Discussions,
                owner,
            },
            |discussion| ready(annotate(discussion, PARENT_FIELD, &id)),
        )
        .await;
        item
    }

    /// Crawl a pipeline's code-quality reports, security findings and test
    /// suites, one after another.
    async fn enhance_pipeline(
        &self,
        run: &CrawlRun<'_>,
        project: &str,
        owner: &Owner,
        item: Value,
    ) -> Value {
        let (Some(id), Some(iid)) = (
            item.get("id").and_then(Value::as_str),
            item.get("iid").and_then(Value::as_str),
        ) else {
            tracing::debug!(project, "pipeline without id, no reports");
            return item;
        };
        let (id, iid) = (id.to_string(), iid.to_string());

        for (query, collection) in PIPELINE_REPORTS {
            self.sweep(
                run,
                query,
                json!({ "fullPath": project, "iid": iid }),
                Target { collection, owner },
                |report| ready(annotate(report, PARENT_FIELD, &id)),
            )
            .await;
            if run.credential_failure().is_some() {
                break;
            }
        }
        item
    }
}
