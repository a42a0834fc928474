//! Commit history over the REST listing.
//!
//! Commits are paged by number, not cursor. Each branch is its own unit,
//! checkpointed under `<project>:commits@<branch>` with the next page number
//! as its cursor.

use harvest_core::{Collection, Cursor, Owner, ResumeKey};
use serde_json::Value;

use super::{CrawlRun, Crawler, Interruption, Units, annotate};
use crate::TimeWindow;
use crate::pagination::paginate_offset;

impl Crawler {
    /// Commits of `branch`, or of every branch of the project.
    pub(super) async fn crawl_commits(
        &self,
        path: &str,
        branch: Option<&str>,
        window: TimeWindow,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let branches = match branch {
            Some(branch) => vec![branch.to_string()],
            None => self.branches(path, run).await?,
        };

        let mut units = Units::default();
        for branch in &branches {
            units.absorb(self.commit_branch(path, branch, window, run).await)?;
        }
        units.finish()
    }

    async fn branches(&self, path: &str, run: &CrawlRun<'_>) -> Result<Vec<String>, Interruption> {
        let client = self.client.as_ref();
        let listed = paginate_offset(self.config.commit_page_size, |offset, limit| {
            client.list_branches(path, offset / limit + 1, limit)
        })
        .await;

        match listed {
            Ok(branches) => Ok(branches
                .iter()
                .filter_map(|b| b.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()),
            Err(e) => {
                tracing::warn!(project = path, "listing branches failed: {}", e);
                run.note_failure(&e);
                if e.is_credential_failure() {
                    Err(Interruption::Credential(e))
                } else {
                    Err(Interruption::Query(e))
                }
            }
        }
    }

    async fn commit_branch(
        &self,
        path: &str,
        branch: &str,
        window: TimeWindow,
        run: &CrawlRun<'_>,
    ) -> Result<(), Interruption> {
        let key = ResumeKey::scoped(path, format!("commits@{branch}"));
        if run.is_complete(&key).await {
            return Ok(());
        }

        let owner = Owner::Project(path.to_string());
        let per_page = self.config.commit_page_size;
        let mut page = run
            .cursor(&key)
            .await
            .and_then(|c| c.as_str().parse::<u32>().ok())
            .unwrap_or(1);

        loop {
            if run.is_cancelled() {
                return Err(Interruption::Cancelled);
            }

            let commits = match self
                .client
                .list_commits(path, branch, page, per_page, window)
                .await
            {
                Ok(commits) => commits,
                Err(e) => {
                    tracing::warn!(project = path, branch, page, "listing commits failed: {}", e);
                    run.note_failure(&e);
                    return Err(if e.is_credential_failure() {
                        Interruption::Credential(e)
                    } else {
                        Interruption::Query(e)
                    });
                }
            };

            let count = commits.len();
            let records: Vec<Value> = commits
                .into_iter()
                .map(|commit| annotate(commit, "branch", branch))
                .collect();
            self.sink
                .append(Collection::Commits, &owner, run.job_id(), &records)
                .await
                .map_err(Interruption::Sink)?;
            run.record_page(count).await;

            if count < per_page as usize {
                tracing::debug!(project = path, branch, pages = page, "branch commits complete");
                run.checkpoint(key, None).await;
                return Ok(());
            }
            page += 1;
            run.checkpoint(key.clone(), Some(Cursor::new(page.to_string())))
                .await;
        }
    }
}
