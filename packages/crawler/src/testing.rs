//! In-memory collaborators for tests: a scripted API client, a recording
//! sink and a recording checkpointer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use harvest_core::{Collection, JobId, JobProgress, Owner, ResumeState};
use serde_json::{Value, json};

use crate::client::{ClientFuture, TimeWindow};
use crate::orchestrator::{CheckpointFuture, Checkpointer};
use crate::sink::SinkFuture;
use crate::{ApiClient, OutputSink, Query, QueryError, SinkError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Script {
    /// Connection pages served by cursor `cursor-<n>`.
    Pages(Vec<Vec<Value>>),
    /// Object placed at the query's path.
    Entity(Value),
    /// Response returned as-is.
    Raw(Value),
    Fail(QueryError),
}

/// [`ApiClient`] answering from scripts keyed by query name.
///
/// Unscripted queries answer with an empty last page.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: HashMap<String, Script>,
    failures: HashMap<(String, usize), QueryError>,
    branches: HashMap<String, Vec<Value>>,
    commits: HashMap<(String, String), Vec<Value>>,
    rest_failure: Option<QueryError>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(mut self, query: &str, pages: Vec<Vec<Value>>) -> Self {
        self.scripts.insert(query.to_string(), Script::Pages(pages));
        self
    }

    pub fn entity(mut self, query: &str, value: Value) -> Self {
        self.scripts.insert(query.to_string(), Script::Entity(value));
        self
    }

    pub fn raw(mut self, query: &str, response: Value) -> Self {
        self.scripts.insert(query.to_string(), Script::Raw(response));
        self
    }

    /// Every call of `query` fails.
    pub fn fail(mut self, query: &str, error: QueryError) -> Self {
        self.scripts.insert(query.to_string(), Script::Fail(error));
        self
    }

    /// The request for page `page` (0-based) of `query` fails.
    pub fn fail_at(mut self, query: &str, page: usize, error: QueryError) -> Self {
        self.failures.insert((query.to_string(), page), error);
        self
    }

    /// Branches of a project, as REST branch objects.
    pub fn branches(mut self, project: &str, names: &[&str]) -> Self {
        self.branches.insert(
            project.to_string(),
            names.iter().map(|name| json!({ "name": name })).collect(),
        );
        self
    }

    /// `count` commits on a branch.
    pub fn commits(mut self, project: &str, branch: &str, count: usize) -> Self {
        let commits = (0..count)
            .map(|i| json!({ "id": format!("{branch}-{i}"), "title": format!("commit {i}") }))
            .collect();
        self.commits
            .insert((project.to_string(), branch.to_string()), commits);
        self
    }

    /// Every REST call fails.
    pub fn fail_rest(mut self, error: QueryError) -> Self {
        self.rest_failure = Some(error);
        self
    }

    /// Variables of every call made for `query`, in order.
    pub fn calls(&self, query: &str) -> Vec<Value> {
        lock(&self.calls)
            .iter()
            .filter(|(name, _)| name == query)
            .map(|(_, variables)| variables.clone())
            .collect()
    }

    fn record(&self, name: &str, variables: Value) {
        lock(&self.calls).push((name.to_string(), variables));
    }

    fn answer(&self, query: &Query, variables: &Value) -> Result<Value, QueryError> {
        let page = variables
            .get("after")
            .and_then(Value::as_str)
            .and_then(|c| c.strip_prefix("cursor-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);

        if let Some(error) = self.failures.get(&(query.name.to_string(), page)) {
            return Err(error.clone());
        }

        match self.scripts.get(query.name) {
            Some(Script::Fail(error)) => Err(error.clone()),
            Some(Script::Raw(response)) => Ok(response.clone()),
            Some(Script::Entity(value)) => Ok(nest(query.path, value.clone())),
            Some(Script::Pages(pages)) => {
                let nodes = pages.get(page).cloned().unwrap_or_default();
                let has_next = page + 1 < pages.len();
                Ok(nest(
                    query.path,
                    json!({
                        "nodes": nodes,
                        "pageInfo": {
                            "hasNextPage": has_next,
                            "endCursor": format!("cursor-{}", page + 1),
                        }
                    }),
                ))
            }
            None => Ok(nest(
                query.path,
                json!({ "nodes": [], "pageInfo": { "hasNextPage": false } }),
            )),
        }
    }

    fn rest_page(
        &self,
        items: Option<&Vec<Value>>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Value>, QueryError> {
        if let Some(error) = &self.rest_failure {
            return Err(error.clone());
        }
        let start = (page.saturating_sub(1) * per_page) as usize;
        Ok(items
            .map(|items| {
                items
                    .iter()
                    .skip(start)
                    .take(per_page as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn nest(path: &[&str], value: Value) -> Value {
    path.iter().rev().fold(value, |inner, key| {
        let mut map = serde_json::Map::new();
        map.insert((*key).to_string(), inner);
        Value::Object(map)
    })
}

impl ApiClient for ScriptedClient {
    fn query<'a>(&'a self, query: &'a Query, variables: Value) -> ClientFuture<'a, Value> {
        let result = self.answer(query, &variables);
        self.record(query.name, variables);
        Box::pin(async move { result })
    }

    fn list_branches<'a>(
        &'a self,
        project: &'a str,
        page: u32,
        per_page: u32,
    ) -> ClientFuture<'a, Vec<Value>> {
        self.record("branches", json!({ "project": project, "page": page }));
        let result = self.rest_page(self.branches.get(project), page, per_page);
        Box::pin(async move { result })
    }

    fn list_commits<'a>(
        &'a self,
        project: &'a str,
        branch: &'a str,
        page: u32,
        per_page: u32,
        _window: TimeWindow,
    ) -> ClientFuture<'a, Vec<Value>> {
        self.record(
            "commits",
            json!({ "project": project, "branch": branch, "page": page }),
        );
        let result = self.rest_page(
            self.commits.get(&(project.to_string(), branch.to_string())),
            page,
            per_page,
        );
        Box::pin(async move { result })
    }
}

/// One recorded append.
#[derive(Debug, Clone)]
pub struct Appended {
    pub collection: Collection,
    pub owner: Owner,
    pub job_id: Option<JobId>,
    pub records: Vec<Value>,
}

/// [`OutputSink`] keeping every append in memory.
#[derive(Default)]
pub struct MemorySink {
    appends: Mutex<Vec<Appended>>,
    fail: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail.
    pub fn fail_appends(&self) {
        *lock(&self.fail) = true;
    }

    pub fn appends(&self) -> Vec<Appended> {
        lock(&self.appends).clone()
    }

    /// Every record written to `collection`, in write order.
    pub fn records(&self, collection: Collection) -> Vec<Value> {
        lock(&self.appends)
            .iter()
            .filter(|a| a.collection == collection)
            .flat_map(|a| a.records.clone())
            .collect()
    }
}

impl OutputSink for MemorySink {
    fn append<'a>(
        &'a self,
        collection: Collection,
        owner: &'a Owner,
        job_id: Option<JobId>,
        records: &'a [Value],
    ) -> SinkFuture<'a> {
        let result = if *lock(&self.fail) {
            Err(SinkError("sink unavailable".into()))
        } else {
            if !records.is_empty() {
                lock(&self.appends).push(Appended {
                    collection,
                    owner: owner.clone(),
                    job_id,
                    records: records.to_vec(),
                });
            }
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// [`Checkpointer`] recording every saved state.
#[derive(Default)]
pub struct MemoryCheckpointer {
    saves: Mutex<Vec<(ResumeState, JobProgress)>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> usize {
        lock(&self.saves).len()
    }

    pub fn last(&self) -> Option<ResumeState> {
        lock(&self.saves).last().map(|(state, _)| state.clone())
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn save<'a>(&'a self, state: &'a ResumeState, progress: &'a JobProgress) -> CheckpointFuture<'a> {
        lock(&self.saves).push((state.clone(), progress.clone()));
        Box::pin(async { Ok(()) })
    }
}
