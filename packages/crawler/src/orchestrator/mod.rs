//! Crawl orchestration: command dispatch, checkpointed crawl units and the
//! enhancement sub-crawls run for every discovered entity.
//!
//! A job's crawl is a sequence of units. Each unit is one paginated sequence
//! whose cursor is checkpointed under its own [`ResumeKey`] after every page;
//! units already marked complete are skipped on resume. Enhancements are
//! sub-crawls of a single item (its discussions, a pipeline's reports) and
//! are not checkpointed: the page holding the item is only checkpointed after
//! all of its enhancements finished.

mod commits;
mod discovery;
mod entities;
mod run;

use std::future::Future;
use std::sync::Arc;

use harvest_core::{Collection, Command, Job, Owner, ResumeKey};
use serde_json::Value;

use crate::pagination::{PageBatch, PageRequest, Pagination, StopReason, paginate, resolve};
use crate::{ApiClient, CrawlConfig, OutputSink, Query, QueryError, SinkError, TimeWindow};

pub use run::{CheckpointFuture, Checkpointer, CrawlRun};

/// What to crawl.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRequest {
    pub command: Command,
    pub scope: Option<String>,
    pub branch: Option<String>,
    pub window: TimeWindow,
}

impl CrawlRequest {
    pub fn new(command: Command, scope: Option<String>) -> Self {
        Self {
            command,
            scope,
            branch: None,
            window: TimeWindow::default(),
        }
    }
}

impl From<&Job> for CrawlRequest {
    fn from(job: &Job) -> Self {
        Self {
            command: job.command,
            scope: job.scope_path.clone(),
            branch: job.branch.clone(),
            window: TimeWindow {
                from: job.from,
                to: job.to,
            },
        }
    }
}

/// Why a crawl stopped before completing.
#[derive(Debug, Clone)]
pub enum Interruption {
    Cancelled,
    /// The credential was rejected; nothing further can succeed with it.
    Credential(QueryError),
    Query(QueryError),
    /// A response did not contain the declared path.
    Extraction(&'static str),
    Sink(SinkError),
}

impl Interruption {
    /// Interruptions that end the whole crawl rather than one unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Interruption::Cancelled | Interruption::Credential(_))
    }
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interruption::Cancelled => f.write_str("cancelled"),
            Interruption::Credential(e) => write!(f, "{e}"),
            Interruption::Query(e) => write!(f, "{e}"),
            Interruption::Extraction(query) => write!(f, "nothing to extract from {query}"),
            Interruption::Sink(e) => write!(f, "{e}"),
        }
    }
}

/// Result of one crawl step.
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    /// Every unit of the command was consumed.
    Complete,
    /// Stopped early; the run's resume state says where to continue.
    Incomplete(Interruption),
    /// Nothing to do for this command.
    Skipped,
}

/// Where a unit's records go.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Target<'o> {
    pub collection: Collection,
    pub owner: &'o Owner,
}

/// Collects unit failures so sibling units still run. Fatal interruptions
/// short-circuit.
#[derive(Default)]
pub(crate) struct Units {
    first: Option<Interruption>,
}

impl Units {
    pub fn absorb(&mut self, result: Result<(), Interruption>) -> Result<(), Interruption> {
        match result {
            Err(interruption) if interruption.is_fatal() => Err(interruption),
            Err(interruption) => {
                self.first.get_or_insert(interruption);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    pub fn finish(self) -> Result<(), Interruption> {
        match self.first {
            Some(interruption) => Err(interruption),
            None => Ok(()),
        }
    }
}

/// Crawls commands against one API client into one sink.
pub struct Crawler {
    client: Arc<dyn ApiClient>,
    sink: Arc<dyn OutputSink>,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(client: Arc<dyn ApiClient>, sink: Arc<dyn OutputSink>, config: CrawlConfig) -> Self {
        Self {
            client,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Route a command to its crawl routine.
    ///
    /// Scope discovery is not dispatched here; see [`Crawler::discover`].
    pub async fn crawl(&self, request: &CrawlRequest, run: &CrawlRun<'_>) -> CrawlOutcome {
        let scope = request.scope.as_deref().filter(|s| !s.is_empty());
        tracing::info!(command = %request.command, scope = ?scope, "crawl started");

        let result = match (request.command, scope) {
            (Command::Group, Some(path)) => self.crawl_group(path, request, run).await,
            (Command::Project, Some(path)) => self.crawl_project(path, request, run).await,
            (Command::Commits, Some(path)) => {
                self.crawl_commits(path, request.branch.as_deref(), request.window, run)
                    .await
            }
            (Command::MergeRequests, Some(path)) => self.crawl_merge_requests(path, run).await,
            (Command::Issues, Some(path)) => self.crawl_issues(path, run).await,
            (Command::WorkItems, Some(path)) => self.crawl_work_items(path, run).await,
            (Command::Pipelines, Some(path)) => self.crawl_pipelines(path, run).await,
            (Command::Users, _) => self.crawl_users(run).await,
            (Command::Vulnerabilities, _) => self.crawl_vulnerabilities(run).await,
            (Command::Timelogs, _) => self.crawl_timelogs(request.window, run).await,
            (command, scope) => {
                tracing::warn!(%command, scope = ?scope, "no crawl routine, skipping");
                return CrawlOutcome::Skipped;
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(command = %request.command, scope = ?scope, "crawl complete");
                CrawlOutcome::Complete
            }
            Err(interruption) => {
                tracing::warn!(
                    command = %request.command,
                    scope = ?scope,
                    "crawl interrupted: {}",
                    interruption
                );
                CrawlOutcome::Incomplete(interruption)
            }
        }
    }

    /// Run one checkpointed unit: a paginated sequence resumed from the
    /// cursor stored under `key`.
    pub(crate) async fn unit<E, EFut>(
        &self,
        run: &CrawlRun<'_>,
        key: ResumeKey,
        query: &Query,
        variables: Value,
        target: Target<'_>,
        enhance: E,
    ) -> Result<(), Interruption>
    where
        E: Fn(Value) -> EFut,
        EFut: Future<Output = Value>,
    {
        if run.is_complete(&key).await {
            tracing::debug!(%key, "unit already complete");
            return Ok(());
        }
        let start = run.cursor(&key).await;
        if let Some(cursor) = &start {
            tracing::info!(%key, %cursor, "resuming unit");
        }

        let key_ref = &key;
        let result = paginate(
            self.client.as_ref(),
            PageRequest {
                query,
                variables,
                start,
                page_size: self.config.page_size,
                concurrency: self.config.enhance_concurrency,
                cancel: Some(run.cancel_token()),
            },
            enhance,
            move |batch| self.write_page(run, Some(key_ref), target, batch),
        )
        .await;

        match result.stop {
            StopReason::Exhausted => {
                run.checkpoint(key, None).await;
                Ok(())
            }
            stop => Err(interruption(run, query, stop)),
        }
    }

    /// Crawl a whole sub-sequence without checkpointing. Failures are
    /// logged and noted on the run, never raised.
    pub(crate) async fn sweep<E, EFut>(
        &self,
        run: &CrawlRun<'_>,
        query: &Query,
        variables: Value,
        target: Target<'_>,
        enhance: E,
    ) -> Pagination
    where
        E: Fn(Value) -> EFut,
        EFut: Future<Output = Value>,
    {
        let result = paginate(
            self.client.as_ref(),
            PageRequest {
                query,
                variables,
                start: None,
                page_size: self.config.page_size,
                concurrency: self.config.enhance_concurrency,
                cancel: None,
            },
            enhance,
            move |batch| self.write_page(run, None, target, batch),
        )
        .await;

        match &result.stop {
            StopReason::QueryFailed(e) => run.note_failure(e),
            StopReason::ExtractionFailed => {
                tracing::debug!(query = query.name, "sub-crawl returned nothing")
            }
            StopReason::SinkFailed(e) => tracing::warn!(query = query.name, "{}", e),
            StopReason::Exhausted | StopReason::Cancelled => {}
        }
        result
    }

    /// Fetch and write a single entity, once per job.
    pub(crate) async fn entity(
        &self,
        run: &CrawlRun<'_>,
        key: ResumeKey,
        query: &Query,
        variables: Value,
        target: Target<'_>,
    ) -> Result<(), Interruption> {
        if run.is_complete(&key).await {
            return Ok(());
        }
        if run.is_cancelled() {
            return Err(Interruption::Cancelled);
        }

        let response = match self.client.query(query, variables).await {
            Ok(response) => response,
            Err(e) => return Err(interruption(run, query, StopReason::QueryFailed(e))),
        };
        let Some(entity) = resolve(&response, query.path) else {
            tracing::warn!(query = query.name, %key, "entity not found");
            return Err(Interruption::Extraction(query.name));
        };

        self.write_page(
            run,
            None,
            target,
            PageBatch {
                items: vec![entity.clone()],
                next: None,
            },
        )
        .await
        .map_err(|stop| interruption(run, query, stop))?;
        run.checkpoint(key, None).await;
        Ok(())
    }

    /// Append one page and checkpoint the cursor after it.
    ///
    /// Refuses the page once the run's credential was rejected: its items may
    /// be missing sub-crawls, and the page is re-requested on resume.
    async fn write_page(
        &self,
        run: &CrawlRun<'_>,
        key: Option<&ResumeKey>,
        target: Target<'_>,
        batch: PageBatch,
    ) -> Result<(), StopReason> {
        if let Some(e) = run.credential_failure() {
            return Err(StopReason::QueryFailed(e.clone()));
        }

        self.sink
            .append(target.collection, target.owner, run.job_id(), &batch.items)
            .await
            .map_err(StopReason::SinkFailed)?;
        run.record_page(batch.items.len()).await;

        if let (Some(key), Some(next)) = (key, batch.next) {
            run.checkpoint(key.clone(), Some(next)).await;
        }
        Ok(())
    }
}

fn interruption(run: &CrawlRun<'_>, query: &Query, stop: StopReason) -> Interruption {
    match stop {
        StopReason::QueryFailed(e) => {
            run.note_failure(&e);
            if e.is_credential_failure() {
                Interruption::Credential(e)
            } else {
                Interruption::Query(e)
            }
        }
        StopReason::Cancelled => Interruption::Cancelled,
        StopReason::ExtractionFailed => Interruption::Extraction(query.name),
        StopReason::SinkFailed(e) => Interruption::Sink(e),
        // Callers only map stops other than exhaustion.
        StopReason::Exhausted => Interruption::Extraction(query.name),
    }
}

/// Copy `value` into `item` under `field`.
pub(crate) fn annotate(mut item: Value, field: &str, value: &str) -> Value {
    if let Value::Object(map) = &mut item {
        map.insert(field.to_string(), Value::String(value.to_string()));
    }
    item
}
