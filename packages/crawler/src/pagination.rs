//! Pagination over the external API.
//!
//! [`paginate`] walks a cursor-paginated connection page by page: each page's
//! items are enhanced concurrently (bounded), handed to the page callback,
//! and only then is the next cursor requested. Errors never escape; the
//! returned [`Pagination`] says where and why iteration stopped so the caller
//! can persist the cursor and pick a job status.
//!
//! [`paginate_offset`] accumulates a small offset/limit listing in memory.

use std::collections::HashSet;
use std::future::Future;

use futures_util::stream::{self, StreamExt};
use harvest_core::Cursor;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{ApiClient, Query, QueryError, SinkError};

/// Generic result wrapper some responses nest their payload under.
const DATA_WRAPPER: &str = "data";

/// Connection page-info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<Cursor>,
}

impl PageInfo {
    /// Read `hasNextPage`/`endCursor`. A missing `hasNextPage` means no
    /// further pages.
    pub fn from_value(value: &Value) -> Self {
        Self {
            has_next_page: value
                .get("hasNextPage")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            end_cursor: value
                .get("endCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(Cursor::new),
        }
    }

    /// Cursor of the next page, if there is one.
    pub fn next_cursor(&self) -> Option<Cursor> {
        if self.has_next_page {
            self.end_cursor.clone()
        } else {
            None
        }
    }
}

/// Items and page-info extracted from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub info: PageInfo,
}

/// Walk `path` through `response`. When a key is missing from the current
/// object but the object has a `data` wrapper, the key is looked up inside
/// the wrapper instead.
pub fn resolve<'v>(response: &'v Value, path: &[&str]) -> Option<&'v Value> {
    let mut current = response;
    for key in path {
        current = match current.get(*key) {
            Some(next) => next,
            None => current.get(DATA_WRAPPER)?.get(*key)?,
        };
    }
    if current.is_null() { None } else { Some(current) }
}

/// Extract a page from a connection at `path`.
///
/// The connection may carry `nodes`, `edges[].node`, or be a bare array.
/// Returns `None` when the path cannot be resolved.
pub fn extract_page(response: &Value, path: &[&str]) -> Option<Page> {
    let connection = resolve(response, path)?;
    let items = match connection {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            if let Some(nodes) = map.get("nodes").and_then(Value::as_array) {
                nodes.clone()
            } else if let Some(edges) = map.get("edges").and_then(Value::as_array) {
                edges.iter().filter_map(|e| e.get("node").cloned()).collect()
            } else {
                return None;
            }
        }
        _ => return None,
    };
    let info = connection
        .get("pageInfo")
        .map(PageInfo::from_value)
        .unwrap_or_default();
    Some(Page { items, info })
}

/// One enhanced page, handed to the page callback.
#[derive(Debug)]
pub struct PageBatch {
    pub items: Vec<Value>,
    /// Cursor to continue after this page; `None` on the last page.
    pub next: Option<Cursor>,
}

/// Why an iteration stopped.
#[derive(Debug)]
pub enum StopReason {
    /// The sequence was fully consumed.
    Exhausted,
    /// Cancellation was requested between pages.
    Cancelled,
    QueryFailed(QueryError),
    /// The declared path did not resolve in the response.
    ExtractionFailed,
    SinkFailed(SinkError),
}

/// Result of a cursor iteration.
#[derive(Debug)]
pub struct Pagination {
    /// Where to resume; `None` once the sequence was exhausted.
    pub cursor: Option<Cursor>,
    /// Pages handed to the callback.
    pub pages: u64,
    pub items: u64,
    pub stop: StopReason,
}

impl Pagination {
    pub fn is_complete(&self) -> bool {
        matches!(self.stop, StopReason::Exhausted)
    }
}

/// Parameters of a cursor iteration.
pub struct PageRequest<'a> {
    pub query: &'a Query,
    /// Query variables; `first` and `after` are filled in per page.
    pub variables: Value,
    /// Continue after this cursor instead of from the start.
    pub start: Option<Cursor>,
    pub page_size: u32,
    /// Items of one page enhanced at the same time.
    pub concurrency: usize,
    /// Checked before every page request.
    pub cancel: Option<&'a CancellationToken>,
}

/// Drive a cursor-paginated query to completion or the first failure.
///
/// `enhance` runs over every item of a page, at most `concurrency` at a time,
/// and its outputs keep the page order. `on_page` receives the enhanced page;
/// returning an error stops the iteration with that reason and leaves the
/// cursor at the start of the page.
pub async fn paginate<E, EFut, P, PFut>(
    client: &dyn ApiClient,
    request: PageRequest<'_>,
    enhance: E,
    mut on_page: P,
) -> Pagination
where
    E: Fn(Value) -> EFut,
    EFut: Future<Output = Value>,
    P: FnMut(PageBatch) -> PFut,
    PFut: Future<Output = Result<(), StopReason>>,
{
    let query = request.query;
    let mut cursor = request.start;
    let mut seen: HashSet<Cursor> = cursor.iter().cloned().collect();
    let mut pages = 0;
    let mut items = 0;

    let stop = loop {
        if request.cancel.is_some_and(CancellationToken::is_cancelled) {
            break StopReason::Cancelled;
        }

        let variables = page_variables(&request.variables, cursor.as_ref(), request.page_size);
        let response = match client.query(query, variables).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(query = query.name, cursor = ?cursor, "query failed: {}", e);
                break StopReason::QueryFailed(e);
            }
        };

        let Some(page) = extract_page(&response, query.path) else {
            tracing::warn!(
                query = query.name,
                path = ?query.path,
                "could not extract page from response"
            );
            break StopReason::ExtractionFailed;
        };

        let count = page.items.len() as u64;
        let enhanced: Vec<Value> = stream::iter(page.items)
            .map(&enhance)
            .buffered(request.concurrency.max(1))
            .collect()
            .await;

        let next = page.info.next_cursor();
        if let Err(reason) = on_page(PageBatch {
            items: enhanced,
            next: next.clone(),
        })
        .await
        {
            break reason;
        }
        pages += 1;
        items += count;

        match next {
            None => {
                cursor = None;
                break StopReason::Exhausted;
            }
            Some(next) if !seen.insert(next.clone()) => {
                tracing::warn!(query = query.name, cursor = %next, "cursor repeated, stopping");
                cursor = None;
                break StopReason::Exhausted;
            }
            Some(next) => cursor = Some(next),
        }
    };

    tracing::debug!(query = query.name, pages, items, stop = ?stop, "pagination stopped");
    Pagination {
        cursor,
        pages,
        items,
        stop,
    }
}

fn page_variables(base: &Value, cursor: Option<&Cursor>, page_size: u32) -> Value {
    let mut variables = match base {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    variables.insert("first".into(), Value::from(page_size));
    variables.insert(
        "after".into(),
        cursor.map_or(Value::Null, |c| Value::String(c.as_str().to_string())),
    );
    Value::Object(variables)
}

/// Accumulate an offset/limit listing.
///
/// `fetch(offset, limit)` is called until a page comes back shorter than
/// `limit` (or empty). The first error aborts the listing.
pub async fn paginate_offset<F, Fut>(limit: u32, mut fetch: F) -> Result<Vec<Value>, QueryError>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, QueryError>>,
{
    let limit = limit.max(1);
    let mut offset = 0;
    let mut all = Vec::new();
    loop {
        let page = fetch(offset, limit).await?;
        let count = page.len() as u32;
        all.extend(page);
        if count < limit {
            return Ok(all);
        }
        offset += count;
    }
}
