//! Scope discovery: every group and project the credential can see.

use std::collections::BTreeMap;
use std::future::ready;

use harvest_core::{Area, AreaType};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{CrawlOutcome, CrawlRun, Crawler, interruption};
use crate::pagination::{PageRequest, StopReason, paginate};
use crate::query::{self, Query};

const DISCOVERY: [(&Query, AreaType); 2] = [
    (&query::DISCOVERY_GROUPS, AreaType::Group),
    (&query::DISCOVERY_PROJECTS, AreaType::Project),
];

impl Crawler {
    /// Enumerate visible groups and projects.
    ///
    /// Returns the areas found, deduplicated by type and path, together with
    /// whether enumeration finished. Areas found before an interruption are
    /// still returned.
    pub async fn discover(&self, run: &CrawlRun<'_>) -> (Vec<Area>, CrawlOutcome) {
        let found: Mutex<BTreeMap<(AreaType, String), Area>> = Mutex::new(BTreeMap::new());
        let mut outcome = CrawlOutcome::Complete;

        for (query, area_type) in DISCOVERY {
            let found = &found;
            let result = paginate(
                self.client.as_ref(),
                PageRequest {
                    query,
                    variables: json!({}),
                    start: None,
                    page_size: self.config.page_size,
                    concurrency: 1,
                    cancel: Some(run.cancel_token()),
                },
                ready,
                move |batch| async move {
                    let mut found = found.lock().await;
                    for area in batch.items.iter().filter_map(|node| area_from(node, area_type)) {
                        found.entry((area.area_type, area.path.clone())).or_insert(area);
                    }
                    run.record_page(batch.items.len()).await;
                    Ok::<(), StopReason>(())
                },
            )
            .await;

            tracing::info!(
                query = query.name,
                pages = result.pages,
                items = result.items,
                "discovery listing finished"
            );
            if !result.is_complete() {
                let interruption = interruption(run, query, result.stop);
                let fatal = interruption.is_fatal();
                outcome = CrawlOutcome::Incomplete(interruption);
                if fatal {
                    break;
                }
            }
        }

        let areas: Vec<Area> = found.into_inner().into_values().collect();
        tracing::info!(areas = areas.len(), "scope discovery finished");
        (areas, outcome)
    }
}

fn area_from(node: &Value, area_type: AreaType) -> Option<Area> {
    let id = match node.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let path = node.get("fullPath").and_then(Value::as_str)?;
    if path.is_empty() {
        return None;
    }
    let name = node
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path));
    Some(Area::new(area_type, id, path, name))
}
