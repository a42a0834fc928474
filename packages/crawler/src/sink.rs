//! Output sink boundary.

use std::future::Future;
use std::pin::Pin;

use harvest_core::{Collection, JobId, Owner};
use serde_json::Value;
use storage::RecordSink;

use crate::SinkError;

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Append-only destination for harvested records, partitioned by collection
/// and owning scope.
///
/// Delivery is at-least-once: a resumed job re-sends the page that was in
/// flight when it stopped.
pub trait OutputSink: Send + Sync {
    fn append<'a>(
        &'a self,
        collection: Collection,
        owner: &'a Owner,
        job_id: Option<JobId>,
        records: &'a [Value],
    ) -> SinkFuture<'a>;
}

impl OutputSink for RecordSink {
    fn append<'a>(
        &'a self,
        collection: Collection,
        owner: &'a Owner,
        job_id: Option<JobId>,
        records: &'a [Value],
    ) -> SinkFuture<'a> {
        Box::pin(async move {
            RecordSink::append(self, collection, owner, job_id, records).await?;
            Ok(())
        })
    }
}
