//! Append-only NDJSON record sink.
//!
//! Object stores have no append primitive, so every `append` writes a new
//! immutable part under `<owner partition>/<collection>/`. Part names are
//! ULIDs, so listing a partition in key order follows write time to the
//! millisecond.
//!
//! Delivery is at-least-once. A job resumed after an interruption re-requests
//! the page that was in flight, so the same record may appear in two parts.
//! Each line carries `_harvested_at` and, when known, `_job_id`; consumers
//! deduplicate on the record's own `id` plus its partition.

use bytes::Bytes;
use chrono::Utc;
use harvest_core::{Collection, JobId, Owner};
use serde_json::Value;
use ulid::Ulid;

use crate::{Storage, StorageError};

/// Writes harvested records into the dataset.
#[derive(Clone)]
pub struct RecordSink {
    storage: Storage,
}

impl RecordSink {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Object key for a new part of `collection` owned by `owner`.
    pub fn part_key(collection: Collection, owner: &Owner) -> String {
        format!("{}/{}/{}.ndjson", owner.partition(), collection, Ulid::new())
    }

    /// Append records as one new part. Returns the part key, or `None` when
    /// there was nothing to write.
    pub async fn append(
        &self,
        collection: Collection,
        owner: &Owner,
        job_id: Option<JobId>,
        records: &[Value],
    ) -> Result<Option<String>, StorageError> {
        if records.is_empty() {
            return Ok(None);
        }

        let harvested_at = Utc::now().to_rfc3339();
        let mut body = Vec::with_capacity(records.len() * 256);
        for record in records {
            let line = stamp(record, &harvested_at, job_id);
            serde_json::to_writer(&mut body, &line)?;
            body.push(b'\n');
        }

        let key = Self::part_key(collection, owner);
        self.storage.put_bytes(&key, Bytes::from(body)).await?;
        tracing::debug!(%collection, %owner, count = records.len(), %key, "appended records");
        Ok(Some(key))
    }

    /// Read back one part. Used by tests and offline tooling.
    pub async fn read_part(&self, key: &str) -> Result<Vec<Value>, StorageError> {
        let bytes = self.storage.get_bytes(key).await?;
        bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).map_err(StorageError::from))
            .collect()
    }
}

fn stamp(record: &Value, harvested_at: &str, job_id: Option<JobId>) -> Value {
    match record {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("_harvested_at".into(), Value::String(harvested_at.into()));
            if let Some(job_id) = job_id {
                map.insert("_job_id".into(), Value::String(job_id.to_string()));
            }
            Value::Object(map)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use crate::StorageConfig;
    use serde_json::json;

    #[tokio::test]
    async fn append_writes_partitioned_ndjson() -> Result<(), StorageError> {
        let sink = RecordSink::new(Storage::new(StorageConfig::memory()).await?);
        let job_id = JobId::new();
        let owner = Owner::Project("acme/api".into());

        let key = sink
            .append(
                Collection::MergeRequests,
                &owner,
                Some(job_id),
                &[json!({"id": "1"}), json!({"id": "2"})],
            )
            .await?
            .expect("part written");

        assert!(key.starts_with("projects/acme/api/merge_requests/"));
        assert!(key.ends_with(".ndjson"));

        let lines = sink.read_part(&key).await?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], "1");
        assert_eq!(lines[1]["_job_id"], job_id.to_string());
        assert!(lines[0]["_harvested_at"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn appends_never_overwrite() -> Result<(), StorageError> {
        let sink = RecordSink::new(Storage::new(StorageConfig::memory()).await?);
        let first = sink
            .append(Collection::Users, &Owner::Global, None, &[json!({"id": 1})])
            .await?;
        let second = sink
            .append(Collection::Users, &Owner::Global, None, &[json!({"id": 1})])
            .await?;
        assert_ne!(first, second);
        assert!(first.as_deref().is_some_and(|k| k.starts_with("global/users/")));
        Ok(())
    }

    #[tokio::test]
    async fn empty_append_is_a_no_op() -> Result<(), StorageError> {
        let sink = RecordSink::new(Storage::new(StorageConfig::memory()).await?);
        let key = sink
            .append(Collection::Groups, &Owner::Group("acme".into()), None, &[])
            .await?;
        assert!(key.is_none());
        Ok(())
    }
}
