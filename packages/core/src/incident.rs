//! Durable diagnostics for job sync mismatches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recorded when a batch job write affected a different number of rows than
/// expected. Incidents are audit entries; they never change job status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Operation attempted, e.g. `insert_jobs`.
    pub operation: String,
    pub expected: u64,
    pub actual: u64,
    /// What was being written.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(
        operation: impl Into<String>,
        expected: u64,
        actual: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            operation: operation.into(),
            expected,
            actual,
            payload,
            created_at: Utc::now(),
        }
    }
}
