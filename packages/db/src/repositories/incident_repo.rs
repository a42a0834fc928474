//! Incident repository: append-only audit log.

use harvest_core::Incident;

use crate::{Db, DbError};

#[derive(Clone)]
pub struct IncidentRepository {
    db: Db,
}

impl IncidentRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn record(&self, incident: &Incident) -> Result<(), DbError> {
        tracing::warn!(
            operation = %incident.operation,
            expected = incident.expected,
            actual = incident.actual,
            "recording incident"
        );
        let _: Option<Incident> = self
            .db
            .conn()
            .create("incident")
            .content(incident.clone())
            .await?;
        Ok(())
    }

    /// Most recent incidents first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Incident>, DbError> {
        let mut response = self
            .db
            .conn()
            .query("SELECT * FROM incident ORDER BY created_at DESC LIMIT $limit")
            .bind(("limit", limit))
            .await?;
        Ok(response.take(0)?)
    }
}
