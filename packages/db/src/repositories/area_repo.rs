//! Area repository: discovered groups and projects.

use chrono::{DateTime, Utc};
use harvest_core::{Area, AreaType};
use serde::Deserialize;

use crate::{Db, DbError};

#[derive(Debug, Deserialize)]
struct AreaRecord {
    path: String,
    natural_id: String,
    #[serde(default)]
    name: String,
    area_type: AreaType,
    created_at: DateTime<Utc>,
}

impl From<AreaRecord> for Area {
    fn from(record: AreaRecord) -> Self {
        Self {
            path: record.path,
            natural_id: record.natural_id,
            name: record.name,
            area_type: record.area_type,
            created_at: record.created_at,
        }
    }
}

/// Repository for area persistence operations.
#[derive(Clone)]
pub struct AreaRepository {
    db: Db,
}

impl AreaRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert or update an area keyed by its natural id within its type.
    ///
    /// A repeat sighting refreshes path and name; `created_at` keeps the
    /// first value. When another area still holds the path (it was renamed
    /// or moved since it was last seen), that row's path is parked under
    /// `~<record key>` until its own next sighting corrects it.
    pub async fn upsert(&self, area: &Area) -> Result<Area, DbError> {
        let mut response = self
            .db
            .conn()
            .query(
                r#"
                UPDATE area
                    SET path = string::concat("~", record::id(id))
                    WHERE path = $path AND id != type::thing("area", $key);
                UPSERT type::thing("area", $key) SET
                    path = $path,
                    natural_id = $natural_id,
                    name = $name,
                    area_type = $area_type,
                    created_at = created_at ?? $created_at
                RETURN AFTER;
                "#,
            )
            .bind(("key", area.natural_key()))
            .bind(("path", area.path.clone()))
            .bind(("natural_id", area.natural_id.clone()))
            .bind(("name", area.name.clone()))
            .bind(("area_type", area.area_type.as_str()))
            .bind(("created_at", area.created_at))
            .await?
            .check()?;

        let records: Vec<AreaRecord> = response.take(1)?;
        records
            .into_iter()
            .next()
            .map(Area::from)
            .ok_or_else(|| DbError::Query(format!("Failed to upsert area {}", area.path)))
    }

    /// Upsert a batch of areas, returning the stored rows.
    pub async fn upsert_many(&self, areas: &[Area]) -> Result<Vec<Area>, DbError> {
        let mut stored = Vec::with_capacity(areas.len());
        for area in areas {
            stored.push(self.upsert(area).await?);
        }
        Ok(stored)
    }

    /// Find an area by its scope path.
    pub async fn get_by_path(&self, path: &str) -> Result<Option<Area>, DbError> {
        let mut response = self
            .db
            .conn()
            .query("SELECT * FROM area WHERE path = $path LIMIT 1")
            .bind(("path", path.to_string()))
            .await?;
        let records: Vec<AreaRecord> = response.take(0)?;
        Ok(records.into_iter().next().map(Area::from))
    }

    /// List areas, optionally restricted to one type, ordered by path.
    pub async fn list(&self, area_type: Option<AreaType>) -> Result<Vec<Area>, DbError> {
        let mut response = match area_type {
            Some(area_type) => {
                self.db
                    .conn()
                    .query("SELECT * FROM area WHERE area_type = $area_type ORDER BY path ASC")
                    .bind(("area_type", area_type.as_str()))
                    .await?
            }
            None => {
                self.db
                    .conn()
                    .query("SELECT * FROM area ORDER BY path ASC")
                    .await?
            }
        };
        let records: Vec<AreaRecord> = response.take(0)?;
        Ok(records.into_iter().map(Area::from).collect())
    }
}
