//! Areas: the groups and projects a credential can see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Kind of area in the external hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaType {
    Group,
    Project,
}

impl AreaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaType::Group => "group",
            AreaType::Project => "project",
        }
    }
}

impl std::fmt::Display for AreaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AreaType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(AreaType::Group),
            "project" => Ok(AreaType::Project),
            other => Err(CoreError::UnknownAreaType(other.to_string())),
        }
    }
}

/// A group or project, identified by its scope path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Full path, e.g. `acme/platform/api`.
    pub path: String,
    /// Identifier assigned by the external API.
    pub natural_id: String,
    /// Display name.
    pub name: String,
    pub area_type: AreaType,
    pub created_at: DateTime<Utc>,
}

impl Area {
    pub fn new(
        area_type: AreaType,
        natural_id: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            natural_id: natural_id.into(),
            name: name.into(),
            area_type,
            created_at: Utc::now(),
        }
    }

    /// Storage identity: natural id within its type.
    pub fn natural_key(&self) -> String {
        format!("{}_{}", self.area_type, sanitize_id(&self.natural_id))
    }
}

/// Natural ids arrive as global ids like `gid://gitlab/Group/42`; keep the
/// characters that are safe inside a record key.
fn sanitize_id(id: &str) -> String {
    id.rsplit('/')
        .next()
        .unwrap_or(id)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
