//! Per-job resume state: where each crawl unit stopped.
//!
//! In memory the state is a typed map from [`ResumeKey`] to [`Checkpoint`].
//! At the persistence boundary it becomes the opaque
//! `{ "<scope|global>:<unit>": "<cursor>" | null }` object, where `null`
//! marks a sequence that was fully consumed.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Scope placeholder for crawl units that are not tied to an area.
pub const GLOBAL_SCOPE: &str = "global";

/// Prefix marking a persisted scope as a literal path. Area paths never start
/// with `/`, so a top-level group named `global` is written as `/global`.
const LITERAL_SCOPE: char = '/';

/// Opaque position inside a paginated sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one crawl unit: `<scope-path-or-"global">:<unit>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResumeKey {
    scope: Option<String>,
    unit: String,
}

impl ResumeKey {
    pub fn new(scope: Option<String>, unit: impl Into<String>) -> Self {
        Self {
            scope: scope.filter(|s| !s.is_empty()),
            unit: unit.into(),
        }
    }

    pub fn global(unit: impl Into<String>) -> Self {
        Self::new(None, unit)
    }

    pub fn scoped(scope: impl Into<String>, unit: impl Into<String>) -> Self {
        Self::new(Some(scope.into()), unit)
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }
}

impl std::fmt::Display for ResumeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope.as_deref() {
            None => write!(f, "{GLOBAL_SCOPE}:{}", self.unit),
            Some(GLOBAL_SCOPE) => write!(f, "{LITERAL_SCOPE}{GLOBAL_SCOPE}:{}", self.unit),
            Some(scope) => write!(f, "{scope}:{}", self.unit),
        }
    }
}

impl std::str::FromStr for ResumeKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Scope paths never contain ':', units never do either.
        let (scope, unit) = s
            .rsplit_once(':')
            .ok_or_else(|| CoreError::InvalidResumeKey(s.to_string()))?;
        if unit.is_empty() || scope.is_empty() {
            return Err(CoreError::InvalidResumeKey(s.to_string()));
        }
        let scope = match scope {
            GLOBAL_SCOPE => None,
            scope => Some(scope.strip_prefix(LITERAL_SCOPE).unwrap_or(scope).to_string()),
        };
        Ok(Self::new(scope, unit))
    }
}

/// Where a crawl unit stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    /// Continue after this cursor.
    Resume(Cursor),
    /// The sequence was fully consumed.
    Complete,
}

impl Checkpoint {
    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            Checkpoint::Resume(cursor) => Some(cursor),
            Checkpoint::Complete => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Checkpoint::Complete)
    }
}

/// Map from crawl unit to its checkpoint, owned by a single job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    entries: BTreeMap<ResumeKey, Checkpoint>,
}

impl ResumeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResumeKey) -> Option<&Checkpoint> {
        self.entries.get(key)
    }

    /// Cursor to continue from, if the unit stopped part-way.
    pub fn cursor(&self, key: &ResumeKey) -> Option<&Cursor> {
        self.get(key).and_then(Checkpoint::cursor)
    }

    pub fn is_complete(&self, key: &ResumeKey) -> bool {
        self.get(key).is_some_and(Checkpoint::is_complete)
    }

    /// Record the cursor the unit should continue after.
    pub fn record(&mut self, key: ResumeKey, cursor: Cursor) {
        self.entries.insert(key, Checkpoint::Resume(cursor));
    }

    /// Mark the unit as fully consumed.
    pub fn complete(&mut self, key: ResumeKey) {
        self.entries.insert(key, Checkpoint::Complete);
    }

    /// Drop every unit recorded under `scope` (or the global scope for `None`).
    pub fn clear_scope(&mut self, scope: Option<&str>) {
        self.entries.retain(|key, _| key.scope() != scope);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The opaque persistence form.
    pub fn to_map(&self) -> BTreeMap<String, Option<String>> {
        self.entries
            .iter()
            .map(|(key, checkpoint)| {
                (
                    key.to_string(),
                    checkpoint.cursor().map(|c| c.as_str().to_string()),
                )
            })
            .collect()
    }

    pub fn from_map(map: BTreeMap<String, Option<String>>) -> Result<Self, CoreError> {
        let mut state = Self::new();
        for (key, cursor) in map {
            let key: ResumeKey = key.parse()?;
            match cursor {
                Some(cursor) => state.record(key, Cursor(cursor)),
                None => state.complete(key),
            }
        }
        Ok(state)
    }
}

impl Serialize for ResumeState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResumeState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, Option<String>>::deserialize(deserializer)?;
        ResumeState::from_map(map).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_format_with_global_placeholder() {
        assert_eq!(ResumeKey::global("users").to_string(), "global:users");
        assert_eq!(
            ResumeKey::scoped("acme/platform", "releases").to_string(),
            "acme/platform:releases"
        );
        let parsed: ResumeKey = "global:timelogs".parse().unwrap();
        assert_eq!(parsed, ResumeKey::global("timelogs"));
        assert!("no-separator".parse::<ResumeKey>().is_err());
    }

    #[test]
    fn group_named_global_keeps_its_own_keys() {
        let group = ResumeKey::scoped("global", "projects");
        assert_ne!(group, ResumeKey::global("projects"));
        assert_eq!(group.scope(), Some("global"));
        assert_eq!(group.to_string(), "/global:projects");
        assert_eq!("/global:projects".parse::<ResumeKey>().unwrap(), group);

        let mut state = ResumeState::new();
        state.complete(group.clone());
        state.record(ResumeKey::global("users"), Cursor::new("c1"));
        let back: ResumeState = serde_json::from_value(serde_json::to_value(&state).unwrap()).unwrap();
        assert_eq!(back, state);

        state.clear_scope(None);
        assert!(state.is_complete(&group));
    }

    #[test]
    fn persists_as_opaque_map() {
        let mut state = ResumeState::new();
        state.record(ResumeKey::scoped("acme/api", "merge_requests"), Cursor::new("eyJpZCI6NDJ9"));
        state.complete(ResumeKey::scoped("acme/api", "releases"));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "acme/api:merge_requests": "eyJpZCI6NDJ9",
                "acme/api:releases": null,
            })
        );

        let back: ResumeState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
        assert!(back.is_complete(&ResumeKey::scoped("acme/api", "releases")));
        assert_eq!(
            back.cursor(&ResumeKey::scoped("acme/api", "merge_requests")),
            Some(&Cursor::new("eyJpZCI6NDJ9"))
        );
    }

    #[test]
    fn clear_scope_only_touches_that_scope() {
        let mut state = ResumeState::new();
        state.complete(ResumeKey::scoped("acme/api", "releases"));
        state.complete(ResumeKey::scoped("acme/web", "releases"));
        state.record(ResumeKey::global("users"), Cursor::new("c1"));

        state.clear_scope(Some("acme/api"));
        assert_eq!(state.len(), 2);
        state.clear_scope(None);
        assert_eq!(state.len(), 1);
        assert!(state.is_complete(&ResumeKey::scoped("acme/web", "releases")));
    }
}
