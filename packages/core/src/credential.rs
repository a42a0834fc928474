//! Credentials jobs crawl with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub Ulid);

impl CredentialId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for CredentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    #[default]
    Valid,
    /// Rejected by the API; waiting for an administrator to rotate it.
    Expired,
}

/// An API credential. The secret itself never leaves the database layer
/// except as a `secrecy` wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    /// API provider, e.g. `gitlab.example.com`.
    pub provider: String,
    /// Account the credential authenticates as.
    pub account: String,
    pub state: CredentialState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(provider: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id: CredentialId::new(),
            provider: provider.into(),
            account: account.into(),
            state: CredentialState::Valid,
            created_at: Utc::now(),
            rotated_at: None,
        }
    }

    pub fn owner(&self) -> crate::JobOwner {
        crate::JobOwner {
            credential_id: self.id,
            provider: self.provider.clone(),
            account: self.account.clone(),
        }
    }
}
