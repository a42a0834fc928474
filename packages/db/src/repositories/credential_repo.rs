//! Credential repository. Tokens are stored alongside the credential row
//! and only ever handed out wrapped in [`SecretString`].

use chrono::{DateTime, Utc};
use harvest_core::{Credential, CredentialId, CredentialState};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Db, DbError};

#[derive(Debug, Serialize, Deserialize)]
struct CredentialRecord {
    credential_id: CredentialId,
    provider: String,
    account: String,
    state: CredentialState,
    token: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rotated_at: Option<DateTime<Utc>>,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Self {
            id: record.credential_id,
            provider: record.provider,
            account: record.account,
            state: record.state,
            created_at: record.created_at,
            rotated_at: record.rotated_at,
        }
    }
}

/// Repository for credential persistence operations.
#[derive(Clone)]
pub struct CredentialRepository {
    db: Db,
}

impl CredentialRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Store a credential together with its token.
    pub async fn create(
        &self,
        credential: &Credential,
        token: &SecretString,
    ) -> Result<Credential, DbError> {
        let record: Option<CredentialRecord> = self
            .db
            .conn()
            .create(("credential", credential.id.to_string()))
            .content(CredentialRecord {
                credential_id: credential.id,
                provider: credential.provider.clone(),
                account: credential.account.clone(),
                state: credential.state,
                token: token.expose_secret().to_string(),
                created_at: credential.created_at,
                rotated_at: credential.rotated_at,
            })
            .await?;

        record
            .map(Credential::from)
            .ok_or_else(|| DbError::Query("Failed to create credential".into()))
    }

    async fn record(&self, id: CredentialId) -> Result<CredentialRecord, DbError> {
        let record: Option<CredentialRecord> = self
            .db
            .conn()
            .select(("credential", id.to_string()))
            .await?;
        record.ok_or_else(|| DbError::NotFound(format!("Credential not found: {}", id)))
    }

    pub async fn get(&self, id: CredentialId) -> Result<Credential, DbError> {
        self.record(id).await.map(Credential::from)
    }

    /// The credential's API token.
    pub async fn token(&self, id: CredentialId) -> Result<SecretString, DbError> {
        let record = self.record(id).await?;
        Ok(SecretString::from(record.token))
    }

    pub async fn list(&self) -> Result<Vec<Credential>, DbError> {
        let mut response = self
            .db
            .conn()
            .query("SELECT * FROM credential ORDER BY provider ASC, account ASC")
            .await?;
        let records: Vec<CredentialRecord> = response.take(0)?;
        Ok(records.into_iter().map(Credential::from).collect())
    }

    /// Flag the credential as rejected by the API.
    pub async fn mark_expired(&self, id: CredentialId) -> Result<Credential, DbError> {
        self.update(
            id,
            serde_json::json!({ "state": CredentialState::Expired }),
        )
        .await
    }

    /// Replace the token and mark the credential valid again.
    pub async fn rotate(
        &self,
        id: CredentialId,
        token: &SecretString,
    ) -> Result<Credential, DbError> {
        self.update(
            id,
            serde_json::json!({
                "state": CredentialState::Valid,
                "token": token.expose_secret(),
                "rotated_at": Utc::now(),
            }),
        )
        .await
    }

    async fn update(
        &self,
        id: CredentialId,
        patch: serde_json::Value,
    ) -> Result<Credential, DbError> {
        let record: Option<CredentialRecord> = self
            .db
            .conn()
            .update(("credential", id.to_string()))
            .merge(patch)
            .await?;
        record
            .map(Credential::from)
            .ok_or_else(|| DbError::NotFound(format!("Credential not found: {}", id)))
    }
}
