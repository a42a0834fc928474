use db::{Db, DbConfig, DbError};
use harvest_core::{Credential, JobOwner};

/// Fresh in-memory database per test; `mem://` connections do not share state.
pub async fn setup_db() -> Result<Db, DbError> {
    Db::connect(DbConfig::memory()).await
}

pub fn owner() -> JobOwner {
    Credential::new("gitlab.example.com", "harvester-bot").owner()
}
