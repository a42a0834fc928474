//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: `mem://`, `rocksdb://path`, `ws://host:port`.
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "harvester".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Read `HARVEST_DB_ENDPOINT`, `HARVEST_DB_NAMESPACE`, `HARVEST_DB_DATABASE`,
    /// `HARVEST_DB_USER` and `HARVEST_DB_PASSWORD`, falling back to defaults.
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            endpoint: var("HARVEST_DB_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: var("HARVEST_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: var("HARVEST_DB_DATABASE").unwrap_or(defaults.database),
            credentials: var("HARVEST_DB_USER").zip(var("HARVEST_DB_PASSWORD")),
        }
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: String,
        to: String,
    },
}

/// Handle to the harvester database.
///
/// Cheap to clone; every clone shares the same connection.
#[derive(Clone)]
pub struct Db {
    conn: Surreal<Any>,
}

impl Db {
    /// Connect, authenticate, select namespace/database and apply the schema.
    pub async fn connect(config: DbConfig) -> Result<Self, DbError> {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let conn = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            conn.signin(Root { username, password }).await?;
        }

        conn.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        let db = Self { conn };
        crate::schema::init_schema(&db).await?;
        Ok(db)
    }

    /// The underlying SurrealDB client.
    pub fn conn(&self) -> &Surreal<Any> {
        &self.conn
    }
}
