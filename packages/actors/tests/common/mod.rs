#![allow(dead_code)]

use std::sync::Arc;

use actors::{JobRunner, Scheduler};
use crawler::testing::{MemorySink, ScriptedClient};
use crawler::{ApiClient, ClientFactory, CrawlConfig, CrawlError};
use db::repositories::CredentialRepository;
use db::{Db, DbConfig};
use harvest_core::Credential;
use secrecy::SecretString;
use serde_json::json;

/// Fresh in-memory database per test.
pub async fn setup_db() -> Db {
    Db::connect(DbConfig::memory()).await.expect("in-memory db")
}

pub async fn credential(db: &Db) -> Credential {
    CredentialRepository::new(db.clone())
        .create(
            &Credential::new("gitlab.example.com", "harvester-bot"),
            &SecretString::from("glpat-test"),
        )
        .await
        .expect("create credential")
}

/// Hands out the same scripted client for every credential.
pub struct ScriptedFactory(pub Arc<ScriptedClient>);

impl ClientFactory for ScriptedFactory {
    fn client(
        &self,
        _credential: &Credential,
        _token: SecretString,
    ) -> Result<Arc<dyn ApiClient>, CrawlError> {
        Ok(self.0.clone())
    }
}

pub fn runner(db: &Db, client: ScriptedClient) -> (JobRunner, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let runner = JobRunner::new(
        db.clone(),
        Arc::new(ScriptedFactory(Arc::new(client))),
        sink.clone(),
        CrawlConfig {
            page_size: 2,
            commit_page_size: 3,
            enhance_concurrency: 2,
        },
    );
    (runner, sink)
}

/// Two groups and three projects.
pub fn discovery_client() -> ScriptedClient {
    ScriptedClient::new()
        .pages(
            "discovery_groups",
            vec![vec![
                json!({ "id": "gid://gitlab/Group/1", "fullPath": "acme", "name": "Acme" }),
                json!({ "id": "gid://gitlab/Group/2", "fullPath": "acme/platform" }),
            ]],
        )
        .pages(
            "discovery_projects",
            vec![
                vec![
                    json!({ "id": "gid://gitlab/Project/1", "fullPath": "acme/api" }),
                    json!({ "id": "gid://gitlab/Project/2", "fullPath": "acme/web" }),
                ],
                vec![json!({ "id": "gid://gitlab/Project/3", "fullPath": "acme/platform/infra" })],
            ],
        )
}

pub fn scheduler(db: &Db) -> Scheduler {
    Scheduler::new(db.clone())
}
