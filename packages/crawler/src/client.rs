//! External API client boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harvest_core::Credential;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::{ClientConfig, CrawlError, Query, QueryError};

/// Future returned by [`ApiClient`] calls.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueryError>> + Send + 'a>>;

/// Optional time bounds for time-sliced listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Executes queries against the external API.
///
/// Implementations own transport-level retry; a returned error is final.
pub trait ApiClient: Send + Sync {
    /// Run a GraphQL query and return its `data` object.
    fn query<'a>(&'a self, query: &'a Query, variables: Value) -> ClientFuture<'a, Value>;

    /// One page of a project's branches (REST, 1-based `page`).
    fn list_branches<'a>(
        &'a self,
        project: &'a str,
        page: u32,
        per_page: u32,
    ) -> ClientFuture<'a, Vec<Value>>;

    /// One page of a branch's commits (REST, 1-based `page`).
    fn list_commits<'a>(
        &'a self,
        project: &'a str,
        branch: &'a str,
        page: u32,
        per_page: u32,
        window: TimeWindow,
    ) -> ClientFuture<'a, Vec<Value>>;
}

/// Builds an API client for a credential.
pub trait ClientFactory: Send + Sync {
    fn client(
        &self,
        credential: &Credential,
        token: SecretString,
    ) -> Result<Arc<dyn ApiClient>, CrawlError>;
}

/// [`ClientFactory`] producing [`HttpApiClient`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    config: ClientConfig,
}

impl HttpClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for HttpClientFactory {
    fn client(
        &self,
        credential: &Credential,
        token: SecretString,
    ) -> Result<Arc<dyn ApiClient>, CrawlError> {
        let base_url = self
            .config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", credential.provider));
        Ok(Arc::new(HttpApiClient::new(
            base_url,
            token,
            self.config.clone(),
        )?))
    }
}

/// GitLab-style API over HTTP: GraphQL for entity crawls, REST v4 for
/// branches and commits.
pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    config: ClientConfig,
}

impl HttpApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: SecretString,
        config: ClientConfig,
    ) -> Result<Self, CrawlError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("harvester/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            config,
        })
    }

    async fn graphql(&self, query: &Query, variables: Value) -> Result<Value, QueryError> {
        let url = format!("{}/api/graphql", self.base_url);
        let body = json!({ "query": query.document, "variables": variables });
        let response = self
            .with_retry(query.name, || self.http.post(&url).json(&body))
            .await?;

        let errors: Vec<String> = response
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        match response.get("data") {
            Some(data) if !data.is_null() => {
                if !errors.is_empty() {
                    tracing::debug!(query = query.name, ?errors, "partial GraphQL response");
                }
                Ok(data.clone())
            }
            _ if errors.iter().any(|m| is_auth_message(m)) => {
                Err(QueryError::Credential(errors.join("; ")))
            }
            _ if !errors.is_empty() => Err(QueryError::Api(errors.join("; "))),
            _ => Err(QueryError::Decode(format!(
                "{} returned neither data nor errors",
                query.name
            ))),
        }
    }

    async fn rest_list(
        &self,
        label: &str,
        path: String,
        params: Vec<(&'static str, String)>,
    ) -> Result<Vec<Value>, QueryError> {
        let url = format!("{}/api/v4/{}", self.base_url, path);
        let response = self
            .with_retry(label, || self.http.get(&url).query(&params))
            .await?;
        match response {
            Value::Array(items) => Ok(items),
            other => Err(QueryError::Decode(format!(
                "{label}: expected an array, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Send with bounded exponential backoff and jitter on transient failures.
    async fn with_retry<F>(&self, label: &str, build: F) -> Result<Value, QueryError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            match self.send(build()).await {
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = backoff_delay(&self.config, attempt);
                    tracing::warn!(
                        request = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, QueryError> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(QueryError::Credential(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(512);
            return Err(QueryError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| QueryError::Decode(e.to_string()))
    }
}

impl ApiClient for HttpApiClient {
    fn query<'a>(&'a self, query: &'a Query, variables: Value) -> ClientFuture<'a, Value> {
        Box::pin(self.graphql(query, variables))
    }

    fn list_branches<'a>(
        &'a self,
        project: &'a str,
        page: u32,
        per_page: u32,
    ) -> ClientFuture<'a, Vec<Value>> {
        Box::pin(self.rest_list(
            "branches",
            repository_endpoint(project, "branches"),
            vec![("page", page.to_string()), ("per_page", per_page.to_string())],
        ))
    }

    fn list_commits<'a>(
        &'a self,
        project: &'a str,
        branch: &'a str,
        page: u32,
        per_page: u32,
        window: TimeWindow,
    ) -> ClientFuture<'a, Vec<Value>> {
        let mut params = vec![
            ("ref_name", branch.to_string()),
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
            ("with_stats", "true".to_string()),
        ];
        if let Some(from) = window.from {
            params.push(("since", from.to_rfc3339()));
        }
        if let Some(to) = window.to {
            params.push(("until", to.to_rfc3339()));
        }
        Box::pin(self.rest_list(
            "commits",
            repository_endpoint(project, "commits"),
            params,
        ))
    }
}

fn backoff_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let exp = config
        .backoff
        .saturating_mul(1u32 << (attempt - 1).min(16))
        .min(config.max_backoff);
    let jitter_ms = fastrand::u64(0..=(exp.as_millis() as u64 / 2));
    exp + Duration::from_millis(jitter_ms)
}

fn is_auth_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("invalid token")
        || message.contains("token is expired")
        || message.contains("token was revoked")
        || message.contains("unauthorized")
}

/// REST path of a project's repository resource; the project path is a
/// single encoded segment.
fn repository_endpoint(project: &str, resource: &str) -> String {
    format!("projects/{}/repository/{resource}", urlencoding::encode(project))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_project_path_is_one_segment() {
        assert_eq!(
            repository_endpoint("acme/platform/api", "commits"),
            "projects/acme%2Fplatform%2Fapi/repository/commits"
        );
        assert_eq!(
            repository_endpoint("my.repo_1", "branches"),
            "projects/my.repo_1/repository/branches"
        );
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = ClientConfig {
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            ..ClientConfig::default()
        };
        let first = backoff_delay(&config, 1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let third = backoff_delay(&config, 3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
        let capped = backoff_delay(&config, 12);
        assert!(capped <= Duration::from_millis(1_500));
    }

    #[test]
    fn recognizes_auth_errors() {
        assert!(is_auth_message("Invalid token"));
        assert!(!is_auth_message("Field 'foo' doesn't exist"));
    }
}
