//! Crawl engine for the harvester.
//!
//! - [`pagination`]: cursor and offset iterators over the external API
//! - [`orchestrator`]: command dispatch and per-entity enhancement crawls
//! - [`client`]: the API client boundary and its HTTP implementation
//! - [`sink`]: the output boundary records are appended to

pub mod client;
mod config;
mod error;
pub mod orchestrator;
pub mod pagination;
pub mod query;
pub mod sink;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ApiClient, ClientFactory, ClientFuture, HttpApiClient, HttpClientFactory, TimeWindow};
pub use config::{ClientConfig, CrawlConfig};
pub use error::{CheckpointError, CrawlError, QueryError, SinkError};
pub use orchestrator::{
    CheckpointFuture, Checkpointer, CrawlOutcome, CrawlRequest, CrawlRun, Crawler, Interruption,
};
pub use query::Query;
pub use sink::OutputSink;
