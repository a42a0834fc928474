//! Actor system for the harvester.
//!
//! This crate provides the Ractor-based scheduler and runner pool that turn
//! crawl jobs stored in the database into crawls.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns the scheduler and runners
//! - `SchedulerActor` - Claims, settles and synthesizes jobs
//! - `RunnerActor` - Runs one job at a time and reports back
//!
//! The scheduling rules themselves live in plain types ([`Scheduler`],
//! [`JobRunner`], [`sync`], [`reconcile`]) that the actors wrap.
//!
//! # Usage
//!
//! ```ignore
//! use actors::{SupervisorArgs, SupervisorMessage, start_supervisor};
//!
//! let (supervisor, handle) = start_supervisor(args).await?;
//! supervisor.send_message(SupervisorMessage::Shutdown)?;
//! handle.await?;
//! ```

mod config;
mod error;
mod messages;
pub mod reconcile;
mod runner;
mod runner_actor;
mod scheduler;
mod scheduler_actor;
mod supervisor;
pub mod sync;

pub use config::RunnerConfig;
pub use error::{ActorError, ActorResult};
pub use messages::{Assignment, RunnerMessage, SchedulerMessage, SupervisorMessage};
pub use reconcile::{RunOutcome, RunReport};
pub use runner::{JobCheckpointer, JobRunner};
pub use runner_actor::RunnerActor;
pub use scheduler::{Scheduler, SyncReport};
pub use scheduler_actor::SchedulerActor;
pub use supervisor::{Supervisor, SupervisorArgs, start_supervisor};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
