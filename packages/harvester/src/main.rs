//! Harvester command line: run the scheduler and runners, or inspect and
//! steer jobs in the shared database.

use std::sync::Arc;

use actors::{JobRunner, RunnerConfig, Scheduler, SupervisorArgs, SupervisorMessage, start_supervisor};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crawler::{ClientConfig, CrawlConfig, HttpClientFactory};
use db::repositories::{CredentialRepository, IncidentRepository, JobFilter};
use db::{Db, DbConfig};
use harvest_core::{Credential, CredentialId, JobId, JobStatus};
use secrecy::SecretString;
use storage::{RecordSink, Storage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "harvester")]
#[command(about = "Hierarchical crawler for GitLab-style APIs")]
struct Cli {
    /// Database endpoint; overrides HARVEST_DB_ENDPOINT.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and runners until interrupted
    Run {
        /// Number of runners; overrides HARVEST_RUNNERS
        #[arg(long)]
        runners: Option<usize>,
        /// Enqueue scope discovery for this credential before starting
        #[arg(long)]
        discover: Option<String>,
    },

    /// Enqueue scope discovery for a credential
    Discover { credential: String },

    /// Pause a queued or running job
    Pause { job: String },

    /// Queue a paused job again
    Resume { job: String },

    /// Store a credential; the token is read from an environment variable
    AddCredential {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        account: String,
        #[arg(long, default_value = "HARVEST_TOKEN")]
        token_env: String,
    },

    /// Replace a credential's token and release its waiting jobs
    RotateCredential {
        credential: String,
        #[arg(long, default_value = "HARVEST_TOKEN")]
        token_env: String,
    },

    /// List stored credentials
    Credentials,

    /// List jobs
    Jobs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// List recorded sync incidents, newest first
    Incidents {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let db = connect(cli.db).await?;

    match cli.command {
        Commands::Run { runners, discover } => cmd_run(db, runners, discover).await,
        Commands::Discover { credential } => cmd_discover(&db, &credential).await,
        Commands::Pause { job } => cmd_pause(&db, &job).await,
        Commands::Resume { job } => cmd_resume(&db, &job).await,
        Commands::AddCredential {
            provider,
            account,
            token_env,
        } => cmd_add_credential(&db, provider, account, &token_env).await,
        Commands::RotateCredential {
            credential,
            token_env,
        } => cmd_rotate_credential(&db, &credential, &token_env).await,
        Commands::Credentials => cmd_credentials(&db).await,
        Commands::Jobs { status, limit } => cmd_jobs(&db, status, limit).await,
        Commands::Incidents { limit } => cmd_incidents(&db, limit).await,
    }
}

async fn connect(endpoint: Option<String>) -> Result<Db> {
    let mut config = DbConfig::from_env();
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    if config.endpoint.starts_with("mem://") {
        tracing::warn!("using an in-memory database; nothing survives this process");
    }
    Db::connect(config)
        .await
        .context("Failed to connect to database")
}

fn token_from_env(var: &str) -> Result<SecretString> {
    let token = std::env::var(var).with_context(|| format!("{var} is not set"))?;
    if token.trim().is_empty() {
        bail!("{var} is empty");
    }
    Ok(SecretString::from(token.trim().to_string()))
}

fn parse_job(raw: &str) -> Result<JobId> {
    JobId::parse(raw).with_context(|| format!("invalid job id: {raw}"))
}

fn parse_credential(raw: &str) -> Result<CredentialId> {
    CredentialId::parse(raw).with_context(|| format!("invalid credential id: {raw}"))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(db: Db, runners: Option<usize>, discover: Option<String>) -> Result<()> {
    let mut config = RunnerConfig::from_env()?;
    if let Some(runners) = runners {
        config.runners = runners.max(1);
    }

    let scheduler = Scheduler::new(db.clone());
    if let Some(credential) = discover {
        let job = scheduler
            .enqueue_discovery(parse_credential(&credential)?)
            .await?;
        println!("discovery job {} ({})", job.id, job.status);
    }

    let storage = Storage::from_env().await?;
    let runner = JobRunner::new(
        db,
        Arc::new(HttpClientFactory::new(ClientConfig::from_env()?)),
        Arc::new(RecordSink::new(storage)),
        CrawlConfig::from_env()?,
    );

    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        scheduler,
        runner: Arc::new(runner),
        config,
    })
    .await
    .context("Failed to start supervisor")?;

    let mut handle = handle;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("interrupt received, draining running jobs");
            if let Err(e) = supervisor.send_message(SupervisorMessage::Shutdown) {
                bail!("Failed to signal shutdown: {e}");
            }
        }
        result = &mut handle => {
            result?;
            tracing::warn!("supervisor stopped on its own");
            return Ok(());
        }
    }
    handle.await?;
    Ok(())
}

async fn cmd_discover(db: &Db, credential: &str) -> Result<()> {
    let job = Scheduler::new(db.clone())
        .enqueue_discovery(parse_credential(credential)?)
        .await?;
    println!("discovery job {} ({})", job.id, job.status);
    Ok(())
}

async fn cmd_pause(db: &Db, job: &str) -> Result<()> {
    let job = Scheduler::new(db.clone()).pause(parse_job(job)?).await?;
    println!("job {} {}", job.id, job.status);
    Ok(())
}

async fn cmd_resume(db: &Db, job: &str) -> Result<()> {
    let job = Scheduler::new(db.clone()).resume(parse_job(job)?).await?;
    println!("job {} {}", job.id, job.status);
    Ok(())
}

async fn cmd_add_credential(
    db: &Db,
    provider: String,
    account: String,
    token_env: &str,
) -> Result<()> {
    let token = token_from_env(token_env)?;
    let credential = CredentialRepository::new(db.clone())
        .create(&Credential::new(provider, account), &token)
        .await?;
    println!(
        "credential {} for {}@{}",
        credential.id, credential.account, credential.provider
    );
    Ok(())
}

async fn cmd_rotate_credential(db: &Db, credential: &str, token_env: &str) -> Result<()> {
    let token = token_from_env(token_env)?;
    let renewed = Scheduler::new(db.clone())
        .rotate_credential(parse_credential(credential)?, &token)
        .await?;
    println!("credential rotated, {renewed} job(s) renewed");
    Ok(())
}

async fn cmd_credentials(db: &Db) -> Result<()> {
    for credential in CredentialRepository::new(db.clone()).list().await? {
        println!(
            "{}  {:<8}  {}@{}",
            credential.id,
            format!("{:?}", credential.state).to_lowercase(),
            credential.account,
            credential.provider
        );
    }
    Ok(())
}

async fn cmd_jobs(db: &Db, status: Option<String>, limit: usize) -> Result<()> {
    let status = status
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .context("invalid --status")?;
    let scheduler = Scheduler::new(db.clone());
    let jobs = scheduler
        .jobs()
        .list(JobFilter {
            status,
            limit: Some(limit),
            ..Default::default()
        })
        .await?;

    for job in &jobs {
        let progress = job.progress.clone().unwrap_or_default();
        println!(
            "{}  {:<27}  {:<16}  {:<40}  pages={} records={}",
            job.id,
            job.status,
            job.command,
            job.scope_path.as_deref().unwrap_or("-"),
            progress.pages,
            progress.records
        );
    }

    let counts = scheduler.jobs().count_by_status().await?;
    let summary: Vec<String> = JobStatus::ALL
        .iter()
        .filter_map(|s| counts.get(s).map(|n| format!("{s}={n}")))
        .collect();
    println!("{}", summary.join(" "));
    Ok(())
}

async fn cmd_incidents(db: &Db, limit: usize) -> Result<()> {
    for incident in IncidentRepository::new(db.clone()).list(limit).await? {
        println!(
            "{}  {}  expected={} actual={}  {}",
            incident.created_at.to_rfc3339(),
            incident.operation,
            incident.expected,
            incident.actual,
            incident.payload
        );
    }
    Ok(())
}
