//! CLI commands implementation.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Settings;
use crate::maintenance::{self, FailureRatePublisher};
use crate::models::JobSubmission;
use crate::repository::{run_migrations, AsyncSqlitePool, JobRepository};
use crate::server;
use crate::services::ServiceRegistry;

#[derive(Parser)]
#[command(name = "harmony")]
#[command(about = "Work orchestration core for the Harmony data-transformation gateway")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Run the worker API server and maintenance loops
    Serve {
        /// Host to bind
        #[arg(long, env = "HARMONY_HOST")]
        host: Option<String>,
        /// Port to bind
        #[arg(short, long, env = "HARMONY_PORT")]
        port: Option<u16>,
    },

    /// Submit a job against a configured service chain
    Submit {
        /// Service chain name
        chain: String,
        /// Requesting user
        #[arg(short, long, default_value = "anonymous")]
        user: String,
        /// Planned number of input granules
        #[arg(short, long, default_value = "1")]
        granules: i32,
        /// Tolerate failures up to the configured cap
        #[arg(long)]
        ignore_errors: bool,
        /// Submit as a synchronous request
        #[arg(long)]
        sync: bool,
    },

    /// Show a job's status and result links
    Status { job_id: String },

    /// Cancel a job and all of its outstanding work
    Cancel { job_id: String },

    /// Pause a job
    Pause { job_id: String },

    /// Resume a paused job
    Resume { job_id: String },

    /// Run one maintenance loop once
    Maintain {
        #[arg(value_enum)]
        task: MaintainTask,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MaintainTask {
    Reaper,
    UserWork,
    FailureMetrics,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.data_dir.clone())?;

    let registry = match &settings.service_chains_path {
        Some(path) => ServiceRegistry::load(path)?,
        None => ServiceRegistry::builtin(),
    };

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&settings.data_dir)?;
            std::fs::create_dir_all(settings.artifact_dir())?;
            run_migrations(&settings.database_url).await?;
            println!("Initialized database at {}", settings.database_url);
        }

        Commands::Serve { host, port } => {
            run_migrations(&settings.database_url).await?;
            let mut settings = settings;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            server::serve(&settings).await?;
        }

        Commands::Submit {
            chain,
            user,
            granules,
            ignore_errors,
            sync,
        } => {
            let pool = AsyncSqlitePool::new(&settings.database_url);
            let repo = JobRepository::new(pool);
            let mut submission = JobSubmission::new(user, chain, granules);
            submission.ignore_errors = ignore_errors;
            submission.is_async = !sync;
            let job = repo.create(&submission, &registry).await?;
            println!("{}", job.job_id);
        }

        Commands::Status { job_id } => {
            let pool = AsyncSqlitePool::new(&settings.database_url);
            let repo = JobRepository::new(pool);
            let job = repo.get(&job_id).await?;
            let links = repo.links(&job_id).await?;
            let body = serde_json::json!({
                "jobID": job.job_id,
                "status": job.status.as_str(),
                "progress": job.progress,
                "message": job.message,
                "links": links,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Cancel { job_id } => {
            let pool = AsyncSqlitePool::new(&settings.database_url);
            let job = JobRepository::new(pool).cancel(&job_id).await?;
            println!("{} {}", job.job_id, job.status.as_str());
        }

        Commands::Pause { job_id } => {
            let pool = AsyncSqlitePool::new(&settings.database_url);
            let job = JobRepository::new(pool).pause(&job_id).await?;
            println!("{} {}", job.job_id, job.status.as_str());
        }

        Commands::Resume { job_id } => {
            let pool = AsyncSqlitePool::new(&settings.database_url);
            let job = JobRepository::new(pool).resume(&job_id).await?;
            println!("{} {}", job.job_id, job.status.as_str());
        }

        Commands::Maintain { task } => {
            let pool = AsyncSqlitePool::new(&settings.database_url);
            match task {
                MaintainTask::Reaper => {
                    let deleted = maintenance::reaper::run(&pool, &settings).await?;
                    println!("reaped {} rows", deleted);
                }
                MaintainTask::UserWork => {
                    let touched = maintenance::reconciler::run(&pool, &settings).await?;
                    println!("reconciled {} user_work rows", touched);
                }
                MaintainTask::FailureMetrics => {
                    let registry = prometheus::Registry::new();
                    let publisher =
                        FailureRatePublisher::new(pool, &registry, &settings.client_id)?;
                    for (service, percent) in publisher.run(&settings).await? {
                        println!("{}: {:.1}%", service, percent);
                    }
                }
            }
        }
    }

    Ok(())
}
