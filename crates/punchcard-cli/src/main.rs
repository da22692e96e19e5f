use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use punchcard_core::error::AppError;
use punchcard_core::job::{JobStatus, StartDecision};
use punchcard_core::models::NewFormatDescriptor;
use punchcard_core::traits::JobStore;
use punchcard_core::{
    CachedDirectory, ConsumerConfig, FileNormalizer, FsBlobStore, IngestConfig, IngestionWorker,
    JobController, NoSheetConverter, QueueConsumer, QueueIdleListener, TracingWorkerReporter,
};
use punchcard_db::{
    BulkJobRepository, Database, DatabaseConfig, DescriptorRepository, QueueRepository,
};

type Controller =
    JobController<BulkJobRepository, DescriptorRepository, FsBlobStore, QueueRepository>;

#[derive(Parser)]
#[command(name = "punchcard", version, about = "Bulk attendance punch ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion worker and its queue consumer until Ctrl+C
    Worker {
        /// Consumer id used when claiming queue messages
        #[arg(long, env = "PUNCHCARD_CONSUMER_ID")]
        consumer_id: Option<String>,
    },

    /// Upload a device export and create a bulk job for it
    Submit {
        /// Path to the exported file (csv, tsv, json, xlsx, ...)
        #[arg(short, long)]
        file: PathBuf,

        /// Format descriptor that explains the file layout
        #[arg(short, long)]
        descriptor: Uuid,

        /// Request processing right after the upload
        #[arg(long, default_value_t = false)]
        start: bool,
    },

    /// Request processing of a new job
    Start {
        /// Job id
        job: Uuid,
    },

    /// Stop a running or waiting job
    Stop {
        /// Job id
        job: Uuid,
    },

    /// Remove every punch a finished job wrote
    Rollback {
        /// Job id
        job: Uuid,
    },

    /// Soft-delete a new or rolled back job
    Delete {
        /// Job id
        job: Uuid,
    },

    /// Print one job, including its failure report
    Show {
        /// Job id
        job: Uuid,
    },

    /// List bulk jobs, newest first
    List {
        /// Only jobs in this status (deleted jobs are hidden otherwise)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Number of results to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Job counts per status and pending queue messages
    Stats,

    /// Manage format descriptors
    Descriptor {
        #[command(subcommand)]
        command: DescriptorCommands,
    },

    /// Manage the employee directory
    Employee {
        #[command(subcommand)]
        command: EmployeeCommands,
    },
}

#[derive(Subcommand)]
enum DescriptorCommands {
    /// Register a descriptor from a JSON file
    Add {
        /// Path to the descriptor JSON
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List registered descriptors
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum EmployeeCommands {
    /// Register an employee number, or rename an existing one
    Add {
        /// Employee number as written by the devices
        #[arg(short, long)]
        number: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
}

/// Exit code for refused lifecycle requests (not eligible, window expired, not running).
const EXIT_REFUSED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            match e.downcast_ref::<AppError>() {
                Some(app) if app.is_precondition() => ExitCode::from(EXIT_REFUSED),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("punchcard=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;

    match cli.command {
        Commands::Worker { consumer_id } => cmd_worker(&db, consumer_id).await?,
        Commands::Submit {
            file,
            descriptor,
            start,
        } => cmd_submit(&controller(&db), &file, descriptor, start).await?,
        Commands::Start { job } => cmd_start(&controller(&db), job).await?,
        Commands::Stop { job } => {
            controller(&db).request_stop(job).await?;
            println!("Stop requested for job {job}");
        }
        Commands::Rollback { job } => {
            let removed = controller(&db).rollback(job).await?;
            println!("Rolled back job {job}: {removed} punches removed");
        }
        Commands::Delete { job } => {
            controller(&db).delete(job).await?;
            println!("Deleted job {job}");
        }
        Commands::Show { job } => {
            let job = controller(&db).job(job).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::List { status, limit } => cmd_list(&controller(&db), status, limit).await?,
        Commands::Stats => cmd_stats(&db).await?,
        Commands::Descriptor { command } => match command {
            DescriptorCommands::Add { file } => cmd_descriptor_add(&controller(&db), &file).await?,
            DescriptorCommands::List { limit } => {
                let descriptors = db.descriptor_repo().list(limit).await?;
                if descriptors.is_empty() {
                    println!("No format descriptors registered");
                }
                for d in descriptors {
                    println!(
                        "  {} {} (entry: {}, employee: {}, date: {}, time: {}, {})",
                        d.id,
                        d.name,
                        d.entry_point_path,
                        d.employee_number_path,
                        d.date_path,
                        d.time_path,
                        d.time_value_type,
                    );
                }
            }
        },
        Commands::Employee { command } => match command {
            EmployeeCommands::Add { number, name } => {
                let user_id = db.employee_repo().upsert(&number, name.as_deref()).await?;
                println!("Employee {number} -> {user_id}");
            }
        },
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn controller(db: &Database) -> Controller {
    JobController::new(
        db.job_repo(),
        db.descriptor_repo(),
        FsBlobStore::from_env(),
        db.queue_repo(),
    )
}

async fn cmd_worker(db: &Database, consumer_id: Option<String>) -> Result<()> {
    let ingest = IngestConfig::from_env()?;
    let mut consumer_config = ConsumerConfig::from_env()?;
    if let Some(id) = consumer_id {
        consumer_config = consumer_config.with_consumer_id(id);
    }

    let blobs = FsBlobStore::from_env();
    tracing::info!(root = %blobs.root().display(), "Using blob store");

    let jobs = db.job_repo();
    let normalizer = FileNormalizer::new(blobs, jobs.clone(), NoSheetConverter);
    let worker = IngestionWorker::new(
        jobs,
        db.descriptor_repo(),
        db.attendance_repo(),
        CachedDirectory::new(db.employee_repo()),
        normalizer,
        QueueIdleListener::new(db.queue_repo()),
        ingest,
    );
    let consumer = QueueConsumer::new(db.queue_repo(), worker.clone(), consumer_config);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    consumer.run(cancel_token, &TracingWorkerReporter).await?;

    // Start messages were acked on receipt, so jobs still held in memory
    // would stay `processing` forever. Stop them so their status is final.
    let snapshot = worker.snapshot();
    for job_id in snapshot.pending_job_ids.into_iter().chain(snapshot.active_job_id) {
        if let Err(e) = worker.request_stop(job_id).await {
            tracing::warn!(%job_id, error = %e, "Failed to stop job during shutdown");
        }
    }
    if tokio::time::timeout(Duration::from_secs(30), worker.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("Worker did not wind down within 30s");
    }

    Ok(())
}

async fn cmd_submit(
    controller: &Controller,
    file: &Path,
    descriptor_id: Uuid,
    start: bool,
) -> Result<()> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read upload: {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");

    let job = controller.submit(bytes, file_name, descriptor_id).await?;
    println!("Created job {} ({})", job.id, job.source_file);

    if start {
        cmd_start(controller, job.id).await?;
    }
    Ok(())
}

async fn cmd_start(controller: &Controller, job_id: Uuid) -> Result<()> {
    match controller.request_processing(job_id).await? {
        StartDecision::Begin => println!("Job {job_id} queued for processing"),
        StartDecision::AlreadyRunning => println!("Job {job_id} is already processing"),
        StartDecision::AlreadyHandled => println!("Job {job_id} already completed"),
    }
    Ok(())
}

async fn cmd_list(controller: &Controller, status: Option<JobStatus>, limit: usize) -> Result<()> {
    let jobs = controller.list(status, limit).await?;

    if jobs.is_empty() {
        println!("No bulk jobs found");
        return Ok(());
    }

    for job in &jobs {
        println!(
            "  [{}] {} {} (records: {}, ok: {}, failed: {}, hash: {}...)",
            job.status,
            job.added_at.format("%Y-%m-%d %H:%M:%S UTC"),
            job.id,
            job.total_records,
            job.success_count,
            job.failed_count,
            job.source_hash.get(..8).unwrap_or(&job.source_hash),
        );
    }

    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

async fn cmd_stats(db: &Database) -> Result<()> {
    let jobs = db.job_repo();
    println!("Jobs by status:");
    for status in JobStatus::ALL {
        let count = jobs.count_by_status(status).await?;
        println!("  {:<14} {count}", status.as_str());
    }

    let pending = db.queue_repo().pending_by_topic().await?;
    println!("\nPending queue messages:");
    if pending.is_empty() {
        println!("  none");
    }
    for (topic, count) in pending {
        println!("  {topic:<30} {count}");
    }
    Ok(())
}

async fn cmd_descriptor_add(controller: &Controller, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read descriptor file: {}", file.display()))?;
    let descriptor: NewFormatDescriptor =
        serde_json::from_str(&raw).context("Invalid descriptor JSON")?;

    let created = controller.register_descriptor(&descriptor).await?;
    println!("Registered descriptor {} ({})", created.id, created.name);
    Ok(())
}
