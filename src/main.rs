use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ops_jobs::config::{BuilderConfig, ComposeConfig, EngineConfig};
use ops_jobs::scheduler::{CreatedBy, Job, JobId, JobType};
use ops_jobs::shutdown::install_shutdown_handler;
use ops_jobs::{JobEngine, NewJob};

#[derive(Parser, Debug)]
#[command(name = "ops-jobs")]
#[command(version)]
#[command(about = "Durable single-worker job queue for build, deploy and API jobs")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run every queued job in the store, then exit
    Run,

    /// Job management commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Engine Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct EngineArgs {
    /// Job store document
    #[arg(long, global = true, default_value = ".data/jobs.json")]
    store: PathBuf,

    /// Repository root used to locate the builder tool and compose file
    #[arg(long, global = true, default_value = ".")]
    repo_root: PathBuf,

    /// Builder tool executable (defaults to node running the repository's builder entry)
    #[arg(long, global = true)]
    builder_program: Option<String>,

    /// Arguments for --builder-program (repeatable)
    #[arg(long = "builder-arg", global = true, requires = "builder_program")]
    builder_args: Vec<String>,

    /// Container orchestration binary
    #[arg(long, global = true, default_value = "docker")]
    compose_program: String,

    /// Wall-clock limit for a single job
    #[arg(long, global = true, default_value = "900")]
    job_timeout_secs: u64,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

impl EngineArgs {
    fn to_config(&self) -> EngineConfig {
        let mut builder = BuilderConfig::for_repo_root(&self.repo_root);
        if let Some(program) = &self.builder_program {
            builder = builder.with_program(program.clone(), self.builder_args.clone());
        }
        let compose =
            ComposeConfig::for_repo_root(&self.repo_root).with_program(self.compose_program.clone());

        EngineConfig::for_repo_root(self.repo_root.clone())
            .with_store_path(self.store.clone())
            .with_job_timeout(Duration::from_secs(self.job_timeout_secs))
            .with_builder(builder)
            .with_compose(compose)
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobTypeArg {
    Build,
    Deploy,
    ApiCall,
}

impl From<JobTypeArg> for JobType {
    fn from(arg: JobTypeArg) -> Self {
        match arg {
            JobTypeArg::Build => JobType::Build,
            JobTypeArg::Deploy => JobType::Deploy,
            JobTypeArg::ApiCall => JobType::ApiCall,
        }
    }
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Enqueue a new job
    Submit {
        /// Job type
        job_type: JobTypeArg,

        /// Workspace the job belongs to
        #[arg(long)]
        workspace: String,

        /// Type-specific payload as JSON, e.g. '{"action":"list_builders"}'
        #[arg(long, default_value = "{}")]
        payload: String,

        #[arg(long)]
        created_by_id: Option<String>,

        #[arg(long)]
        created_by_email: Option<String>,

        /// Run the job now and wait for it to finish
        #[arg(long)]
        wait: bool,
    },
    /// Show one job
    Status {
        /// The job ID
        job_id: String,
    },
    /// List jobs, most recently updated first
    List {
        /// Maximum number of jobs to show
        #[arg(long, default_value = "200")]
        limit: usize,
    },
    /// Cancel a queued or running job
    Cancel {
        /// The job ID
        job_id: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct CancelOutput {
    job_id: String,
    canceled: bool,
}

#[derive(Serialize)]
struct RunOutput {
    jobs: Vec<Job>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_job(job: &Job, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(job)?),
        OutputFormat::Table => {
            println!("Job ID:     {}", job.id);
            println!("Type:       {}", job.job_type);
            println!("Workspace:  {}", job.workspace_id);
            println!("Status:     {}", job.status);
            println!("Progress:   {}% ({})", job.pct, job.step);
            if let Some(created_by) = &job.created_by {
                let who = created_by
                    .email
                    .as_deref()
                    .or(created_by.id.as_deref())
                    .unwrap_or("-");
                println!("Created By: {}", who);
            }
            println!("Created:    {}", job.created_at.to_rfc3339());
            println!("Updated:    {}", job.updated_at.to_rfc3339());
            if !job.logs.is_empty() {
                println!("Logs:");
                for entry in &job.logs {
                    for line in entry.lines() {
                        println!("  {}", line);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_job_table(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!(
        "{:<22} {:<9} {:<10} {:>4}  {:<12} WORKSPACE",
        "JOB ID", "TYPE", "STATUS", "PCT", "STEP"
    );
    println!("{}", "-".repeat(78));
    for job in jobs {
        println!(
            "{:<22} {:<9} {:<10} {:>3}%  {:<12} {}",
            job.id, job.job_type, job.status, job.pct, job.step, job.workspace_id
        );
    }
    println!();
    println!("Showing {} jobs", jobs.len());
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(engine: JobEngine, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler()?;
    let before: Vec<JobId> = engine
        .store()
        .list(usize::MAX)
        .await
        .into_iter()
        .filter(|j| !j.is_terminal())
        .map(|j| j.id)
        .collect();

    engine.start().await;
    tokio::select! {
        _ = engine.wait_idle() => {}
        _ = shutdown.cancelled() => {}
    }
    engine.shutdown().await;

    let mut processed = Vec::new();
    for id in &before {
        if let Some(job) = engine.get(id).await {
            processed.push(job);
        }
    }

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&RunOutput { jobs: processed })?);
        }
        OutputFormat::Table => print_job_table(&processed),
    }
    Ok(())
}

async fn handle_job_command(
    args: &EngineArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        JobCommands::Submit {
            job_type,
            workspace,
            payload,
            created_by_id,
            created_by_email,
            wait,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| format!("--payload is not valid JSON: {}", e))?;
            let mut request = NewJob::new(job_type.into(), workspace, payload);
            if created_by_id.is_some() || created_by_email.is_some() {
                request = request.created_by(CreatedBy {
                    id: created_by_id,
                    email: created_by_email,
                });
            }

            let config = args.to_config();
            let timeout = config.job_timeout;
            let engine = JobEngine::open(config).await?;
            if !wait {
                let engine = engine.without_autostart();
                let job = engine.enqueue(request).await?;
                match args.output {
                    OutputFormat::Json => print_job(&job, &args.output)?,
                    OutputFormat::Table => {
                        println!("Job queued.");
                        println!("Job ID: {}", job.id);
                        println!("Run `ops-jobs run` to process the queue.");
                    }
                }
                return Ok(());
            }

            let shutdown = install_shutdown_handler()?;
            let job = engine.enqueue(request).await?;
            let finished = tokio::select! {
                result = engine.wait_for(&job.id, timeout + Duration::from_secs(5)) => Some(result?),
                _ = shutdown.cancelled() => None,
            };
            engine.shutdown().await;
            let job = match finished {
                Some(job) => job,
                None => engine.get(&job.id).await.unwrap_or(job),
            };
            print_job(&job, &args.output)?;
        }
        JobCommands::Status { job_id } => {
            let engine = JobEngine::open(args.to_config()).await?.without_autostart();
            match engine.get(&JobId::from(job_id.as_str())).await {
                Some(job) => print_job(&job, &args.output)?,
                None => return Err(format!("Job not found: {}", job_id).into()),
            }
        }
        JobCommands::List { limit } => {
            let engine = JobEngine::open(args.to_config()).await?.without_autostart();
            let jobs = engine.list_with_limit(limit).await;
            match args.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
                OutputFormat::Table => print_job_table(&jobs),
            }
        }
        JobCommands::Cancel { job_id } => {
            let engine = JobEngine::open(args.to_config()).await?.without_autostart();
            let id = JobId::from(job_id.as_str());
            let canceled = engine.cancel(&id).await?;
            match args.output {
                OutputFormat::Json => {
                    let output = CancelOutput { job_id, canceled };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Table => {
                    if canceled {
                        println!("Job {} canceled.", job_id);
                    } else {
                        return Err(format!(
                            "Job {} was not canceled (unknown or already finished)",
                            job_id
                        )
                        .into());
                    }
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run => {
            init_logging("info");
            let engine = JobEngine::open(args.engine.to_config()).await?;
            handle_run(engine, &args.engine.output).await?;
        }
        Commands::Job { command } => {
            init_logging("warn");
            handle_job_command(&args.engine, command).await?;
        }
    }

    Ok(())
}
