//! `queuectl` - persistent shell-command job queue.
//!
//! # Commands
//!
//! - `queuectl enqueue <payload>` - Add a job (JSON payload or plain command)
//! - `queuectl list` - List jobs, optionally by state
//! - `queuectl show <id>` - Show one job
//! - `queuectl status` - Job counts and registered workers
//! - `queuectl worker start|stop` - Run or stop worker loops
//! - `queuectl dlq list|retry` - Inspect and requeue dead jobs
//! - `queuectl config show|get|set` - Queue configuration
//! - `queuectl job reset <id>` - Return a stuck job to pending

use std::error::Error;

use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use api::{EnqueueRequest, JobId, JobState, NewJob};
use db::DbConfig;
use queue_core::LogLevel;

mod output;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "Persistent multi-worker job queue for shell commands", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Command,
}

/// SurrealDB server shared by every queuectl process.
const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000";

/// Where the queue lives. Every process sharing a queue must point at the same store.
#[derive(Args, Debug)]
struct StoreArgs {
    /// Store endpoint. ws://<host:port> is shared by every process; surrealkv://<path>
    /// and rocksdb://<path> are locked by whichever process opens them first; mem:// is
    /// private to this process
    #[arg(long, global = true, env = "QUEUECTL_DB", default_value = DEFAULT_ENDPOINT)]
    db: String,

    /// Namespace inside the store
    #[arg(long, global = true, env = "QUEUECTL_NS", default_value = "queuectl")]
    ns: String,

    /// Database inside the namespace
    #[arg(long, global = true, env = "QUEUECTL_DATABASE", default_value = "main")]
    database: String,

    /// Root user for remote stores
    #[arg(long, global = true, env = "QUEUECTL_USER", requires = "pass")]
    user: Option<String>,

    /// Root password for remote stores
    #[arg(long, global = true, env = "QUEUECTL_PASS", hide_env_values = true)]
    pass: Option<String>,
}

impl StoreArgs {
    fn db_config(&self) -> DbConfig {
        let config = DbConfig::endpoint(&self.db)
            .with_namespace(&self.ns)
            .with_database(&self.database);
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => config.with_credentials(user, pass),
            _ => config,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a job to the queue
    Enqueue {
        /// '{"command":"...","max_retries":N}' or a plain shell command
        payload: Option<String>,
        /// Shell command to run (instead of a payload)
        #[arg(long, short, conflicts_with = "payload")]
        command: Option<String>,
        /// Override the configured retry ceiling for this job
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// List jobs in id order
    List {
        /// Only jobs in this state (pending, processing, completed, failed, dead)
        #[arg(long, short)]
        state: Option<JobState>,
        #[arg(long, short)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show one job in full
    Show {
        id: JobId,
        #[arg(long)]
        json: bool,
    },
    /// Job counts per state and registered workers
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Run or stop worker loops
    #[command(subcommand)]
    Worker(WorkerCommand),
    /// Dead letter queue
    #[command(subcommand)]
    Dlq(DlqCommand),
    /// Queue configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manual job maintenance
    #[command(subcommand)]
    Job(JobCommand),
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    /// Start worker loops in this process until stopped or Ctrl-C
    Start {
        #[arg(long, short, default_value_t = 1)]
        count: usize,
    },
    /// Ask every running worker to exit after its current job
    Stop,
}

#[derive(Subcommand, Debug)]
enum DlqCommand {
    /// List dead jobs
    List {
        #[arg(long)]
        json: bool,
    },
    /// Requeue one dead job, or all of them
    Retry {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<JobId>,
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show every setting
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Print one setting
    Get { key: String },
    /// Change one setting; existing jobs keep their values
    Set { key: String, value: String },
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    /// Return a job stuck in processing to pending
    Reset { id: JobId },
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    let store = cli.store.db_config();
    let config = match api::init_queue(store.clone()).await {
        Ok(config) => config,
        Err(e) if is_server(&store.endpoint) => {
            return Err(format!(
                "{}\nIs a SurrealDB server running at {}? Start one with `surreal start --user root --pass root surrealkv://queuectl.db` and pass --user/--pass",
                e, store.endpoint
            )
            .into());
        }
        Err(e) => return Err(e.into()),
    };
    init_tracing(config.log_level);

    match cli.command {
        Command::Enqueue {
            payload,
            command,
            max_retries,
        } => enqueue(payload, command, max_retries).await,
        Command::List { state, limit, json } => {
            let jobs = api::list_jobs(state, limit).await?;
            if json {
                output::print_json(&jobs)
            } else {
                output::print_jobs(&jobs);
                Ok(())
            }
        }
        Command::Show { id, json } => {
            let job = api::show_job(id).await?;
            if json {
                output::print_json(&job)
            } else {
                output::print_job(&job);
                Ok(())
            }
        }
        Command::Status { json } => {
            let snapshot = api::status_snapshot().await?;
            if json {
                output::print_json(&snapshot)
            } else {
                output::print_status(&snapshot);
                Ok(())
            }
        }
        Command::Worker(command) => worker(command).await,
        Command::Dlq(command) => dlq(command).await,
        Command::Config(command) => config_command(command).await,
        Command::Job(JobCommand::Reset { id }) => {
            let job = api::reset_job(id).await?;
            println!("Job {} reset to {}", job.id, job.state);
            Ok(())
        }
    }
}

fn is_server(endpoint: &str) -> bool {
    ["ws://", "wss://", "http://", "https://"]
        .iter()
        .any(|scheme| endpoint.starts_with(scheme))
}

/// `RUST_LOG` wins over the stored level.
fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn enqueue(payload: Option<String>, command: Option<String>, max_retries: Option<u32>) -> CliResult {
    let mut request = match (command, payload) {
        (Some(command), _) => EnqueueRequest {
            command,
            max_retries: None,
        },
        (None, Some(payload)) if payload.trim_start().starts_with('{') => {
            EnqueueRequest::from_json(&payload)?
        }
        (None, Some(command)) => EnqueueRequest {
            command,
            max_retries: None,
        },
        (None, None) => return Err("Nothing to enqueue: pass a payload or --command".into()),
    };
    if max_retries.is_some() {
        request.max_retries = max_retries;
    }

    let new_job: NewJob = request.into_new_job()?;
    let job = api::enqueue_job(new_job).await?;
    println!("Enqueued job {} ({})", job.id, job.command);
    Ok(())
}

async fn worker(command: WorkerCommand) -> CliResult {
    match command {
        WorkerCommand::Start { count } => {
            let pool = api::start_workers(count).await?;
            let mut events = pool.subscribe();
            let printer = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => println!("{}", event.description()),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Event printer fell behind")
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            println!("Started {} worker(s); Ctrl-C or `queuectl worker stop` to stop", count);
            let result = pool
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
            printer.abort();
            result?;
            println!("Workers stopped");
            Ok(())
        }
        WorkerCommand::Stop => {
            let signalled = api::stop_workers().await?;
            println!("Asked {} worker(s) to stop after their current job", signalled);
            Ok(())
        }
    }
}

async fn dlq(command: DlqCommand) -> CliResult {
    match command {
        DlqCommand::List { json } => {
            let jobs = api::dlq_list().await?;
            if json {
                output::print_json(&jobs)
            } else {
                output::print_dead_jobs(&jobs);
                Ok(())
            }
        }
        DlqCommand::Retry { all: true, .. } => {
            let report = api::dlq_retry_all().await?;
            println!("Requeued {} job(s)", report.requeued.len());
            for failure in &report.failed {
                eprintln!("Job {}: {}", failure.job_id, failure.error);
            }
            if report.is_complete() {
                Ok(())
            } else {
                Err(format!("{} job(s) could not be requeued", report.failed.len()).into())
            }
        }
        DlqCommand::Retry { id: Some(id), .. } => {
            let job = api::dlq_retry(id).await?;
            println!("Job {} requeued", job.id);
            Ok(())
        }
        DlqCommand::Retry { id: None, .. } => Err("Pass a job id or --all".into()),
    }
}

async fn config_command(command: ConfigCommand) -> CliResult {
    match command {
        ConfigCommand::Show { json } => {
            let config = api::config_show().await?;
            if json {
                output::print_json(&config)
            } else {
                output::print_config(&config);
                Ok(())
            }
        }
        ConfigCommand::Get { key } => {
            let (_, value) = api::config_get(&key).await?;
            println!("{}", value);
            Ok(())
        }
        ConfigCommand::Set { key, value } => {
            let config = api::config_set(&key, &value).await?;
            let key: api::ConfigKey = key.parse()?;
            println!("{} = {}", key, config.get(key));
            Ok(())
        }
    }
}
