//! Command-line utility for managing a running missive dispatcher
//!
//! This tool provides operational control over the dispatcher, including:
//! - Submitting and resuming batch jobs
//! - Viewing job progress and per-recipient outcomes
//! - Requesting cooperative stops
//! - System status and health checks

#![allow(clippy::items_after_statements, clippy::single_match_else)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use missive_control::{
    ControlClient, DEFAULT_CONTROL_SOCKET, JobCommand, Request, RequestCommand, ResponseData,
    ResponsePayload, SystemCommand,
};
use missive_dispatch::{JobConfig, RecipientRecord};

/// Command-line utility for managing a running missive dispatcher
#[derive(Parser, Debug)]
#[command(name = "missivectl")]
#[command(about = "Manage the missive dispatcher", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short, long, default_value = DEFAULT_CONTROL_SOCKET)]
    socket: String,

    /// Authentication token (required when the server has auth enabled)
    #[arg(short, long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch job management (runtime control via socket)
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Server status and health (runtime control via socket)
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
}

#[derive(Subcommand, Debug)]
enum JobAction {
    /// Submit a new batch for dispatch
    Submit {
        /// Path to the JSON batch file (an array of recipient records)
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        sender: SenderArgs,
    },
    /// Resume an interrupted job from its last checkpoint
    Resume {
        /// Job ID to resume
        job_id: String,

        /// Path to the JSON batch file, re-supplied in the original order
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        sender: SenderArgs,
    },
    /// View detailed progress for a job
    Status {
        /// Job ID to view
        job_id: String,
    },
    /// Request a cooperative stop of a running job
    Stop {
        /// Job ID to stop
        job_id: String,
    },
    /// List stored jobs
    List {
        /// Filter by status (queued, processing, completed, stopped, failed)
        #[arg(long)]
        status: Option<String>,
    },
}

/// Sender identity and per-job settings shared by submit and resume
#[derive(clap::Args, Debug)]
struct SenderArgs {
    /// Envelope sender and From header address
    #[arg(long)]
    from: String,

    /// Display name for the From header
    #[arg(long)]
    name: Option<String>,

    /// Environment variable holding the relay password. Omit to skip AUTH.
    #[arg(long, value_name = "VAR")]
    credential_env: Option<String>,

    /// Seconds to wait between sends, overriding the server default
    #[arg(long)]
    delay: Option<u64>,
}

impl SenderArgs {
    /// Build the job config, reading the credential from the environment.
    ///
    /// The credential travels over the local socket, never the command line,
    /// so it cannot leak through the process table.
    fn into_config(self) -> anyhow::Result<JobConfig> {
        let credential = match &self.credential_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                anyhow::anyhow!("Credential environment variable {var} is not set")
            })?),
            None => None,
        };

        Ok(JobConfig {
            from_address: self.from,
            from_display_name: self.name,
            credential,
            inter_send_delay_secs: self.delay,
        })
    }
}

#[derive(Subcommand, Debug)]
enum ServerAction {
    /// Check if the dispatcher is responding
    Ping,
    /// Get server status and statistics
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = check_control_socket(&cli.socket)?;

    let command = match cli.command {
        Commands::Job { action } => RequestCommand::Job(build_job_command(action)?),
        Commands::Server { action } => RequestCommand::System(match action {
            ServerAction::Ping => SystemCommand::Ping,
            ServerAction::Status => SystemCommand::Status,
        }),
    };

    let request = match cli.token {
        Some(token) => Request::with_token(command, token),
        None => Request::new(command),
    };

    let response = client.send_request(request).await?;
    print_response(&response.payload);

    Ok(())
}

/// Check control socket connectivity and return client
fn check_control_socket(socket_path: &str) -> anyhow::Result<ControlClient> {
    let client = ControlClient::new(socket_path);

    // Check if socket exists first for better error messages
    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to the missive control socket at {socket_path}.\n\
             Error: {e}\n\
             \n\
             Is the missive dispatcher running?\n\
             You can configure the socket path with --socket or in missive.config.ron"
        );
    }

    Ok(client)
}

/// Translate a CLI job action into a protocol command
fn build_job_command(action: JobAction) -> anyhow::Result<JobCommand> {
    Ok(match action {
        JobAction::Submit { file, sender } => JobCommand::Submit {
            records: load_batch(&file)?,
            config: sender.into_config()?,
        },
        JobAction::Resume {
            job_id,
            file,
            sender,
        } => JobCommand::Resume {
            job_id,
            records: load_batch(&file)?,
            config: sender.into_config()?,
        },
        JobAction::Status { job_id } => JobCommand::Status { job_id },
        JobAction::Stop { job_id } => JobCommand::Stop { job_id },
        JobAction::List { status } => JobCommand::List {
            status_filter: status,
        },
    })
}

/// Load a JSON batch file into recipient records
///
/// The file is a JSON array of objects. Recognised fields are
/// `recipient_address` (alias `email`), `display_name` (aliases `name`,
/// `company`), `subject`, and `body`; everything else is preserved verbatim
/// in each record's raw payload.
fn load_batch(path: &std::path::Path) -> anyhow::Result<Vec<RecipientRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read batch file {}: {}", path.display(), e))?;

    let values: Vec<serde_json::Value> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Batch file {} is not a JSON array: {}", path.display(), e))?;

    let mut records = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let mut record: RecipientRecord =
            serde_json::from_value(value.clone()).map_err(|e| {
                anyhow::anyhow!("Record {index} in {} is malformed: {}", path.display(), e)
            })?;
        record.raw_payload = value.to_string();
        records.push(record);
    }

    if records.is_empty() {
        tracing::warn!("Batch file {} contains no records", path.display());
    }

    Ok(records)
}

/// Format the age of a job in human-readable form
fn format_age(timestamp_ms: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let age_secs = now.saturating_sub(u128::from(timestamp_ms)) / 1000;

    if age_secs < 60 {
        format!("{age_secs}s")
    } else if age_secs < 3600 {
        format!("{}m{}s", age_secs / 60, age_secs % 60)
    } else if age_secs < 86400 {
        format!("{}h{}m", age_secs / 3600, (age_secs % 3600) / 60)
    } else {
        format!("{}d{}h", age_secs / 86400, (age_secs % 86400) / 3600)
    }
}

/// Print a response payload using the protocol display formats
fn print_response(payload: &ResponsePayload) {
    match payload {
        ResponsePayload::Ok => println!("✓ Command completed successfully"),
        ResponsePayload::Data(data) => match data.as_ref() {
            ResponseData::JobSubmitted(id) => {
                println!("✓ Job submitted: {id}");
            }
            ResponseData::JobDetails(details) => print!("{details}"),
            ResponseData::JobList(jobs) => {
                if jobs.is_empty() {
                    println!("No stored jobs");
                } else {
                    println!(
                        "{:<28} {:<12} {:>10} {:>6} {:>6} {:>8}",
                        "JOB ID", "STATUS", "PROGRESS", "SENT", "FAILED", "AGE"
                    );
                    println!("{}", "-".repeat(77));
                    for job in jobs {
                        let progress = format!("{}/{}", job.processed, job.total);
                        println!(
                            "{:<28} {:<12} {:>10} {:>6} {:>6} {:>8}",
                            job.id,
                            job.status,
                            progress,
                            job.successful,
                            job.failed,
                            format_age(job.created_at)
                        );
                    }
                    println!("\nTotal: {} job(s)", jobs.len());
                }
            }
            ResponseData::StopResult(result) => print!("{result}"),
            ResponseData::SystemStatus(status) => {
                println!("=== Missive Status ===\n");
                print!("{status}");
            }
            ResponseData::Message(msg) => println!("✓ {msg}"),
        },
        ResponsePayload::Error(err) => eprintln!("Server error: {err}"),
    }
}
