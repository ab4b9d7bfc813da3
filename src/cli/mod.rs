//! Command-line interface for phaseline.
//!
//! Provides commands for submitting content and following its orchestration
//! live, attaching to a running job, replaying a captured event stream, and
//! showing the resolved configuration.

use std::collections::BTreeSet;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::{stream, StreamExt};

use crate::adapters::{decode_event_stream, HttpContentService, SseEventSource};
use crate::core::{FlowUpdate, JobFlow, PhaseAggregator, SubmitRequest};
use crate::domain::{EventKind, Inbound, JobId, JobStatus, JobSummary, PhaseEvent, Platform, RawEvent};

/// phaseline - Streaming progress client for content orchestration jobs
#[derive(Parser, Debug)]
#[command(name = "phaseline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit content and follow its orchestration
    Submit {
        /// Content title
        #[arg(short, long)]
        title: String,

        /// Body file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Target platforms (repeat or comma-separate)
        #[arg(short, long = "platform", value_enum, value_delimiter = ',')]
        platforms: Vec<PlatformArg>,
    },

    /// Attach to a job that is already running
    Watch {
        /// Job ID returned by the content service
        job_id: String,
    },

    /// Replay a captured event stream (SSE text or JSON lines) offline
    Replay {
        /// Capture file
        file: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Platform for CLI (maps to Platform)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PlatformArg {
    Twitter,
    Linkedin,
    Instagram,
    Facebook,
    Threads,
}

impl From<PlatformArg> for Platform {
    fn from(p: PlatformArg) -> Self {
        match p {
            PlatformArg::Twitter => Platform::Twitter,
            PlatformArg::Linkedin => Platform::Linkedin,
            PlatformArg::Instagram => Platform::Instagram,
            PlatformArg::Facebook => Platform::Facebook,
            PlatformArg::Threads => Platform::Threads,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                title,
                input,
                platforms,
            } => submit(title, input, platforms).await,
            Commands::Watch { job_id } => watch(&job_id).await,
            Commands::Replay { file } => replay(&file).await,
            Commands::Config => show_config(),
        }
    }
}

/// Build a flow against the configured backend
fn build_flow() -> Result<JobFlow> {
    let config = crate::config::config()?;
    let settings = config.flow_settings()?;

    let content = HttpContentService::new(settings.base_url.clone(), settings.auth_token.clone());
    Ok(JobFlow::new(
        Arc::new(content),
        Arc::new(SseEventSource::new()),
        settings,
    ))
}

/// Submit content and follow the job to its outcome
async fn submit(title: String, input: Option<PathBuf>, platforms: Vec<PlatformArg>) -> Result<()> {
    let body = read_body(input.as_deref())?;
    let platforms: BTreeSet<Platform> = platforms.into_iter().map(Platform::from).collect();

    let mut flow = build_flow()?;
    let job_id = flow
        .submit(SubmitRequest {
            title,
            body,
            platforms,
        })
        .await?;

    eprintln!("[Job {} orchestrating]", job_id);
    follow(&mut flow).await
}

/// Attach to a running job
async fn watch(job_id: &str) -> Result<()> {
    let mut flow = build_flow()?;
    flow.watch(JobId::new(job_id))?;

    eprintln!("[Watching job {}]", job_id);
    follow(&mut flow).await
}

/// Render updates until the job leaves `orchestrating` or the user hits Ctrl-C
async fn follow(flow: &mut JobFlow) -> Result<()> {
    loop {
        let update = tokio::select! {
            update = flow.next_update() => Some(update),
            _ = tokio::signal::ctrl_c() => None,
        };

        let Some(update) = update else {
            let job_id = flow.job().job_id.clone();
            flow.abandon();
            if let Some(job_id) = job_id {
                eprintln!("\n[Detached. Re-attach with: phaseline watch {}]", job_id);
            }
            return Ok(());
        };

        match update {
            Some(FlowUpdate::Connected) => eprintln!("[Connected]"),
            Some(FlowUpdate::Phase(entry)) => print_phase(&entry),
            Some(FlowUpdate::Completed(summary)) => {
                if let Some(entry) = flow.job().timeline.last() {
                    print_phase(entry);
                }
                print_summary(&summary);
            }
            Some(FlowUpdate::Failed(_)) | Some(FlowUpdate::ConnectionLost(_)) => {}
            None => break,
        }
    }

    let job = flow.job();
    let job_id = job
        .job_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();
    match job.status {
        JobStatus::Completed => {
            eprintln!("\n[Job {} completed successfully]", job_id);
        }
        JobStatus::Failed => {
            eprintln!(
                "\n[Job {} failed: {}]",
                job_id,
                job.error.as_deref().unwrap_or_default()
            );
            std::process::exit(1);
        }
        JobStatus::ConnectionLost => {
            eprintln!(
                "\n[Connection lost for job {}: {}]",
                job_id,
                job.error.as_deref().unwrap_or_default()
            );
            eprintln!("[The pipeline may still be running. Re-attach with: phaseline watch {}]", job_id);
            std::process::exit(1);
        }
        _ => {
            eprintln!("\n[Job {} in state: {:?}]", job_id, job.status);
        }
    }

    Ok(())
}

/// Feed a capture file through the decoder and aggregator
async fn replay(path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read capture file: {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let events: Vec<RawEvent> = if text.lines().any(|l| l.starts_with("data:")) {
        let chunks = stream::iter(vec![Ok::<_, io::Error>(bytes.clone())]);
        decode_event_stream(chunks)
            .filter_map(|item| async move {
                match item {
                    Ok(Inbound::Event(event)) => Some(event),
                    _ => None,
                }
            })
            .collect()
            .await
    } else {
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, l)| {
                serde_json::from_str(l)
                    .with_context(|| format!("Failed to parse event on line {}", i + 1))
            })
            .collect::<Result<_>>()?
    };

    let mut aggregator = PhaseAggregator::default();
    let mut ignored = 0usize;

    for event in &events {
        match event.kind {
            EventKind::Log => match aggregator.observe(event) {
                Some(entry) => print_phase(&entry),
                None => ignored += 1,
            },
            EventKind::Complete => {
                print_phase(&aggregator.complete());
                print_summary(&JobSummary {
                    kpis: event.kpis.clone(),
                    variants: event.variants.clone().unwrap_or_default(),
                });
                break;
            }
            EventKind::Error => {
                println!(
                    "  ✗ failed: {}",
                    event.error.as_deref().unwrap_or("Orchestration failed")
                );
                break;
            }
            EventKind::Connected | EventKind::Unknown => ignored += 1,
        }
    }

    eprintln!("\n[{} events, {} without a timeline entry]", events.len(), ignored);
    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let config = crate::config::config()?;

    println!("API base URL:   {}", config.base_url);
    println!("API token:      {}", config.masked_token());
    match config.idle_timeout {
        Some(timeout) => println!("Idle timeout:   {}s", timeout.as_secs()),
        None => println!("Idle timeout:   disabled"),
    }
    println!("Min body chars: {}", config.limits.min_body_chars);
    match &config.config_file {
        Some(path) => println!("Config file:    {}", path.display()),
        None => println!("Config file:    (none, using defaults)"),
    }

    Ok(())
}

/// Read the body from a file or piped stdin
fn read_body(input: Option<&Path>) -> Result<String> {
    if let Some(path) = input {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }

    if io::stdin().is_terminal() {
        anyhow::bail!("No body provided. Use --input <file> or pipe to stdin");
    }

    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

fn print_phase(entry: &PhaseEvent) {
    println!(
        "{}  {:<10} {}",
        entry.received_at.format("%H:%M:%S"),
        entry.phase,
        entry.text
    );
}

fn print_summary(summary: &JobSummary) {
    println!("\nVariants: {}", summary.variants.len());
    if let Some(serde_json::Value::Object(kpis)) = &summary.kpis {
        for (name, value) in kpis {
            println!("  {}: {}", name, value);
        }
    }
}
