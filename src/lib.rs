//! phaseline - Streaming progress client for content orchestration jobs
//!
//! Submits content to a backend content service, opens the job's live event
//! stream and turns the high-frequency log chatter into a short,
//! deduplicated phase timeline that ends in exactly one outcome.
//!
//! # Architecture
//!
//! The client is single-threaded and event-driven:
//! - The connection supervisor owns at most one live stream and reports
//!   everything on a channel, tagged with the job it belongs to
//! - The job flow applies messages for the active job only, in arrival order
//! - The phase aggregator maps log events to phases and suppresses repeats
//!
//! # Modules
//!
//! - `adapters`: External system integrations (content service, event stream)
//! - `core`: Client logic (Aggregator, Supervisor, Flow, Validation)
//! - `domain`: Data structures (RawEvent, PhaseEvent, Job)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit content and follow it
//! phaseline submit --title "Launch" --platform twitter,linkedin < post.md
//!
//! # Re-attach to a running job
//! phaseline watch <job-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use self::core::{FlowUpdate, JobFlow, PhaseAggregator, SubmitRequest};
pub use domain::{EventKind, Job, JobId, JobStatus, Phase, PhaseEvent, RawEvent};
