//! Domain types for the progress client.
//!
//! This module contains the core data structures:
//! - Events: Raw messages from the backend stream
//! - Phase: The user-facing phase vocabulary and timeline entries
//! - Job: One orchestration attempt and its lifecycle

pub mod events;
pub mod job;
pub mod phase;

// Re-export commonly used types
pub use events::{EventKind, Inbound, RawEvent};
pub use job::{Job, JobError, JobId, JobStatus, JobSummary, Platform};
pub use phase::{Phase, PhaseEvent};
