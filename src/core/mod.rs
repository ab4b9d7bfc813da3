//! Core client logic.
//!
//! This module contains:
//! - Aggregator: Raw log events to a deduplicated phase timeline
//! - Supervisor: Event stream lifecycle
//! - Flow: Job submission state machine
//! - Validation: Local submission guards

pub mod aggregator;
pub mod flow;
pub mod supervisor;
pub mod validation;

// Re-export commonly used types
pub use aggregator::{PhaseAggregator, PhaseRule, PhaseRules};
pub use flow::{FlowError, FlowSettings, FlowUpdate, JobFlow, SubmitRequest};
pub use supervisor::{
    Connection, ConnectionState, ConnectionSupervisor, StreamMessage, StreamSignal,
    SupervisorError,
};
pub use validation::{SubmissionLimits, ValidationError};
