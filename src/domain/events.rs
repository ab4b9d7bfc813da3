//! Raw events as they arrive from the backend event stream.
//!
//! Stream order is authoritative. The producer's `timestamp` is carried along
//! for display only and never used to reorder anything.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message received from the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Discriminator; unknown values deserialize to [`EventKind::Unknown`]
    #[serde(rename = "type", default)]
    pub kind: EventKind,

    /// Free-text description (present for `log`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Producer-side phase tag, preferred over text classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Job this event belongs to, when the producer includes it
    #[serde(
        rename = "jobId",
        alias = "job_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub job_id: Option<String>,

    /// Producer generation time (advisory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// KPI payload of a `complete` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpis: Option<Value>,

    /// Generated variants of a `complete` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<Value>>,

    /// Failure message of an `error` event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawEvent {
    /// Create an event of the given kind with no payload
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            message: None,
            phase: None,
            job_id: None,
            timestamp: None,
            kpis: None,
            variants: None,
            error: None,
        }
    }

    /// Create a `log` event
    pub fn log(message: impl Into<String>) -> Self {
        Self::new(EventKind::Log).with_message(message)
    }

    /// Create an `error` event
    pub fn failure(error: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Error);
        event.error = Some(error.into());
        event
    }

    /// Create a `complete` event
    pub fn complete(kpis: Option<Value>, variants: Vec<Value>) -> Self {
        let mut event = Self::new(EventKind::Complete);
        event.kpis = kpis;
        event.variants = Some(variants);
        event
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Whether this event ends the job (`complete` or `error`)
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }
}

/// Types of events the backend emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Stream handshake
    Connected,

    /// Progress chatter from the pipeline
    Log,

    /// Pipeline finished successfully
    Complete,

    /// Pipeline failed
    Error,

    /// Anything else; ignored
    #[serde(other)]
    Unknown,
}

impl Default for EventKind {
    fn default() -> Self {
        Self::Unknown
    }
}

impl EventKind {
    /// Parse an SSE `event:` name into a kind
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "connected" => Self::Connected,
            "log" => Self::Log,
            "complete" => Self::Complete,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// One item produced by an open event stream
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded event
    Event(RawEvent),

    /// Keep-alive with no payload (SSE comment line)
    KeepAlive,
}
