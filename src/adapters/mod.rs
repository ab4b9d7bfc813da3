//! Adapter interfaces for external systems.
//!
//! The client talks to two collaborators it does not implement: the content
//! service (creates the content record and starts orchestration) and the
//! event source (a one-way stream of JSON events per job).

pub mod http;
pub mod sse;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

use crate::domain::{Inbound, JobId, Platform};

// Re-export the HTTP adapters
pub use http::{stream_url, HttpContentService};
pub use sse::{decode_event_stream, SseDecoder, SseEventSource, SseFrame, MAX_LINE_BYTES};

/// Items of an open event stream
pub type EventStream = BoxStream<'static, Result<Inbound, TransportError>>;

/// Trait for the backend that owns content records and orchestration jobs
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Create a content record; its id doubles as the job id
    async fn create_content(&self, title: &str, body: &str) -> Result<JobId>;

    /// Trigger orchestration. Progress is only observable on the event stream.
    async fn start_orchestration(&self, job_id: &JobId, platforms: &[Platform]) -> Result<()>;
}

/// Trait for the server-to-client event stream
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a stream at `endpoint`
    async fn connect(&self, endpoint: Url) -> Result<EventStream, TransportError>;
}

/// Stream-level failures, distinct from a pipeline-reported `error` event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect to event stream: {0}")]
    Connect(String),

    #[error("Event stream rejected with HTTP {0}")]
    Status(u16),

    #[error("Event stream read failed: {0}")]
    Stream(String),

    #[error("Event stream closed by server before the job finished")]
    ClosedByServer,

    #[error("No events received for {0:?}")]
    IdleTimeout(Duration),
}
