//! Job submission flow.
//!
//! Drives one job at a time through `idle -> creating -> orchestrating` and
//! into its outcome, feeding stream messages through the phase aggregator.
//! Every stream message is checked against the active job's attempt tag and
//! id before it can change anything; messages for superseded jobs are
//! dropped.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::adapters::{ContentService, EventSource};
use crate::domain::{EventKind, Job, JobError, JobId, JobStatus, JobSummary, PhaseEvent, Platform};

use super::aggregator::{PhaseAggregator, PhaseRules};
use super::supervisor::{
    ConnectionState, ConnectionSupervisor, StreamMessage, StreamSignal, SupervisorError,
};
use super::validation::{SubmissionLimits, ValidationError};

/// Settings the flow needs from configuration
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Backend base URL; the stream endpoint is derived from it
    pub base_url: Url,

    /// Credential for the content service and the stream
    pub auth_token: String,

    /// Silence longer than this is a transport failure
    pub idle_timeout: Option<Duration>,

    pub limits: SubmissionLimits,
}

/// A user's submission
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub title: String,
    pub body: String,
    pub platforms: BTreeSet<Platform>,
}

/// Observable change produced by one stream message
#[derive(Debug, Clone, PartialEq)]
pub enum FlowUpdate {
    /// Stream transport is up
    Connected,

    /// New timeline entry
    Phase(PhaseEvent),

    /// Pipeline succeeded; the completion entry is already on the timeline
    Completed(JobSummary),

    /// Pipeline reported failure, message verbatim
    Failed(String),

    /// Stream dropped without a terminal event
    ConnectionLost(String),
}

/// Flow errors
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// The progress client: one active job, one connection, one aggregator
pub struct JobFlow {
    content: Arc<dyn ContentService>,
    supervisor: ConnectionSupervisor,
    inbox: mpsc::UnboundedReceiver<StreamMessage>,
    auth_token: String,
    limits: SubmissionLimits,
    aggregator: PhaseAggregator,
    job: Job,
}

impl JobFlow {
    /// Create a flow with the default phase rules
    pub fn new(
        content: Arc<dyn ContentService>,
        source: Arc<dyn EventSource>,
        settings: FlowSettings,
    ) -> Self {
        Self::with_rules(content, source, settings, PhaseRules::default())
    }

    pub fn with_rules(
        content: Arc<dyn ContentService>,
        source: Arc<dyn EventSource>,
        settings: FlowSettings,
        rules: PhaseRules,
    ) -> Self {
        let (supervisor, inbox) =
            ConnectionSupervisor::new(source, settings.base_url, settings.idle_timeout);
        Self {
            content,
            supervisor,
            inbox,
            auth_token: settings.auth_token,
            limits: settings.limits,
            aggregator: PhaseAggregator::new(rules),
            job: Job::new(),
        }
    }

    /// The active job
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Submit new content and start orchestrating it.
    ///
    /// Validation runs first and leaves the current job untouched on
    /// failure. Otherwise the current job is abandoned and a new one starts.
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn submit(&mut self, request: SubmitRequest) -> Result<JobId, FlowError> {
        if let Err(e) = self.limits.validate(&request.body, &request.platforms) {
            warn!(error = %e, "Submission rejected");
            if self.job.status == JobStatus::Idle {
                self.job.error = Some(e.to_string());
            }
            return Err(e.into());
        }

        self.abandon();
        self.job
            .begin_creating(request.title.clone(), request.platforms.clone())?;

        let job_id = match self
            .content
            .create_content(&request.title, &request.body)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => return Err(self.reject(e)),
        };
        self.job.assign_id(job_id.clone())?;
        debug!(%job_id, "Content record created");

        let platforms: Vec<Platform> = request.platforms.iter().copied().collect();
        if let Err(e) = self
            .content
            .start_orchestration(&job_id, &platforms)
            .await
        {
            return Err(self.reject(e));
        }

        self.job.start_orchestrating()?;
        info!(%job_id, "Orchestration started");
        self.connect(&job_id)?;

        Ok(job_id)
    }

    /// Follow a job that is already running server-side
    #[instrument(skip(self))]
    pub fn watch(&mut self, job_id: JobId) -> Result<(), FlowError> {
        self.abandon();
        self.job = Job::attached(job_id.clone());
        info!(%job_id, "Attaching to running job");
        self.connect(&job_id)
    }

    /// Drop the active job: close its stream and reset all per-job state
    pub fn abandon(&mut self) {
        if let Some(job_id) = &self.job.job_id {
            if !self.job.is_terminal() {
                info!(%job_id, "Abandoning job");
            }
        }
        self.supervisor.close();
        self.aggregator.reset();
        self.job = Job::new();
    }

    fn connect(&mut self, job_id: &JobId) -> Result<(), FlowError> {
        if let Err(e) = self.supervisor.open(self.job.attempt, job_id, &self.auth_token) {
            self.job.lose_connection(e.to_string())?;
            return Err(e.into());
        }
        Ok(())
    }

    fn reject(&mut self, error: anyhow::Error) -> FlowError {
        let message = format!("{:#}", error);
        error!(error = %message, "Content service rejected submission");
        if let Err(e) = self.job.revert_to_idle(message.clone()) {
            warn!(error = %e, "Could not revert job to idle");
        }
        FlowError::Submission(message)
    }

    /// Wait for the next observable change of the active job.
    ///
    /// Returns `None` once the job is no longer orchestrating.
    pub async fn next_update(&mut self) -> Option<FlowUpdate> {
        while self.job.status == JobStatus::Orchestrating {
            let message = self.inbox.recv().await?;
            if let Some(update) = self.handle(message) {
                return Some(update);
            }
        }
        None
    }

    /// Apply one stream message to the active job
    pub fn handle(&mut self, message: StreamMessage) -> Option<FlowUpdate> {
        if !self.job.owns(message.attempt, &message.job_id) {
            debug!(job_id = %message.job_id, "Ignoring message for superseded job");
            return None;
        }
        if self.job.status != JobStatus::Orchestrating {
            debug!(status = ?self.job.status, "Ignoring message for finished job");
            return None;
        }

        match message.signal {
            StreamSignal::Opened => Some(FlowUpdate::Connected),
            StreamSignal::Event(event) => {
                if let Some(tagged) = event.job_id.as_deref() {
                    if tagged != message.job_id.as_str() {
                        debug!(tagged, "Ignoring event tagged for another job");
                        return None;
                    }
                }

                match event.kind {
                    EventKind::Log => {
                        let entry = self.aggregator.observe(&event)?;
                        self.job.record_phase(entry.clone()).ok()?;
                        Some(FlowUpdate::Phase(entry))
                    }
                    EventKind::Complete => {
                        let entry = self.aggregator.complete();
                        self.job.record_phase(entry).ok()?;
                        let summary = JobSummary {
                            kpis: event.kpis,
                            variants: event.variants.unwrap_or_default(),
                        };
                        self.job.complete(summary.clone()).ok()?;
                        self.supervisor.close();
                        info!(job_id = %message.job_id, variants = summary.variants.len(), "Job completed");
                        Some(FlowUpdate::Completed(summary))
                    }
                    EventKind::Error => {
                        let reason = event
                            .error
                            .or(event.message)
                            .unwrap_or_else(|| "Orchestration failed".to_string());
                        self.job.fail(reason.clone()).ok()?;
                        self.supervisor.close();
                        warn!(job_id = %message.job_id, error = %reason, "Job failed");
                        Some(FlowUpdate::Failed(reason))
                    }
                    EventKind::Connected => {
                        debug!(job_id = %message.job_id, "Stream handshake received");
                        None
                    }
                    EventKind::Unknown => {
                        debug!("Ignoring event of unknown type");
                        None
                    }
                }
            }
            StreamSignal::TransportFailed(e) => {
                let reason = e.to_string();
                self.job.lose_connection(reason.clone()).ok()?;
                self.supervisor.close();
                warn!(job_id = %message.job_id, error = %reason, "Connection lost");
                Some(FlowUpdate::ConnectionLost(reason))
            }
        }
    }
}
