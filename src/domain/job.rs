//! Job state for one orchestration attempt.
//!
//! A job moves `idle -> creating -> orchestrating` and then into exactly one
//! outcome. Outcomes are final: every transition out of them is rejected.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::phase::PhaseEvent;

/// Opaque identifier assigned by the content service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Target platform for generated variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Instagram,
    Facebook,
    Threads,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Threads => "threads",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Nothing submitted yet
    Idle,

    /// Content record and orchestration start in flight
    Creating,

    /// Stream open, phases accumulating
    Orchestrating,

    /// Pipeline reported success
    Completed,

    /// Pipeline reported failure
    Failed,

    /// Stream dropped before a terminal event; pipeline outcome unknown
    ConnectionLost,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::ConnectionLost
        )
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Payload carried by the `complete` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub kpis: Option<Value>,
    pub variants: Vec<Value>,
}

/// Job state errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Invalid job transition: {from:?} → {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job id already assigned: {0}")]
    IdAlreadyAssigned(JobId),

    #[error("Job has no id yet")]
    MissingId,
}

/// One orchestration attempt and everything derived from its stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Client-side tag for this attempt, known before the job id
    pub attempt: Uuid,

    /// Assigned once by the content service
    pub job_id: Option<JobId>,

    pub status: JobStatus,

    pub title: String,

    pub platforms: BTreeSet<Platform>,

    /// Append-only, in stream arrival order
    pub timeline: Vec<PhaseEvent>,

    /// Set on completion
    pub summary: Option<JobSummary>,

    /// Message surfaced to the user (submission error, pipeline error,
    /// connection loss)
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

impl Job {
    /// Create a fresh idle job with a new attempt tag
    pub fn new() -> Self {
        Self {
            attempt: Uuid::new_v4(),
            job_id: None,
            status: JobStatus::Idle,
            title: String::new(),
            platforms: BTreeSet::new(),
            timeline: Vec::new(),
            summary: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Create a job for a pipeline run that was started elsewhere
    pub fn attached(job_id: JobId) -> Self {
        let mut job = Self::new();
        job.job_id = Some(job_id);
        job.status = JobStatus::Orchestrating;
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a stream message tagged with `attempt`/`job_id` belongs here
    pub fn owns(&self, attempt: Uuid, job_id: &JobId) -> bool {
        self.attempt == attempt && self.job_id.as_ref() == Some(job_id)
    }

    fn transition(&mut self, expected: JobStatus, to: JobStatus) -> Result<(), JobError> {
        if self.status != expected {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// `idle -> creating`
    pub fn begin_creating(
        &mut self,
        title: impl Into<String>,
        platforms: BTreeSet<Platform>,
    ) -> Result<(), JobError> {
        self.transition(JobStatus::Idle, JobStatus::Creating)?;
        self.title = title.into();
        self.platforms = platforms;
        self.error = None;
        Ok(())
    }

    /// Record the id handed out by the content service (once)
    pub fn assign_id(&mut self, job_id: JobId) -> Result<(), JobError> {
        if let Some(existing) = &self.job_id {
            return Err(JobError::IdAlreadyAssigned(existing.clone()));
        }
        if self.status != JobStatus::Creating {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Creating,
            });
        }
        self.job_id = Some(job_id);
        Ok(())
    }

    /// `creating -> orchestrating`
    pub fn start_orchestrating(&mut self) -> Result<(), JobError> {
        if self.job_id.is_none() {
            return Err(JobError::MissingId);
        }
        self.transition(JobStatus::Creating, JobStatus::Orchestrating)
    }

    /// `creating -> idle` after the content service rejected the submission
    pub fn revert_to_idle(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Creating, JobStatus::Idle)?;
        self.job_id = None;
        self.error = Some(error.into());
        Ok(())
    }

    /// Append a timeline entry while orchestrating
    pub fn record_phase(&mut self, event: PhaseEvent) -> Result<(), JobError> {
        if self.status != JobStatus::Orchestrating {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Orchestrating,
            });
        }
        self.timeline.push(event);
        Ok(())
    }

    /// `orchestrating -> completed`
    pub fn complete(&mut self, summary: JobSummary) -> Result<(), JobError> {
        self.transition(JobStatus::Orchestrating, JobStatus::Completed)?;
        self.summary = Some(summary);
        Ok(())
    }

    /// `orchestrating -> failed`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Orchestrating, JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// `orchestrating -> connection_lost`
    pub fn lose_connection(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Orchestrating, JobStatus::ConnectionLost)?;
        self.error = Some(reason.into());
        Ok(())
    }
}
