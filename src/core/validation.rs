//! Local submission guards.
//!
//! Checked before the content service is contacted; a rejected submission
//! never reaches the network.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Platform;

/// Limits applied to a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionLimits {
    /// Minimum body length in characters (default: 50)
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
}

fn default_min_body_chars() -> usize {
    50
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            min_body_chars: default_min_body_chars(),
        }
    }
}

impl SubmissionLimits {
    /// Validate a body and platform selection
    pub fn validate(
        &self,
        body: &str,
        platforms: &BTreeSet<Platform>,
    ) -> Result<(), ValidationError> {
        let chars = body.chars().count();
        if chars < self.min_body_chars {
            return Err(ValidationError::BodyTooShort {
                actual: chars,
                min: self.min_body_chars,
            });
        }

        if platforms.is_empty() {
            return Err(ValidationError::NoPlatforms);
        }

        Ok(())
    }
}

/// Submission rejected locally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Content is too short: {actual} characters, at least {min} required")]
    BodyTooShort { actual: usize, min: usize },

    #[error("Select at least one platform")]
    NoPlatforms,
}
