//! Configuration for the progress client.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PHASELINE_API_URL, PHASELINE_TOKEN)
//! 2. Config file (.phaseline/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .phaseline/config.yaml
//! - Falls back to ~/.phaseline/config.yaml

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::core::{FlowSettings, SubmissionLimits};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_API_URL: &str = "PHASELINE_API_URL";
pub const ENV_TOKEN: &str = "PHASELINE_TOKEN";

const DEFAULT_API_URL: &str = "http://localhost:3000";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stream: Option<StreamConfig>,
    #[serde(default)]
    pub submission: Option<SubmissionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Backend base URL
    pub base_url: Option<String>,
    /// API token (prefer the environment variable)
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Seconds of silence before the stream counts as lost; 0 disables
    pub idle_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub min_body_chars: Option<usize>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub idle_timeout: Option<Duration>,
    pub limits: SubmissionLimits,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Settings for a [`crate::core::JobFlow`]; requires a token
    pub fn flow_settings(&self) -> Result<FlowSettings> {
        let auth_token = self.token.clone().with_context(|| {
            format!("No API token configured. Set {} or api.token", ENV_TOKEN)
        })?;

        Ok(FlowSettings {
            base_url: self.base_url.clone(),
            auth_token,
            idle_timeout: self.idle_timeout,
            limits: self.limits.clone(),
        })
    }

    /// Token for display: first four characters only
    pub fn masked_token(&self) -> String {
        match &self.token {
            Some(token) if token.chars().count() > 8 => {
                let head: String = token.chars().take(4).collect();
                format!("{}…", head)
            }
            Some(_) => "****".to_string(),
            None => "(not set)".to_string(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".phaseline").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home_config = dirs::home_dir()?.join(".phaseline").join("config.yaml");
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merge file values, environment and defaults
fn resolve<F>(file: Option<&ConfigFile>, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let url_str = env(ENV_API_URL)
        .or_else(|| file.and_then(|f| f.api.base_url.clone()))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let base_url =
        Url::parse(&url_str).with_context(|| format!("Invalid API base URL: {}", url_str))?;

    let token = env(ENV_TOKEN)
        .or_else(|| file.and_then(|f| f.api.token.clone()))
        .filter(|t| !t.trim().is_empty());

    let idle_secs = file
        .and_then(|f| f.stream.as_ref())
        .and_then(|s| s.idle_timeout_seconds)
        .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
    let idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

    let mut limits = SubmissionLimits::default();
    if let Some(min) = file
        .and_then(|f| f.submission.as_ref())
        .and_then(|s| s.min_body_chars)
    {
        limits.min_body_chars = min;
    }

    Ok(ResolvedConfig {
        base_url,
        token,
        idle_timeout,
        limits,
        config_file: None,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();

    let parsed = match &config_file {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    let mut config = resolve(parsed.as_ref(), |key| std::env::var(key).ok())?;
    config.config_file = config_file;
    Ok(config)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
