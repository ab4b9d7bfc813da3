//! HTTP client for the content service.
//!
//! Endpoint: POST /api/content, POST /api/content/{id}/orchestrate
//! Auth: Bearer token
//!
//! The event stream lives at GET /api/content/{id}/stream and takes the
//! token as a `token` query parameter, since the stream transport cannot
//! carry custom headers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::ContentService;
use crate::domain::{JobId, Platform};

/// Content service client
pub struct HttpContentService {
    base_url: Url,
    token: String,
    client: reqwest::Client,
}

/// Payload for content creation
#[derive(Debug, Serialize)]
struct CreateContentRequest<'a> {
    title: &'a str,
    body: &'a str,
}

/// Response from content creation
#[derive(Debug, Deserialize)]
struct CreateContentResponse {
    #[serde(alias = "contentId", alias = "_id")]
    id: String,
}

/// Payload for orchestration start
#[derive(Debug, Serialize)]
struct StartOrchestrationRequest<'a> {
    platforms: &'a [Platform],
}

impl HttpContentService {
    /// Create a new client
    pub fn new(base_url: Url, token: String) -> Self {
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Build an API URL below the base
    fn api_url(&self, path: &str) -> Result<Url> {
        join_path(&self.base_url, path)
            .with_context(|| format!("Invalid API path: {}", path))
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    async fn create_content(&self, title: &str, body: &str) -> Result<JobId> {
        let url = self.api_url("api/content")?;
        debug!(%url, "Creating content record");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&CreateContentRequest { title, body })
            .send()
            .await
            .context("Failed to reach content service")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Content service error ({}): {}", status, text.trim());
        }

        let created: CreateContentResponse = response
            .json()
            .await
            .context("Failed to parse content service response")?;

        Ok(JobId::new(created.id))
    }

    async fn start_orchestration(&self, job_id: &JobId, platforms: &[Platform]) -> Result<()> {
        let url = self.api_url(&format!("api/content/{}/orchestrate", job_id))?;
        debug!(%url, "Starting orchestration");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&StartOrchestrationRequest { platforms })
            .send()
            .await
            .context("Failed to reach content service")?;

        let status = response.status();
        if status.is_success() {
            // 202 Accepted is the usual answer; progress arrives on the stream
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Orchestration start failed ({}): {}", status, text.trim())
        }
    }
}

/// Build the event stream URL for a job, with the token as a query parameter
pub fn stream_url(base_url: &Url, job_id: &JobId, token: &str) -> Result<Url, url::ParseError> {
    let mut url = join_path(base_url, &format!("api/content/{}/stream", job_id))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Render a URL for logs with the `token` query value hidden
pub fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return redacted.to_string();
    }

    redacted
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    redacted.to_string()
}

/// Join a relative path onto a base, treating the base as a directory
fn join_path(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_carries_token_as_query() {
        let base = Url::parse("https://api.example.com").unwrap();
        let url = stream_url(&base, &JobId::new("abc123"), "s3cr3t").unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/content/abc123/stream?token=s3cr3t"
        );
    }

    #[test]
    fn test_stream_url_keeps_base_path() {
        let base = Url::parse("https://example.com/backend").unwrap();
        let url = stream_url(&base, &JobId::new("j1"), "t").unwrap();

        assert_eq!(url.path(), "/backend/api/content/j1/stream");
    }

    #[test]
    fn test_token_is_percent_encoded() {
        let base = Url::parse("http://localhost:3000/").unwrap();
        let url = stream_url(&base, &JobId::new("j1"), "a b&c").unwrap();

        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn test_redact_hides_token() {
        let url = Url::parse("http://localhost/api/content/j1/stream?token=s3cr3t").unwrap();
        let shown = redact(&url);

        assert!(!shown.contains("s3cr3t"));
        assert!(shown.contains("token=***") || shown.contains("token=%2A%2A%2A"));
    }

    #[test]
    fn test_api_url() {
        let service = HttpContentService::new(
            Url::parse("https://api.example.com/v2").unwrap(),
            "TOKEN".to_string(),
        );
        assert_eq!(
            service.api_url("api/content").unwrap().as_str(),
            "https://api.example.com/v2/api/content"
        );
    }
}
