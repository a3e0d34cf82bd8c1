//! Commit status reporting to the GitHub statuses API.
//!
//! The orchestrator never talks to GitHub directly. It notifies a
//! [`StatusObserver`] on every transition; [`StatusReporter`] queues those
//! notifications and a single background task delivers them in order.
//! Delivery failures are logged and go nowhere else.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DeployConfig;
use crate::error::{DeployError, Result};

const STATUS_API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Body of a status API request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub state: CommitState,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

/// The commit a status update is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub repository_full_name: String,
    pub head_sha: String,
}

impl CommitRef {
    pub fn new(repository_full_name: impl Into<String>, head_sha: impl Into<String>) -> Self {
        Self {
            repository_full_name: repository_full_name.into(),
            head_sha: head_sha.into(),
        }
    }

    /// Both the repository and the SHA are needed to address a status
    pub fn is_addressable(&self) -> bool {
        !self.repository_full_name.is_empty()
            && self.repository_full_name != "unknown"
            && !self.head_sha.is_empty()
    }
}

/// Receives pipeline transitions. Implementations must not block and have
/// no way to report failure back to the caller.
pub trait StatusObserver: Send + Sync {
    fn notify(&self, commit: &CommitRef, update: StatusUpdate);
}

/// Thin client for `POST /repos/{repo}/statuses/{sha}`
#[derive(Clone)]
pub struct GithubStatusClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GithubStatusClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("push_deploy/", env!("CARGO_PKG_VERSION")))
            .timeout(STATUS_API_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn status_url(&self, commit: &CommitRef) -> String {
        format!(
            "{}/repos/{}/statuses/{}",
            self.api_url, commit.repository_full_name, commit.head_sha
        )
    }

    /// Sends one update. The API answers 201 Created on success; anything
    /// else is returned as `StatusRejected`.
    pub async fn post_status(&self, commit: &CommitRef, update: &StatusUpdate) -> Result<()> {
        let response = self
            .http
            .post(self.status_url(commit))
            .header(reqwest::header::AUTHORIZATION, format!("token {}", self.token))
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .json(update)
            .send()
            .await?;

        if response.status() == StatusCode::CREATED {
            Ok(())
        } else {
            Err(DeployError::StatusRejected(response.status().as_u16()))
        }
    }
}

type Delivery = (CommitRef, StatusUpdate);

/// Fire-and-forget status reporter. Inert when no token is configured.
#[derive(Clone)]
pub struct StatusReporter {
    queue: Option<mpsc::UnboundedSender<Delivery>>,
}

impl StatusReporter {
    /// Reporter that drops every update without any network traffic
    pub fn disabled() -> Self {
        Self { queue: None }
    }

    /// Builds the reporter from config, spawning its delivery task when a
    /// token is present. Must be called inside a Tokio runtime.
    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        let token = match config.github_token.as_deref() {
            Some(token) if !token.is_empty() => token,
            _ => {
                info!("GitHub status reporting disabled (no GITHUB_TOKEN)");
                return Ok(Self::disabled());
            }
        };
        let client = GithubStatusClient::new(&config.github_api_url, token)?;
        Ok(Self::spawn(client))
    }

    pub fn spawn(client: GithubStatusClient) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_updates(client, rx));
        Self { queue: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }
}

impl StatusObserver for StatusReporter {
    fn notify(&self, commit: &CommitRef, update: StatusUpdate) {
        let Some(queue) = &self.queue else {
            return;
        };
        if !commit.is_addressable() {
            debug!("Skipping status '{}': no repository or SHA", update.description);
            return;
        }
        if queue.send((commit.clone(), update)).is_err() {
            warn!("Status delivery task has stopped; update dropped");
        }
    }
}

async fn deliver_updates(client: GithubStatusClient, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some((commit, update)) = rx.recv().await {
        match client.post_status(&commit, &update).await {
            Ok(()) => info!(
                "GitHub status for {}@{}: {} - {}",
                commit.repository_full_name, commit.head_sha, update.state, update.description
            ),
            Err(e) => warn!(
                "Failed to update GitHub status for {}@{}: {}",
                commit.repository_full_name, commit.head_sha, e
            ),
        }
    }
    debug!("Status delivery task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_serializes_to_api_body() {
        let update = StatusUpdate {
            state: CommitState::Failure,
            target_url: "http://app.localhost.local:8080".into(),
            description: "tests failed".into(),
            context: "ci/push-deploy".into(),
        };
        let body = serde_json::to_value(&update).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "state": "failure",
                "target_url": "http://app.localhost.local:8080",
                "description": "tests failed",
                "context": "ci/push-deploy"
            })
        );
    }

    #[test]
    fn status_url_format() {
        let client = GithubStatusClient::new("https://api.github.com/", "t").unwrap();
        assert_eq!(
            client.status_url(&CommitRef::new("org/repo", "abc123")),
            "https://api.github.com/repos/org/repo/statuses/abc123"
        );
    }

    #[test]
    fn commit_ref_needs_repo_and_sha() {
        assert!(CommitRef::new("org/repo", "abc").is_addressable());
        assert!(!CommitRef::new("org/repo", "").is_addressable());
        assert!(!CommitRef::new("unknown", "abc").is_addressable());
    }

    #[test]
    fn disabled_reporter_is_inert() {
        let reporter = StatusReporter::from_config(&DeployConfig::default()).unwrap();
        assert!(!reporter.is_enabled());
        reporter.notify(
            &CommitRef::new("org/repo", "abc"),
            StatusUpdate {
                state: CommitState::Pending,
                target_url: String::new(),
                description: "fetch starting".into(),
                context: "ci".into(),
            },
        );
    }
}
