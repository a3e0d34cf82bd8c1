//! Webhook event parsing and classification

use serde_json::Value;
use tracing::info;

/// Event types named by the `X-GitHub-Event` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Push,
    PullRequest,
    Release,
    Other(String),
}

impl EventKind {
    /// A missing header is reported as `Other("unknown")`
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("push") => EventKind::Push,
            Some("pull_request") => EventKind::PullRequest,
            Some("release") => EventKind::Release,
            Some(other) => EventKind::Other(other.to_string()),
            None => EventKind::Other("unknown".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Release => "release",
            EventKind::Other(name) => name,
        }
    }
}

/// One inbound delivery. Lives for the duration of the HTTP request.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: EventKind,
    pub repository_full_name: String,
    pub raw_payload: Value,
}

impl WebhookEvent {
    pub fn new(kind: EventKind, raw_payload: Value) -> Self {
        let repository_full_name = str_at(&raw_payload, &["repository", "full_name"])
            .unwrap_or("unknown")
            .to_string();
        Self {
            kind,
            repository_full_name,
            raw_payload,
        }
    }
}

/// Data extracted from a push payload
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub branch: String,
    pub pusher_name: String,
    pub commit_count: usize,
    pub head_sha: String,
    pub clone_url: String,
}

impl PushPayload {
    pub fn from_payload(payload: &Value) -> Self {
        let branch_ref = str_at(payload, &["ref"]).unwrap_or("");
        let branch = branch_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(branch_ref)
            .to_string();
        Self {
            branch,
            pusher_name: str_at(payload, &["pusher", "name"])
                .unwrap_or("unknown")
                .to_string(),
            commit_count: payload
                .get("commits")
                .and_then(|c| c.as_array())
                .map(|c| c.len())
                .unwrap_or(0),
            head_sha: str_at(payload, &["after"]).unwrap_or("").to_string(),
            clone_url: str_at(payload, &["repository", "clone_url"])
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestSummary {
    pub action: String,
    pub number: Option<u64>,
    pub title: String,
}

impl PullRequestSummary {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            action: str_at(payload, &["action"]).unwrap_or("").to_string(),
            number: payload
                .get("pull_request")
                .and_then(|pr| pr.get("number"))
                .and_then(|n| n.as_u64()),
            title: str_at(payload, &["pull_request", "title"])
                .unwrap_or("")
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSummary {
    pub action: String,
    pub tag_name: String,
}

impl ReleaseSummary {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            action: str_at(payload, &["action"]).unwrap_or("").to_string(),
            tag_name: str_at(payload, &["release", "tag_name"])
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// What the listener should do with a classified event
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Run the fetch/test/deploy pipeline
    Pipeline(PushPayload),
    /// Logged only
    Logged,
}

/// Inspects the event kind and routes it. Only pushes reach the pipeline;
/// everything else is logged and dropped.
pub fn classify(event: &WebhookEvent) -> Route {
    let payload = &event.raw_payload;
    match event.kind {
        EventKind::Push => {
            let push = PushPayload::from_payload(payload);
            info!(
                "Push to '{}' by {} ({} commits, head {})",
                push.branch, push.pusher_name, push.commit_count, push.head_sha
            );
            Route::Pipeline(push)
        }
        EventKind::PullRequest => {
            let pr = PullRequestSummary::from_payload(payload);
            match pr.number {
                Some(number) => info!("Pull request #{}: {} - {}", number, pr.action, pr.title),
                None => info!("Pull request: {} - {}", pr.action, pr.title),
            }
            Route::Logged
        }
        EventKind::Release => {
            let release = ReleaseSummary::from_payload(payload);
            info!("Release {}: {}", release.tag_name, release.action);
            Route::Logged
        }
        EventKind::Other(ref name) => {
            info!(
                "Event '{}' for '{}' - logged only",
                name, event.repository_full_name
            );
            Route::Logged
        }
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(|v| v.as_str())
}
