//! Webhook listener: acknowledge every well-formed delivery, run pushes in the background

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    extract::rejection::{BytesRejection, FailedToBufferBody},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::error::{DeployError, Result};
use crate::status::CommitRef;
use crate::utils::verify_github_signature;
use crate::webhook::{EventKind, PushPayload, Route, WebhookEvent, classify};

fn acknowledge() -> Response {
    (StatusCode::OK, Json(json!({"status": "success"}))).into_response()
}

/// Handles the GitHub webhook POST request.
///
/// Responds 200 `{"status":"success"}` for any syntactically valid JSON,
/// whatever the pipeline later does; outcomes are reported through commit
/// statuses. Malformed JSON gets a bare 400 and an oversized body a 413.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(bytes) => bytes,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(e))) => {
            warn!(
                "Webhook body exceeds {} bytes, refusing it: {}",
                state.config.max_body_bytes, e
            );
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
        Err(e) => {
            // Most likely the client hung up mid-request
            info!("Could not read webhook body, treating as handled: {}", e);
            return acknowledge();
        }
    };

    if state.config.needs_webhook_secret() {
        if let Err(e) = check_signature(&state, &headers, &body) {
            error!("{}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Could not parse JSON body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let kind = EventKind::from_header(headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok()));
    let event = WebhookEvent::new(kind, payload);
    info!(
        "Received '{}' event for '{}'",
        event.kind.as_str(),
        event.repository_full_name
    );
    debug!("{:#?}", &event.raw_payload);

    match classify(&event) {
        Route::Pipeline(push) => spawn_pipeline(state, event.repository_full_name, push),
        Route::Logged => {}
    }

    acknowledge()
}

fn check_signature(state: &SharedState, headers: &HeaderMap, body: &Bytes) -> Result<()> {
    let secret = state.config.webhook_secret.as_deref().unwrap_or_default();
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            DeployError::WebhookValidationFailed("no X-Hub-Signature-256 header supplied".into())
        })?;
    if !verify_github_signature(secret, body, signature) {
        return Err(DeployError::WebhookValidationFailed(
            "signature does not match payload".into(),
        ));
    }
    Ok(())
}

/// Runs the pipeline on a background task so the delivery is acknowledged
/// right away. Runs queue on the run lock, one at a time.
fn spawn_pipeline(state: SharedState, repository: String, push: PushPayload) {
    let commit = CommitRef::new(repository.as_str(), push.head_sha.as_str());
    let run_state = state.clone();
    let handle = tokio::spawn(async move {
        let _guard = run_state.run_lock.lock().await;
        let run = run_state.orchestrator.run(&repository, &push).await;
        debug!(
            "Run {} ended in {:?} after stages {:?}",
            run.id,
            run.state,
            run.stage_names()
        );
    });

    tokio::spawn(watch_run(state, commit, handle));
}

/// A run task that panicked never reached a terminal state, so the commit
/// is closed out with an error status here.
async fn watch_run(state: SharedState, commit: CommitRef, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(
            "Pipeline task for '{}' aborted: {}",
            commit.repository_full_name, e
        );
        state.orchestrator.report_unexpected(&commit);
    }
}
