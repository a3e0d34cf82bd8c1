//! Informational page served on GET

use axum::{
    Json,
    extract::Query,
    extract::State as AxumState,
    response::{Html, IntoResponse},
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;

/// Static status page. Supports ?format=json for a machine-readable version.
pub async fn status_page(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let status_enabled = state.config.status_enabled();

    if params.get("format").map(|s| s.as_str()) == Some("json") {
        return Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "port": state.config.port,
            "github_status": status_enabled,
            "status": "healthy"
        }))
        .into_response();
    }

    let github_status = if status_enabled {
        "enabled"
    } else {
        "disabled (no GITHUB_TOKEN)"
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Push Deploy</title>
    <meta charset="utf-8">
    <style>
        body {{ font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; background-color: #f5f5f5; }}
        .container {{ background-color: white; padding: 30px; border-radius: 10px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }}
        h1 {{ color: #4d90cd; text-align: center; }}
        .info {{ background-color: #e7f3ff; padding: 15px; border-radius: 5px; margin: 20px 0; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Push Deploy webhook server</h1>
        <div class="info">
            <p><strong>Status:</strong> listening for GitHub webhook deliveries</p>
            <p><strong>Started:</strong> {started}</p>
            <p><strong>Port:</strong> {port}</p>
            <p><strong>GitHub status:</strong> {github_status}</p>
        </div>
        <p>Pushes run fetch, test and deploy in order. Pull request and release events are logged.</p>
    </div>
</body>
</html>
"#,
        started = state.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        port = state.config.port,
        github_status = github_status,
    ))
    .into_response()
}
