//! HTTP surface: the webhook listener and the informational page

pub mod status_page;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};

use crate::SharedState;

pub use status_page::status_page;
pub use webhook::handle_webhook;

/// Builds the application router. A POST to any path is a webhook
/// delivery; every other request gets the info page.
pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/", routing::get(status_page).post(handle_webhook))
        .route("/webhook", routing::get(status_page).post(handle_webhook))
        .route("/{*path}", routing::get(status_page).post(handle_webhook))
        .fallback(status_page)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
