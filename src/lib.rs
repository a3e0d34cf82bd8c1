pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod run;
pub mod stage;
pub mod status;
pub mod utils;
pub mod webhook;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::config::DeployConfig;
use crate::pipeline::Orchestrator;
use crate::status::StatusObserver;

pub struct AppState {
    /// Held for the whole of a pipeline run; overlapping deliveries queue on it
    pub run_lock: Mutex<()>,
    pub config: DeployConfig,
    pub orchestrator: Orchestrator,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: DeployConfig, observer: Arc<dyn StatusObserver>) -> Self {
        let orchestrator = Orchestrator::from_config(&config, observer);
        Self {
            run_lock: Mutex::new(()),
            config,
            orchestrator,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
