use push_deploy::AppState;
use push_deploy::api::router;
use push_deploy::config::load_config;
use push_deploy::logging::{FileLogger, setup_logging};
use push_deploy::status::StatusReporter;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    // Keep the guard alive so file logs are flushed on exit
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    let reporter = match StatusReporter::from_config(&config) {
        Ok(reporter) => reporter,
        Err(e) => {
            error!("Failed to build GitHub status client: {}", e);
            std::process::exit(1);
        }
    };

    let bind_address = config.listen_address();
    info!("Webhook URL: http://{}/webhook", bind_address);
    info!("Working directory: {}", config.working_dir.display());
    info!("Deploy directory: {}", config.deploy_dir.display());
    if reporter.is_enabled() {
        info!("GitHub status reporting enabled ({})", config.status_context);
    }
    if !config.needs_webhook_secret() {
        warn!("WEBHOOK_SECRET not set; deliveries are accepted without signature checks");
    }

    let state = Arc::new(AppState::new(config, Arc::new(reporter)));
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", bind_address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
