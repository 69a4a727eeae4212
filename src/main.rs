use std::sync::Arc;

use anyhow::Result;

use autolabel_node::api;
use autolabel_node::config::Config;
use autolabel_node::jobs::AnnotationManager;
use autolabel_node::metrics;
use autolabel_node::queue::JobQueue;
use autolabel_node::store::SledStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with filters
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting auto-annotation service...");

    // Initialize metrics
    metrics::init_metrics();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        backend = ?config.detector_config.backend,
        model = %config.detector_config.model_path.display(),
        "Detector configured"
    );

    // Task and annotation storage
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store = SledStore::open(&config.data_dir.join("store"))?;

    // Job queue and lifecycle manager
    let queue = JobQueue::new(&config.queue_config);
    let manager = Arc::new(AnnotationManager::new(
        queue,
        store.clone(),
        store,
        config.detector_config.clone(),
    ));

    // HTTP surface
    let app = api::router(manager);
    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Annotation service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
