//! Process supervisor: configuration, pool, listener, graceful shutdown.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use eisfit_server::config;
use eisfit_server::fit::EisProcessor;
use eisfit_server::http::{self, ServiceState};
use eisfit_server::pool::WorkerPool;
use eisfit_server::timing::TimingSink;
use eisfit_server::webhook::{WebhookClient, WebhookSink};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let (fit, server) = config::from_env();
    info!(
        circuit = %fit.circuit_code,
        method = %fit.method,
        workers = server.workers,
        webhook = %server.webhook_url,
        "starting eisfit server"
    );

    // The blocking webhook client lives on the sender thread; build it
    // (and the pool) before entering the async runtime.
    let webhook_client: Arc<dyn WebhookSink> = Arc::new(WebhookClient::new(&server.webhook_url)?);
    let pool = Arc::new(WorkerPool::new(server.workers, Arc::new(EisProcessor), webhook_client));
    let state = ServiceState {
        fit: Arc::new(fit),
        pool: Arc::clone(&pool),
        timing: Arc::new(TimingSink::new(&server.timing_path)),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(serve(state, server.port))?;

    // Listener closed; no new work can arrive. Drain the pool.
    pool.shutdown();
    info!("server stopped");
    Ok(())
}

async fn serve(state: ServiceState, port: u16) -> Result<(), std::io::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    info!("endpoints: POST /eis-data, POST /eis-data/batch, GET /health");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
