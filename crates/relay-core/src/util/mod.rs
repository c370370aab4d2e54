use tokio::signal;
use tracing::warn;

/// Resolves on ctrl-c.
pub async fn signal_handler() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
