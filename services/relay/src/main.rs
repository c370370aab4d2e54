use relay::RelayConfig;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Filter used when the configuration could not be loaded.
const FALLBACK_LOG_LEVEL: &str = "info";

#[tokio::main]
async fn main() -> ExitCode {
    // `LOG_LEVEL` comes from the loaded config; blank means `info`.
    let cfg = RelayConfig::from_env();
    let log_level = cfg
        .as_ref()
        .map_or(FALLBACK_LOG_LEVEL, |cfg| cfg.log_level.as_str());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "relay starting");

    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match relay::run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay stopped");
            ExitCode::FAILURE
        }
    }
}
