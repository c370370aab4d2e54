use crate::feed::FeedStatus;
use relay_core::ClientConnector;
use relay_core::workers::BridgeStats;
use std::sync::Arc;
use std::time::Duration;

/// Shared context handed to every HTTP and websocket handler. Built once at
/// startup.
#[derive(Clone)]
pub struct AppState {
    pub connector: ClientConnector,
    pub stats: Arc<BridgeStats>,
    pub feed: FeedStatus,
    pub send_timeout: Duration,
}

impl AppState {
    pub fn new(
        connector: ClientConnector,
        stats: Arc<BridgeStats>,
        feed: FeedStatus,
        send_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            stats,
            feed,
            send_timeout,
        }
    }

    pub fn client_count(&self) -> usize {
        self.connector.registry().len()
    }
}
