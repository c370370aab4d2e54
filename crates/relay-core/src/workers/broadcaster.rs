//! Bridge between the upstream feed and the connected clients.
//!
//! The feed runs on its own thread and only ever touches a [`FeedSink`],
//! which enqueues into a bounded channel. The [`Broadcaster`] task is the
//! sole consumer of that channel and the only code that sends to clients.

use super::client::{Connection, ConnectionId, ConnectionState, SendError};
use super::registry::ConnectionRegistry;
use crate::models::FeedMessage;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

/// Counters shared between the sink and the broadcaster.
#[derive(Debug, Default)]
pub struct BridgeStats {
    received: AtomicU64,
    dropped: AtomicU64,
    broadcast: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages handed to the sink by the feed.
    pub received: u64,
    /// Messages dropped because the ingest queue was full or the bridge stopped.
    pub dropped: u64,
    /// Messages the broadcaster has fanned out.
    pub broadcast: u64,
    /// Individual per-connection deliveries.
    pub delivered: u64,
    /// Connections removed after a failed send.
    pub evicted: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            broadcast: self.broadcast.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Feed-side entry point of the bridge. Safe to call from any thread.
#[derive(Debug, Clone)]
pub struct FeedSink {
    tx: mpsc::Sender<FeedMessage>,
    stats: Arc<BridgeStats>,
}

impl FeedSink {
    /// Hand one upstream message to the bridge without blocking.
    ///
    /// Returns `false` if the message was dropped.
    pub fn on_message(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(FeedMessage::new(topic, payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %msg.topic(), "bridge ingest queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(msg)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(topic = %msg.topic(), "bridge stopped, dropping message");
                false
            }
        }
    }
}

/// Outcome of a single broadcast pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Delivery side of the bridge.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    inbox: mpsc::Receiver<FeedMessage>,
    stats: Arc<BridgeStats>,
}

/// Create a connected sink/broadcaster pair. `capacity` bounds the number of
/// messages waiting between the feed and the broadcaster.
pub fn bridge(registry: Arc<ConnectionRegistry>, capacity: usize) -> (FeedSink, Broadcaster) {
    let (tx, inbox) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(BridgeStats::default());
    (
        FeedSink {
            tx,
            stats: Arc::clone(&stats),
        },
        Broadcaster {
            registry,
            inbox,
            stats,
        },
    )
}

impl Broadcaster {
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Deliver messages in arrival order until every sink has been dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.inbox.recv().await {
            self.broadcast(&msg);
        }
        info!("feed sinks closed, broadcaster stopping");
    }

    /// Offer `msg` to every connection in a fresh registry snapshot.
    ///
    /// Connections that cannot take the message are marked failed and
    /// deregistered once the pass is done.
    pub fn broadcast(&self, msg: &FeedMessage) -> BroadcastReport {
        let snapshot = self.registry.snapshot();
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for conn in snapshot.iter() {
            match conn.try_send(msg) {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    conn.transition(ConnectionState::Failed);
                    failed.push((Arc::clone(conn), reason));
                }
            }
        }

        report.evicted = self.evict(failed);

        self.stats.broadcast.fetch_add(1, Ordering::Relaxed);
        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .evicted
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        trace!(
            topic = %msg.topic(),
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "broadcast"
        );
        report
    }

    /// Deregister connections that failed during a pass. Returns the ids this
    /// call removed; a connection already deregistered elsewhere is skipped.
    fn evict(&self, failed: Vec<(Arc<Connection>, SendError)>) -> Vec<ConnectionId> {
        let mut evicted = Vec::with_capacity(failed.len());
        for (conn, reason) in failed {
            if !self.registry.remove(&conn) {
                continue;
            }
            match reason {
                SendError::Full => warn!(
                    conn_id = %conn.id(),
                    peer = ?conn.peer(),
                    "client not keeping up, evicting"
                ),
                SendError::Closed => info!(
                    conn_id = %conn.id(),
                    peer = ?conn.peer(),
                    "client gone, deregistering"
                ),
            }
            evicted.push(conn.id());
        }
        evicted
    }
}
