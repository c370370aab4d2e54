//! Upstream MQTT feed.
//!
//! The MQTT network loop runs on its own OS thread. Every inbound publish is
//! handed to the registered callback on that thread; the callback is expected
//! to hand the message off without blocking (see `relay_core::FeedSink`).
//!
//! # Reconnect
//! Any connection error is logged and followed by a fixed delay before the
//! next attempt. Attempts continue until shutdown. Subscriptions are
//! re-issued on every successful CONNACK, so nothing published while the
//! relay was disconnected is ever seen.

use crate::config::BrokerConfig;
use bytes::Bytes;
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Request queue depth of the MQTT client. Only subscribe and disconnect
/// requests go through it.
const CLIENT_REQUEST_CAPACITY: usize = 10;

/// Connection state of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Connected,
    Disconnected,
}

impl FeedState {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedState::Connecting => "connecting",
            FeedState::Connected => "connected",
            FeedState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to start feed thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("feed thread exited during startup")]
    Startup,
}

/// Observable handle to a running feed, shared with the HTTP layer.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    state: Arc<watch::Sender<FeedState>>,
    reconnect_attempts: Arc<AtomicU64>,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStatus {
    /// A status that reads `Connecting` until a feed session drives it.
    pub fn new() -> Self {
        let (state, _) = watch::channel(FeedState::Connecting);
        FeedStatus {
            state: Arc::new(state),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Number of reconnect attempts made after a connection error.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    fn set(&self, next: FeedState) {
        self.state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }
}

/// A running feed. Dropping it stops the loop at its next network event
/// without waiting for the thread; [`FeedSession::shutdown`] waits.
pub struct FeedSession {
    status: FeedStatus,
    client: Client,
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl FeedSession {
    /// Start the feed thread. `on_message` is called once per inbound
    /// publish, on the feed thread.
    pub fn connect<F>(
        cfg: BrokerConfig,
        status: FeedStatus,
        on_message: F,
    ) -> Result<FeedSession, FeedError>
    where
        F: FnMut(&str, Bytes) + Send + 'static,
    {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (client_tx, client_rx) = std_mpsc::sync_channel(1);

        let thread = {
            let status = status.clone();
            std::thread::Builder::new()
                .name("mqtt-feed".to_owned())
                .spawn(move || run_feed(cfg, status, on_message, client_tx, stop_rx))?
        };
        let client = client_rx.recv().map_err(|_| FeedError::Startup)?;

        Ok(FeedSession {
            status,
            client,
            stop_tx,
            thread,
        })
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    /// Stop the network loop and wait for the feed thread to exit.
    pub fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "feed disconnect request not queued");
        }
        drop(self.client);
        if self.thread.join().is_err() {
            warn!("feed thread panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Feed thread
// ---------------------------------------------------------------------------

fn run_feed<F>(
    cfg: BrokerConfig,
    status: FeedStatus,
    mut on_message: F,
    client_tx: std_mpsc::SyncSender<Client>,
    stop_rx: std_mpsc::Receiver<()>,
) where
    F: FnMut(&str, Bytes),
{
    let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    options.set_keep_alive(cfg.keep_alive);
    options.set_clean_session(true);
    let (client, mut connection) = Client::new(options, CLIENT_REQUEST_CAPACITY);
    if client_tx.send(client.clone()).is_err() {
        return;
    }

    info!(host = %cfg.host, port = cfg.port, topic = %cfg.topic, "connecting to MQTT broker");
    status.set(FeedState::Connecting);

    for notification in connection.iter() {
        if stop_requested(&stop_rx) {
            break;
        }
        match notification {
            // A rejected CONNACK surfaces as `ConnectionError::ConnectionRefused`.
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(host = %cfg.host, port = cfg.port, "connected to MQTT broker");
                status.set(FeedState::Connected);
                if let Err(e) = client.try_subscribe(cfg.topic.as_str(), QoS::AtMostOnce) {
                    warn!(topic = %cfg.topic, error = %e, "failed to queue subscription");
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!(topic = %cfg.topic, "subscribed");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(topic = %publish.topic, bytes = publish.payload.len(), "feed message");
                on_message(&publish.topic, publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                status.set(FeedState::Disconnected);
                if let ConnectionError::ConnectionRefused(code) = &e {
                    warn!(code = ?code, "MQTT broker rejected connection");
                }
                warn!(
                    host = %cfg.host,
                    port = cfg.port,
                    error = %e,
                    retry_in_secs = cfg.retry_delay.as_secs(),
                    "MQTT connection error, retrying"
                );
                match stop_rx.recv_timeout(cfg.retry_delay) {
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                status.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                status.set(FeedState::Connecting);
            }
        }
    }

    status.set(FeedState::Disconnected);
    info!("feed stopped");
}

fn stop_requested(stop_rx: &std_mpsc::Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(std_mpsc::TryRecvError::Empty))
}
