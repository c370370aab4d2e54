use crate::models::FeedMessage;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

/// Identity of a connection, unique for the lifetime of its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        ConnectionId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a single client connection.
///
/// `Opening -> Registered -> (Closing | Failed) -> Deregistered`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Registered,
    Closing,
    Failed,
    Deregistered,
}

impl ConnectionState {
    /// Only registered connections take new messages.
    pub fn accepts_sends(self) -> bool {
        self == ConnectionState::Registered
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Deregistered
    }

    fn can_become(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Opening, Registered)
                | (Opening | Registered, Closing)
                | (Opening | Registered, Failed)
                | (Closing | Failed, Deregistered)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Opening => "opening",
            ConnectionState::Registered => "registered",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
            ConnectionState::Deregistered => "deregistered",
        };
        f.write_str(name)
    }
}

/// Why a message could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection's outbound queue is full; the client is not keeping up.
    #[error("outbound queue full")]
    Full,
    /// The connection is no longer registered or its writer has gone away.
    #[error("connection closed")]
    Closed,
}

/// Handle to one live client stream.
///
/// Sending never blocks: messages go into a bounded queue that the
/// connection's writer drains into the transport.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<FeedMessage>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    pub(crate) fn open(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        queue_depth: usize,
    ) -> (Connection, Outbox) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (state, _) = watch::channel(ConnectionState::Opening);
        (
            Connection {
                id,
                peer,
                tx,
                state,
            },
            Outbox { id, rx },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue a message for this connection without waiting.
    pub fn try_send(&self, msg: &FeedMessage) -> Result<(), SendError> {
        if !self.state().accepts_sends() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(msg.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Move to `next` if the lifecycle allows it. Returns whether the state
    /// changed.
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_become(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the connection has been deregistered, by whoever removed
    /// it.
    pub async fn deregistered(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }
}

/// Receiving half of a connection's outbound queue, owned by its writer.
#[derive(Debug)]
pub struct Outbox {
    id: ConnectionId,
    rx: mpsc::Receiver<FeedMessage>,
}

impl Outbox {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next queued message, or `None` once the connection handle is gone.
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FeedMessage> {
        self.rx.try_recv().ok()
    }
}
