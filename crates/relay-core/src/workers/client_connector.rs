use super::client::{Connection, ConnectionState, Outbox};
use super::registry::ConnectionRegistry;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Registers client connections as they open and deregisters them when they
/// close or fail. Transport agnostic: the websocket session calls into it.
#[derive(Debug, Clone)]
pub struct ClientConnector {
    registry: Arc<ConnectionRegistry>,
    queue_depth: usize,
}

impl ClientConnector {
    pub fn new(registry: Arc<ConnectionRegistry>, queue_depth: usize) -> Self {
        ClientConnector {
            registry,
            queue_depth,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Wrap a newly accepted client and make it eligible for broadcasts.
    pub fn on_connect_opened(&self, peer: Option<SocketAddr>) -> (Arc<Connection>, Outbox) {
        let (conn, outbox) = self.registry.open(peer, self.queue_depth);
        self.registry.add(&conn);
        info!(
            conn_id = %conn.id(),
            peer = ?peer,
            clients = self.registry.len(),
            "client connected"
        );
        (conn, outbox)
    }

    /// The client closed the connection. Returns `false` if it was already
    /// deregistered.
    pub fn on_connect_closed(&self, conn: &Connection) -> bool {
        conn.transition(ConnectionState::Closing);
        let removed = self.registry.remove(conn);
        if removed {
            info!(
                conn_id = %conn.id(),
                peer = ?conn.peer(),
                clients = self.registry.len(),
                "client disconnected"
            );
        }
        removed
    }

    /// A write to the client failed. Returns `false` if it was already
    /// deregistered.
    pub fn on_send_failure(&self, conn: &Connection, reason: impl Display) -> bool {
        conn.transition(ConnectionState::Failed);
        let removed = self.registry.remove(conn);
        if removed {
            warn!(
                conn_id = %conn.id(),
                peer = ?conn.peer(),
                error = %reason,
                "send to client failed, deregistering"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedMessage;
    use crate::workers::bridge;

    fn connector() -> ClientConnector {
        ClientConnector::new(Arc::new(ConnectionRegistry::new()), 4)
    }

    #[test]
    fn opened_connection_is_registered() {
        let connector = connector();
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        let (conn, outbox) = connector.on_connect_opened(Some(peer));

        assert_eq!(conn.state(), ConnectionState::Registered);
        assert_eq!(conn.peer(), Some(peer));
        assert_eq!(outbox.id(), conn.id());
        assert!(connector.registry().contains(conn.id()));
    }

    #[test]
    fn repeated_close_has_the_effect_of_one() {
        let connector = connector();
        let (conn, _outbox) = connector.on_connect_opened(None);
        let (other, _other_outbox) = connector.on_connect_opened(None);

        assert!(connector.on_connect_closed(&conn));
        assert!(!connector.on_connect_closed(&conn));
        assert!(!connector.on_send_failure(&conn, "late write error"));

        assert_eq!(conn.state(), ConnectionState::Deregistered);
        assert_eq!(connector.registry().snapshot().ids(), vec![other.id()]);
    }

    #[test]
    fn send_failure_deregisters() {
        let connector = connector();
        let (conn, _outbox) = connector.on_connect_opened(None);

        assert!(connector.on_send_failure(&conn, "broken pipe"));

        assert!(connector.registry().is_empty());
        assert_eq!(conn.state(), ConnectionState::Deregistered);
        assert!(conn.try_send(&FeedMessage::new("t", "x")).is_err());
    }

    #[test]
    fn close_after_bridge_eviction_is_a_no_op() {
        let connector = connector();
        let (conn, outbox) = connector.on_connect_opened(None);
        let (_sink, broadcaster) = bridge(Arc::clone(connector.registry()), 4);
        drop(outbox);

        let report = broadcaster.broadcast(&FeedMessage::new("t", "x"));
        assert_eq!(report.evicted, vec![conn.id()]);

        assert!(!connector.on_connect_closed(&conn));
        assert_eq!(conn.state(), ConnectionState::Deregistered);
    }
}
