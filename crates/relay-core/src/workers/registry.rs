use super::client::{Connection, ConnectionId, ConnectionState, Outbox};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Members = Arc<Vec<Arc<Connection>>>;

/// The set of live client connections.
///
/// Membership is a copy-on-write list behind one mutex. `add`, `remove` and
/// `snapshot` each hold the mutex only for the instant of the operation, so a
/// snapshot is never torn and iterating it never blocks membership changes.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: Mutex<Members>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection and its outbound queue. The connection is not a
    /// member until it is passed to [`ConnectionRegistry::add`].
    pub fn open(&self, peer: Option<SocketAddr>, queue_depth: usize) -> (Arc<Connection>, Outbox) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (conn, outbox) = Connection::open(id, peer, queue_depth);
        (Arc::new(conn), outbox)
    }

    /// Register a connection for subsequent broadcasts.
    ///
    /// Returns `false` if it is already a member or has already been closed.
    pub fn add(&self, conn: &Arc<Connection>) -> bool {
        let mut members = self.lock();
        if members.iter().any(|member| member.id() == conn.id()) {
            return false;
        }
        if !conn.transition(ConnectionState::Registered) {
            return false;
        }
        Arc::make_mut(&mut members).push(Arc::clone(conn));
        true
    }

    /// Deregister a connection. Removing a connection that is not a member is
    /// a no-op and returns `false`.
    pub fn remove(&self, conn: &Connection) -> bool {
        let removed = {
            let mut members = self.lock();
            match members.iter().position(|member| member.id() == conn.id()) {
                Some(pos) => {
                    Arc::make_mut(&mut members).remove(pos);
                    true
                }
                None => false,
            }
        };
        conn.transition(ConnectionState::Closing);
        conn.transition(ConnectionState::Deregistered);
        removed
    }

    /// Point-in-time copy of the current members.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(Arc::clone(&self.lock()))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().iter().any(|member| member.id() == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Immutable view of the registry members at the moment it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot(Members);

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.0.iter()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.0.iter().map(|conn| conn.id()).collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.0.iter().any(|conn| conn.id() == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_assigns_unique_ids() {
        let registry = ConnectionRegistry::new();
        let (a, _) = registry.open(None, 1);
        let (b, _) = registry.open(None, 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), ConnectionState::Opening);
        assert!(registry.is_empty(), "open alone does not register");
    }

    #[test]
    fn add_registers_once() {
        let registry = ConnectionRegistry::new();
        let (conn, _outbox) = registry.open(None, 1);

        assert!(registry.add(&conn));
        assert!(!registry.add(&conn), "second add is a no-op");
        assert_eq!(registry.len(), 1);
        assert_eq!(conn.state(), ConnectionState::Registered);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _outbox) = registry.open(None, 1);
        let (other, _other_outbox) = registry.open(None, 1);
        registry.add(&conn);
        registry.add(&other);

        assert!(registry.remove(&conn));
        assert!(!registry.remove(&conn));
        assert!(!registry.remove(&conn));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(other.id()));
        assert_eq!(conn.state(), ConnectionState::Deregistered);
    }

    #[test]
    fn deregistered_connection_cannot_be_added_again() {
        let registry = ConnectionRegistry::new();
        let (conn, _outbox) = registry.open(None, 1);
        registry.add(&conn);
        registry.remove(&conn);

        assert!(!registry.add(&conn));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_not_affected_by_later_changes() {
        let registry = ConnectionRegistry::new();
        let (a, _a) = registry.open(None, 1);
        let (b, _b) = registry.open(None, 1);
        registry.add(&a);

        let before = registry.snapshot();
        registry.add(&b);
        registry.remove(&a);
        let after = registry.snapshot();

        assert_eq!(before.ids(), vec![a.id()]);
        assert_eq!(after.ids(), vec![b.id()]);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..5).map(|_| registry.open(None, 1)).collect();
        for (conn, _) in &conns {
            registry.add(conn);
        }
        let expected: Vec<_> = conns.iter().map(|(conn, _)| conn.id()).collect();
        assert_eq!(registry.snapshot().ids(), expected);
    }

    #[test]
    fn concurrent_membership_changes_are_visible_to_later_snapshots() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (stable, _stable_outbox) = registry.open(None, 1);
        registry.add(&stable);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let stable_id = stable.id();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (conn, _outbox) = registry.open(None, 1);
                        registry.add(&conn);
                        let snap = registry.snapshot();
                        assert!(snap.contains(conn.id()), "added before snapshot");
                        assert!(snap.contains(stable_id));

                        registry.remove(&conn);
                        let snap = registry.snapshot();
                        assert!(!snap.contains(conn.id()), "removed before snapshot");
                        assert!(snap.contains(stable_id));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert_eq!(registry.snapshot().ids(), vec![stable.id()]);
    }
}
