//! Fan-out core of the telemetry relay: the connection registry, the
//! broadcast bridge between the feed thread and the clients, and the
//! connection lifecycle handler.

pub mod models;
pub mod util;
pub mod workers;

pub use models::FeedMessage;
pub use workers::{
    BroadcastReport, Broadcaster, ClientConnector, Connection, ConnectionId, ConnectionRegistry,
    ConnectionState, FeedSink, Outbox, SendError, bridge,
};
