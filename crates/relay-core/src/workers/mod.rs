mod broadcaster;
mod client;
mod client_connector;
mod registry;

pub use broadcaster::{BridgeStats, BroadcastReport, Broadcaster, FeedSink, StatsSnapshot, bridge};
pub use client::{Connection, ConnectionId, ConnectionState, Outbox, SendError};
pub use client_connector::ClientConnector;
pub use registry::{ConnectionRegistry, Snapshot};
