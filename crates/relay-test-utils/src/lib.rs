// relay-test-utils: shared helpers for the relay test suites.
//
// Provides a websocket client that plays a streaming browser and a feed that
// publishes from its own thread.

pub mod mock_feed;
pub mod mock_ws_client;

pub use mock_feed::MockFeed;
pub use mock_ws_client::MockWsClient;
