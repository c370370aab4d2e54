use relay_core::FeedSink;
use std::thread::JoinHandle;

/// Publishes a fixed list of messages into a [`FeedSink`] from a dedicated OS
/// thread, the way the MQTT feed does.
pub struct MockFeed {
    thread: JoinHandle<usize>,
}

impl MockFeed {
    pub fn publish(sink: FeedSink, messages: Vec<(String, Vec<u8>)>) -> Self {
        let thread = std::thread::spawn(move || {
            messages
                .into_iter()
                .filter(|(topic, payload)| sink.on_message(topic, payload.clone()))
                .count()
        });
        MockFeed { thread }
    }

    /// Wait for the feed thread; returns how many messages the sink accepted.
    pub fn join(self) -> usize {
        self.thread.join().expect("mock feed thread panicked")
    }
}
