use bytes::Bytes;
use std::sync::Arc;

/// A single message received from the upstream feed.
///
/// Both the topic and the payload are reference counted, so cloning a message
/// for every connection in a broadcast does not copy the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    topic: Arc<str>,
    payload: Bytes,
}

impl FeedMessage {
    pub fn new(topic: impl Into<Arc<str>>, payload: impl Into<Bytes>) -> Self {
        FeedMessage {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The raw payload, exactly as published upstream.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The payload as text, if it is valid UTF-8. The payload is never parsed
    /// beyond this check.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
