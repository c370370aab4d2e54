pub mod message;

pub type FeedMessage = message::FeedMessage;
