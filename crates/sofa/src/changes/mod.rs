//! The `_changes` feed: wire reader, feed sessions and the managed consumer

pub mod consumer;
pub mod listener;
pub mod reader;
pub mod session;

pub use consumer::ChangeConsumer;
pub use listener::{ChangeListener, FnListener, SubscriptionId};
pub use reader::ChangeStream;
pub use session::{ChangeFeed, ConnectionHandle, FeedSession};
