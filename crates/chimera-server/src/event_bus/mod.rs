// Event Bus
//
// In-memory publish/subscribe core shared by every module.
// Published events are kept in a bounded log, fanned out to subscriber
// callbacks, and can be read back by cursor.

pub mod feed;
pub mod publisher;
pub mod store;
pub mod subscriber;

pub use feed::EventFeed;
pub use publisher::{EventBus, DEFAULT_LOG_CAPACITY};
pub use store::EventLog;
pub use subscriber::{from_fn, BlockingSubscriber, FnSubscriber, Subscriber};
