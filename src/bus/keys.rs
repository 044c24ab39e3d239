//! Bus Naming Conventions
//!
//! Queue and topic names shared by every process. The front-end and the
//! engine must agree on these exactly; they are part of the wire contract.

use uuid::Uuid;

/// Command queue: front-end producers, single engine consumer.
pub const COMMAND_QUEUE: &str = "messages";

/// Persistence queue: engine producer, db-processor consumer.
pub const PERSISTENCE_QUEUE: &str = "db_processor";

/// Stream topic: engine publisher, ws relay subscriber(s).
pub const STREAM_TOPIC: &str = "ws-messages";

/// A fresh reply topic name for one request/reply exchange. The caller
/// subscribes to it before enqueueing the command that names it.
pub fn reply_channel() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        assert_eq!(COMMAND_QUEUE, "messages");
        assert_eq!(PERSISTENCE_QUEUE, "db_processor");
        assert_eq!(STREAM_TOPIC, "ws-messages");
    }

    #[test]
    fn test_reply_channels_are_unique() {
        assert_ne!(reply_channel(), reply_channel());
    }
}
