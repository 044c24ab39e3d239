//! Message Bus
//!
//! Redis-backed broker access for all four processes. Two primitives:
//!
//! - **Reliable queue**: `LPUSH` producers, one blocking `BRPOP` consumer.
//!   Used for the command queue (front-end → engine) and the persistence
//!   queue (engine → db-processor).
//! - **Topic fan-out**: `PUBLISH`/`SUBSCRIBE`. Used for the stream topic
//!   (engine → ws relay) and the per-request reply channels (engine →
//!   front-end). No persistence; absent subscribers miss messages.
//!
//! Blocking pops and subscriptions each get their own connection so they
//! never stall the shared command connection.

pub mod keys;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("subscription closed")]
    Closed,
}

/// Shared handle to the broker.
#[derive(Clone)]
pub struct MessageBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl MessageBus {
    /// Connect and verify the broker is reachable.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    /// Append a message to a reliable queue.
    pub async fn push(&self, queue: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, payload).await?;
        Ok(())
    }

    /// Publish a message to a topic. Returns the number of receivers.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BusError> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(topic, payload).await?;
        Ok(receivers)
    }

    /// Open a dedicated blocking consumer for a queue.
    pub async fn consumer(&self, queue: &str) -> Result<QueueConsumer, BusError> {
        let conn = ConnectionManager::new(self.client.clone()).await?;
        Ok(QueueConsumer {
            conn,
            queue: queue.to_string(),
        })
    }

    /// Subscribe to a topic on a dedicated connection.
    pub async fn subscriber(&self, topic: &str) -> Result<TopicSubscriber, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        Ok(TopicSubscriber { pubsub })
    }

    /// One request/reply exchange against a queue consumer: subscribe to
    /// `reply_channel`, enqueue the command, then await the reply with a
    /// bounded timeout. The subscription is established before the push so
    /// the reply cannot be lost to a race.
    pub async fn request(
        &self,
        queue: &str,
        reply_channel: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, BusError> {
        let mut subscriber = self.subscriber(reply_channel).await?;
        self.push(queue, payload).await?;

        match tokio::time::timeout(timeout, subscriber.next_message()).await {
            Ok(Ok(Some(reply))) => Ok(reply),
            Ok(Ok(None)) => Err(BusError::Closed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BusError::Timeout),
        }
    }
}

/// Single-queue blocking consumer.
pub struct QueueConsumer {
    conn: ConnectionManager,
    queue: String,
}

impl QueueConsumer {
    /// Block until the next message is available.
    pub async fn next(&mut self) -> Result<String, BusError> {
        let (_, payload): (String, String) = self.conn.brpop(&self.queue, 0.0).await?;
        Ok(payload)
    }
}

/// Single-topic subscriber.
pub struct TopicSubscriber {
    pubsub: redis::aio::PubSub,
}

impl TopicSubscriber {
    /// Await the next payload; `None` when the subscription ends.
    pub async fn next_message(&mut self) -> Result<Option<String>, BusError> {
        use futures::StreamExt;

        let mut stream = self.pubsub.on_message();
        match stream.next().await {
            Some(msg) => Ok(Some(msg.get_payload()?)),
            None => Ok(None),
        }
    }
}
