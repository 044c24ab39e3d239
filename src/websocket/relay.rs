//! Relay Hub
//!
//! Fan-out with per-client backpressure. Each client gets a bounded send
//! buffer; a client whose buffer overflows is disconnected rather than being
//! allowed to slow the relay for everyone else.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{keys, MessageBus};

/// The set of connected clients and their send buffers.
pub struct RelayHub {
    clients: DashMap<Uuid, mpsc::Sender<String>>,
    buffer: usize,
}

impl RelayHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: DashMap::new(),
            buffer,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Register a new client, returning its id and the receive half of its
    /// send buffer.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.clients.insert(id, tx);
        info!(client = %id, clients = self.clients.len(), "websocket client connected");
        (id, rx)
    }

    pub fn unregister(&self, id: &Uuid) {
        if self.clients.remove(id).is_some() {
            info!(client = %id, clients = self.clients.len(), "websocket client disconnected");
        }
    }

    /// Forward a payload to every connected client. Clients whose buffers
    /// are full (or whose tasks are gone) are dropped.
    pub fn broadcast(&self, payload: &str) {
        let mut dropped = Vec::new();

        for entry in self.clients.iter() {
            match entry.value().try_send(payload.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = %entry.key(), "send buffer full, dropping slow client");
                    dropped.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(*entry.key());
                }
            }
        }

        for id in dropped {
            self.unregister(&id);
        }
    }
}

/// Serve one client connection until it closes or is dropped by the hub.
pub async fn handle_socket(socket: WebSocket, hub: std::sync::Arc<RelayHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = hub.register();

    loop {
        tokio::select! {
            // Outbound: drain this client's buffer. The hub closing the
            // channel (slow-client drop) ends the connection.
            payload = rx.recv() => {
                match payload {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Inbound: the relay is one-way; answer pings, ignore the rest.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(client = %id, "websocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    hub.unregister(&id);
}

/// Consume the stream topic and fan every payload out through the hub.
/// Subscription failures retry; the relay outlives broker hiccups.
pub async fn run_relay(bus: MessageBus, hub: std::sync::Arc<RelayHub>) {
    loop {
        let mut subscriber = match bus.subscriber(keys::STREAM_TOPIC).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!("could not subscribe to stream topic: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };
        info!(topic = keys::STREAM_TOPIC, "relay subscribed to stream topic");

        loop {
            match subscriber.next_message().await {
                Ok(Some(payload)) => hub.broadcast(&payload),
                Ok(None) => {
                    warn!("stream subscription ended, resubscribing");
                    break;
                }
                Err(e) => {
                    warn!("stream subscription error: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let hub = RelayHub::new(4);
        let (_id, mut rx) = hub.register();

        hub.broadcast("hello");
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped() {
        let hub = RelayHub::new(2);
        let (_id, _rx) = hub.register();

        // Fill the buffer without draining it; the third send overflows.
        hub.broadcast("one");
        hub.broadcast("two");
        assert_eq!(hub.client_count(), 1);
        hub.broadcast("three");
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_client_is_pruned() {
        let hub = RelayHub::new(4);
        let (_id, rx) = hub.register();
        drop(rx);

        hub.broadcast("anyone there?");
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let hub = RelayHub::new(4);
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.broadcast("fill");
        assert_eq!(rx_a.recv().await.unwrap(), "fill");
        assert_eq!(rx_b.recv().await.unwrap(), "fill");
    }
}
