//! Engine Loop
//!
//! Single-consumer service: blocking dequeue from the command queue, one
//! command at a time, dispatched to the addressed market's book. All
//! downstream publishes for a command happen before the next dequeue, so no
//! fill is observable out of order.

use tracing::{debug, error, info, warn};

use super::registry::{CommandOutcome, MarketRegistry};
use crate::bus::{keys, MessageBus};
use crate::protocol::{ApiResponse, CommandEnvelope, DecodeError};

pub struct EngineService {
    registry: MarketRegistry,
    bus: MessageBus,
}

impl EngineService {
    pub fn new(registry: MarketRegistry, bus: MessageBus) -> Self {
        Self { registry, bus }
    }

    /// Drain the command queue forever. Broker errors on the dequeue are
    /// logged and retried; everything after a successful dequeue is
    /// non-blocking with respect to the book.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut commands = self.bus.consumer(keys::COMMAND_QUEUE).await?;
        info!(markets = ?self.registry.markets(), "matching engine started");

        loop {
            let raw = match commands.next().await {
                Ok(raw) => raw,
                Err(e) => {
                    error!("error popping from command queue: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };
            self.process(&raw).await;
        }
    }

    async fn process(&mut self, raw: &str) {
        // Malformed envelope: the reply channel is unknown, drop and log.
        let envelope: CommandEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("could not parse command envelope: {}", e);
                return;
            }
        };

        let command = match envelope.decode_message() {
            Ok(command) => command,
            Err(DecodeError::UnknownType(ty)) => {
                warn!(client_id = %envelope.client_id, "dropping unknown command type: {}", ty);
                return;
            }
            Err(DecodeError::Malformed(e)) => {
                // The reply channel is known, tell the caller.
                let reply = ApiResponse::<()>::error(format!("malformed command: {}", e));
                self.send_reply(&envelope.client_id, &serde_json::to_value(reply).unwrap_or_default())
                    .await;
                return;
            }
        };

        debug!(
            client_id = %envelope.client_id,
            user_id = %envelope.user_id,
            market = command.market(),
            "processing command"
        );
        let outcome = self.registry.handle(envelope.user_id, command);
        self.publish_outcome(&envelope.client_id, outcome).await;
    }

    /// Persistence events first (ordered queue), then the stream fan-out,
    /// then the caller's reply. Downstream failures are logged and do not
    /// block the loop; the match itself is already committed to the book.
    async fn publish_outcome(&self, client_id: &str, outcome: CommandOutcome) {
        for event in &outcome.persistence {
            match serde_json::to_string(event) {
                Ok(payload) => {
                    if let Err(e) = self.bus.push(keys::PERSISTENCE_QUEUE, &payload).await {
                        error!("failed to push to persistence queue: {}", e);
                    }
                }
                Err(e) => error!("failed to serialize persistence event: {}", e),
            }
        }

        for stream in &outcome.streams {
            match serde_json::to_string(stream) {
                Ok(payload) => {
                    if let Err(e) = self.bus.publish(keys::STREAM_TOPIC, &payload).await {
                        error!("failed to publish to stream topic: {}", e);
                    }
                }
                Err(e) => error!("failed to serialize stream event: {}", e),
            }
        }

        self.send_reply(client_id, &outcome.reply).await;
    }

    async fn send_reply(&self, client_id: &str, reply: &serde_json::Value) {
        match serde_json::to_string(reply) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(client_id, &payload).await {
                    error!(client_id, "failed to publish reply: {}", e);
                }
            }
            Err(e) => error!("failed to serialize reply: {}", e),
        }
    }
}
