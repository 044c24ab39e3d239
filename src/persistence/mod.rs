//! Persistence Worker
//!
//! Consumes the persistence queue and writes each event into the right
//! table. The worker is the authoritative writer for orders and trades.
//!
//! Idempotence: trades and orders carry unique ids, so re-delivery after a
//! crash lands on a conflict that is treated as success. Write failures are
//! logged and the worker moves on; delivery is at-least-once and the trade
//! is already committed to the book.

use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::bus::{keys, MessageBus};
use crate::protocol::{OrderUpdate, PersistenceEvent, TradeAdded};

pub struct PersistenceWorker {
    pool: PgPool,
    bus: MessageBus,
}

impl PersistenceWorker {
    pub fn new(pool: PgPool, bus: MessageBus) -> Self {
        Self { pool, bus }
    }

    /// Drain the persistence queue forever.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut events = self.bus.consumer(keys::PERSISTENCE_QUEUE).await?;
        info!("persistence worker started, waiting for events");

        loop {
            let raw = match events.next().await {
                Ok(raw) => raw,
                Err(e) => {
                    error!("error popping from persistence queue: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            let event: PersistenceEvent = match serde_json::from_str(&raw) {
                Ok(event) => event,
                Err(e) => {
                    error!("could not parse persistence event: {}", e);
                    continue;
                }
            };

            match event {
                PersistenceEvent::TradeAdded(trade) => {
                    if let Err(e) = self.insert_trade(&trade).await {
                        error!(trade_id = %trade.id, "failed to persist trade: {}", e);
                    }
                }
                PersistenceEvent::OrderUpdate(order) => {
                    if let Err(e) = self.upsert_order(&order).await {
                        error!(order_id = %order.order_id, "failed to persist order: {}", e);
                    }
                }
            }
        }
    }

    async fn insert_trade(&self, trade: &TradeAdded) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, market, is_buyer_maker, price, quantity, quote_quantity, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, to_timestamp($7::double precision / 1000))
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(&trade.market)
        .bind(trade.is_buyer_maker)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.quote_quantity)
        .bind(trade.timestamp as f64)
        .execute(&self.pool)
        .await?;

        debug!(trade_id = %trade.id, market = %trade.market, "persisted trade");
        Ok(())
    }

    async fn upsert_order(&self, order: &OrderUpdate) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, market, price, quantity, side, executed_qty)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                executed_qty = EXCLUDED.executed_qty
            "#,
        )
        .bind(order.order_id)
        .bind(&order.market)
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.side.to_string())
        .bind(order.executed_qty)
        .execute(&self.pool)
        .await?;

        debug!(order_id = %order.order_id, "persisted order update");
        Ok(())
    }
}
