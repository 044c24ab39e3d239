//! Market Registry
//!
//! Owns one [`Orderbook`] per configured market and turns decoded commands
//! into a reply plus the downstream events the match produced. The registry
//! performs all validation that must happen before an order reaches a book.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::orderbook::Orderbook;
use super::types::{MatchResult, MatchingError};
use crate::protocol::{
    ApiResponse, CancelOrderResponse, CommandMessage, CreateOrderResponse, GetDepthResponse,
    GetOpenOrdersResponse, OrderUpdate, OrderView, PersistenceEvent, Side, StreamMessage,
    TradeAdded,
};

/// Everything one command produces. The engine loop publishes the
/// persistence events, then the stream events, then the reply, before it
/// dequeues the next command.
#[derive(Debug)]
pub struct CommandOutcome {
    pub reply: serde_json::Value,
    pub persistence: Vec<PersistenceEvent>,
    pub streams: Vec<StreamMessage>,
}

impl CommandOutcome {
    fn reply_only<T: Serialize>(reply: ApiResponse<T>) -> Self {
        Self {
            reply: to_reply_value(reply),
            persistence: Vec::new(),
            streams: Vec::new(),
        }
    }
}

fn to_reply_value<T: Serialize>(reply: ApiResponse<T>) -> serde_json::Value {
    serde_json::to_value(reply).unwrap_or(serde_json::Value::Null)
}

/// The engine's books, one independent book per market. There is no
/// cross-market coordination.
pub struct MarketRegistry {
    books: HashMap<String, Orderbook>,
}

impl MarketRegistry {
    pub fn new<I>(markets: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let books = markets
            .into_iter()
            .map(|market| (market.clone(), Orderbook::new(market)))
            .collect();
        Self { books }
    }

    pub fn markets(&self) -> Vec<&str> {
        self.books.keys().map(String::as_str).collect()
    }

    /// Dispatch one decoded command for `user_id`.
    pub fn handle(&mut self, user_id: Uuid, command: CommandMessage) -> CommandOutcome {
        match command {
            CommandMessage::CreateOrder(data) => {
                if data.price <= Decimal::ZERO {
                    return CommandOutcome::reply_only(ApiResponse::<CreateOrderResponse>::error(
                        MatchingError::InvalidPrice(data.price.to_string()).to_string(),
                    ));
                }
                if data.quantity <= Decimal::ZERO {
                    return CommandOutcome::reply_only(ApiResponse::<CreateOrderResponse>::error(
                        MatchingError::InvalidQuantity(data.quantity.to_string()).to_string(),
                    ));
                }
                let Some(book) = self.books.get_mut(&data.market) else {
                    return Self::market_not_found::<CreateOrderResponse>(&data.market);
                };

                let result = book.add_order(user_id, data.side, data.price, data.quantity);
                debug!(
                    market = %data.market,
                    order_id = %result.order_id,
                    fills = result.fills.len(),
                    "order admitted"
                );
                Self::order_outcome(&data.market, data.side, result)
            }

            CommandMessage::CancelOrder(data) => {
                let Some(book) = self.books.get_mut(&data.market) else {
                    return Self::market_not_found::<CancelOrderResponse>(&data.market);
                };

                let reply = match book.cancel_order(data.order_id, user_id) {
                    Ok(()) => ApiResponse::ok(CancelOrderResponse {
                        order_id: data.order_id,
                        success: true,
                    }),
                    Err(e) => ApiResponse {
                        success: false,
                        message: Some(e.to_string()),
                        data: Some(CancelOrderResponse {
                            order_id: data.order_id,
                            success: false,
                        }),
                    },
                };
                CommandOutcome::reply_only(reply)
            }

            CommandMessage::GetDepth(data) => {
                let Some(book) = self.books.get(&data.market) else {
                    return Self::market_not_found::<GetDepthResponse>(&data.market);
                };
                CommandOutcome::reply_only(ApiResponse::ok(GetDepthResponse {
                    depth: book.depth(data.limit),
                }))
            }

            CommandMessage::GetOpenOrders(data) => {
                let Some(book) = self.books.get(&data.market) else {
                    return Self::market_not_found::<GetOpenOrdersResponse>(&data.market);
                };
                CommandOutcome::reply_only(ApiResponse::ok(GetOpenOrdersResponse {
                    orders: book.open_orders(user_id),
                }))
            }
        }
    }

    fn market_not_found<T: Serialize>(market: &str) -> CommandOutcome {
        CommandOutcome::reply_only(ApiResponse::<T>::error(
            MatchingError::MarketNotFound(market.to_string()).to_string(),
        ))
    }

    /// Build the reply and the downstream events for an admitted order.
    fn order_outcome(market: &str, taker_side: Side, result: MatchResult) -> CommandOutcome {
        let mut persistence = Vec::new();
        let mut streams = Vec::new();

        for fill in &result.fills {
            // A selling taker means the buyer was the resting maker.
            persistence.push(PersistenceEvent::TradeAdded(TradeAdded {
                id: Uuid::new_v4(),
                is_buyer_maker: taker_side == Side::Sell,
                price: fill.price,
                quantity: fill.qty,
                quote_quantity: fill.price * fill.qty,
                timestamp: fill.timestamp,
                market: market.to_string(),
            }));
            streams.push(StreamMessage::trade(market, fill));
        }

        if !result.fills.is_empty() {
            persistence.push(Self::order_update(market, &result.taker));
            for maker in &result.makers {
                persistence.push(Self::order_update(market, maker));
            }
        }

        CommandOutcome {
            reply: to_reply_value(ApiResponse::ok(CreateOrderResponse {
                order_id: result.order_id,
                fills: result.fills,
            })),
            persistence,
            streams,
        }
    }

    fn order_update(market: &str, order: &OrderView) -> PersistenceEvent {
        PersistenceEvent::OrderUpdate(OrderUpdate {
            order_id: order.id,
            executed_qty: order.filled,
            market: market.to_string(),
            price: order.price,
            quantity: order.quantity,
            side: order.side,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CancelOrderData, CreateOrderData, GetDepthData, GetOpenOrdersData};
    use rust_decimal_macros::dec;

    fn registry() -> MarketRegistry {
        MarketRegistry::new(["SOL_USDC".to_string()])
    }

    fn create(market: &str, side: Side, price: Decimal, quantity: Decimal) -> CommandMessage {
        CommandMessage::CreateOrder(CreateOrderData {
            market: market.to_string(),
            side,
            price,
            quantity,
        })
    }

    #[test]
    fn test_create_order_reply_carries_fills() {
        let mut registry = registry();
        let (maker, taker) = (Uuid::new_v4(), Uuid::new_v4());

        registry.handle(maker, create("SOL_USDC", Side::Sell, dec!(100), dec!(5)));
        let outcome = registry.handle(taker, create("SOL_USDC", Side::Buy, dec!(100), dec!(5)));

        assert_eq!(outcome.reply["success"], true);
        let fills = outcome.reply["data"]["fills"].as_array().unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0]["qty"], "5");
        assert_eq!(fills[0]["price"], "100");
    }

    #[test]
    fn test_create_order_emits_trade_and_order_updates() {
        let mut registry = registry();
        let (maker, taker) = (Uuid::new_v4(), Uuid::new_v4());

        registry.handle(maker, create("SOL_USDC", Side::Sell, dec!(100), dec!(5)));
        let outcome = registry.handle(taker, create("SOL_USDC", Side::Buy, dec!(100), dec!(2)));

        // One trade, one taker update, one maker update.
        assert_eq!(outcome.persistence.len(), 3);
        match &outcome.persistence[0] {
            PersistenceEvent::TradeAdded(trade) => {
                assert_eq!(trade.market, "SOL_USDC");
                assert_eq!(trade.quantity, dec!(2));
                assert_eq!(trade.quote_quantity, dec!(200));
                // Buying taker: the seller rested first, so the buyer did not make.
                assert!(!trade.is_buyer_maker);
            }
            other => panic!("expected trade, got {:?}", other),
        }
        let updates: Vec<&OrderUpdate> = outcome
            .persistence
            .iter()
            .filter_map(|e| match e {
                PersistenceEvent::OrderUpdate(u) => Some(u),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.executed_qty == dec!(2)));

        assert_eq!(outcome.streams.len(), 1);
        assert_eq!(outcome.streams[0].stream, "trades@SOL_USDC");
    }

    #[test]
    fn test_is_buyer_maker_derived_from_taker_side() {
        let mut registry = registry();
        let (maker, taker) = (Uuid::new_v4(), Uuid::new_v4());

        registry.handle(maker, create("SOL_USDC", Side::Buy, dec!(100), dec!(5)));
        let outcome = registry.handle(taker, create("SOL_USDC", Side::Sell, dec!(100), dec!(5)));

        match &outcome.persistence[0] {
            PersistenceEvent::TradeAdded(trade) => assert!(trade.is_buyer_maker),
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_resting_order_produces_no_events() {
        let mut registry = registry();
        let outcome = registry.handle(
            Uuid::new_v4(),
            create("SOL_USDC", Side::Buy, dec!(100), dec!(5)),
        );

        assert_eq!(outcome.reply["success"], true);
        assert!(outcome.persistence.is_empty());
        assert!(outcome.streams.is_empty());
    }

    #[test]
    fn test_rejects_non_positive_price_and_quantity() {
        let mut registry = registry();
        let user = Uuid::new_v4();

        let outcome = registry.handle(user, create("SOL_USDC", Side::Buy, dec!(0), dec!(5)));
        assert_eq!(outcome.reply["success"], false);

        let outcome = registry.handle(user, create("SOL_USDC", Side::Buy, dec!(100), dec!(-1)));
        assert_eq!(outcome.reply["success"], false);

        // Nothing reached the book.
        let depth = registry.handle(
            user,
            CommandMessage::GetDepth(GetDepthData {
                market: "SOL_USDC".to_string(),
                limit: 10,
            }),
        );
        assert!(depth.reply["data"]["depth"]["bids"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_market_is_rejected() {
        let mut registry = registry();
        let outcome = registry.handle(
            Uuid::new_v4(),
            create("DOGE_USDC", Side::Buy, dec!(1), dec!(1)),
        );
        assert_eq!(outcome.reply["success"], false);
        assert!(outcome.reply["message"]
            .as_str()
            .unwrap()
            .contains("market not found"));
    }

    #[test]
    fn test_cancel_not_found_reports_failure() {
        let mut registry = registry();
        let outcome = registry.handle(
            Uuid::new_v4(),
            CommandMessage::CancelOrder(CancelOrderData {
                market: "SOL_USDC".to_string(),
                order_id: Uuid::new_v4(),
            }),
        );

        assert_eq!(outcome.reply["success"], false);
        assert_eq!(outcome.reply["data"]["success"], false);
    }

    #[test]
    fn test_cancel_round_trip() {
        let mut registry = registry();
        let user = Uuid::new_v4();

        let created = registry.handle(user, create("SOL_USDC", Side::Buy, dec!(100), dec!(5)));
        let order_id: Uuid =
            serde_json::from_value(created.reply["data"]["order_id"].clone()).unwrap();

        let outcome = registry.handle(
            user,
            CommandMessage::CancelOrder(CancelOrderData {
                market: "SOL_USDC".to_string(),
                order_id,
            }),
        );
        assert_eq!(outcome.reply["success"], true);
        assert_eq!(outcome.reply["data"]["success"], true);
    }

    #[test]
    fn test_open_orders_query() {
        let mut registry = registry();
        let user = Uuid::new_v4();

        registry.handle(user, create("SOL_USDC", Side::Buy, dec!(99), dec!(2)));
        registry.handle(Uuid::new_v4(), create("SOL_USDC", Side::Sell, dec!(105), dec!(1)));

        let outcome = registry.handle(
            user,
            CommandMessage::GetOpenOrders(GetOpenOrdersData {
                market: "SOL_USDC".to_string(),
            }),
        );
        let orders = outcome.reply["data"]["orders"].as_array().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0]["price"], "99");
    }
}
