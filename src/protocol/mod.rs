//! Wire Protocol
//!
//! Every message that crosses the bus is defined here: the command envelope
//! the front-end pushes onto the engine queue, the reply envelope the engine
//! publishes back, the persistence events consumed by the db-processor, and
//! the stream events fanned out to WebSocket clients.
//!
//! All decimals serialize as decimal strings; nothing on the wire ever
//! passes through binary floating point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Side
// ============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// ============================================================================
// Commands (front-end → engine queue)
// ============================================================================

/// Payload of a `CREATE_ORDER` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderData {
    pub market: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Payload of a `CANCEL_ORDER` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderData {
    pub market: String,
    pub order_id: Uuid,
}

/// Payload of a `GET_DEPTH` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDepthData {
    pub market: String,
    pub limit: usize,
}

/// Payload of a `GET_OPEN_ORDERS` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOpenOrdersData {
    pub market: String,
}

/// The inner command message, tagged the way the queue expects it:
/// `{ "type": "CREATE_ORDER", "data": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CommandMessage {
    #[serde(rename = "CREATE_ORDER")]
    CreateOrder(CreateOrderData),
    #[serde(rename = "CANCEL_ORDER")]
    CancelOrder(CancelOrderData),
    #[serde(rename = "GET_DEPTH")]
    GetDepth(GetDepthData),
    #[serde(rename = "GET_OPEN_ORDERS")]
    GetOpenOrders(GetOpenOrdersData),
}

impl CommandMessage {
    /// The market this command addresses.
    pub fn market(&self) -> &str {
        match self {
            CommandMessage::CreateOrder(d) => &d.market,
            CommandMessage::CancelOrder(d) => &d.market,
            CommandMessage::GetDepth(d) => &d.market,
            CommandMessage::GetOpenOrders(d) => &d.market,
        }
    }
}

/// Why an inner command message failed to decode.
///
/// The two cases have different dispositions in the engine loop: an unknown
/// type is logged and dropped, a malformed known command gets an error reply
/// on the caller's channel.
#[derive(Debug)]
pub enum DecodeError {
    UnknownType(String),
    Malformed(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownType(ty) => write!(f, "unknown command type: {}", ty),
            DecodeError::Malformed(e) => write!(f, "malformed command: {}", e),
        }
    }
}

/// Outer envelope placed on the command queue.
///
/// `client_id` names the reply topic the front-end subscribed to before
/// enqueueing. The engine trusts `user_id`; authentication happened at the
/// HTTP edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub client_id: String,
    pub user_id: Uuid,
    pub message: serde_json::Value,
}

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: String,
}

impl CommandEnvelope {
    pub fn new(client_id: String, user_id: Uuid, message: &CommandMessage) -> Self {
        Self {
            client_id,
            user_id,
            // CommandMessage serialization is infallible: plain structs, no
            // non-string map keys.
            message: serde_json::to_value(message).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Decode the inner message in two stages so the engine can tell an
    /// unknown command type apart from a malformed known one.
    pub fn decode_message(&self) -> Result<CommandMessage, DecodeError> {
        let probe: TypeProbe =
            serde_json::from_value(self.message.clone()).map_err(DecodeError::Malformed)?;

        match probe.kind.as_str() {
            "CREATE_ORDER" | "CANCEL_ORDER" | "GET_DEPTH" | "GET_OPEN_ORDERS" => {
                serde_json::from_value(self.message.clone()).map_err(DecodeError::Malformed)
            }
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

// ============================================================================
// Replies (engine → reply topic)
// ============================================================================

/// Reply envelope published on the caller's reply channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// A single matched execution between one taker and one maker.
///
/// The price is always the resting (maker) order's limit; `trade_id` is
/// strictly monotonic per market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub qty: Decimal,
    pub price: Decimal,
    pub trade_id: i64,
    pub maker_order_id: Uuid,
    pub maker_user_id: Uuid,
    pub taker_user_id: Uuid,
    pub timestamp: i64,
}

/// Response for `CREATE_ORDER`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub fills: Vec<Fill>,
}

/// Response for `CANCEL_ORDER`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub order_id: Uuid,
    pub success: bool,
}

/// One side of the depth snapshot: `[price, aggregate remaining quantity]`.
pub type DepthLevel = [Decimal; 2];

/// Aggregated book state for a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthPayload {
    pub market: String,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// Response for `GET_DEPTH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDepthResponse {
    pub depth: DepthPayload,
}

/// A resting order as reported to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub id: Uuid,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled: Decimal,
}

/// Response for `GET_OPEN_ORDERS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOpenOrdersResponse {
    pub orders: Vec<OrderView>,
}

// ============================================================================
// Persistence events (engine → db-processor queue)
// ============================================================================

/// A trade ready to be written to the trades table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAdded {
    pub id: Uuid,
    pub is_buyer_maker: bool,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub market: String,
}

/// An order snapshot ready to be upserted into the orders table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: Uuid,
    pub executed_qty: Decimal,
    pub market: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: Side,
}

/// Tagged union carried on the persistence queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PersistenceEvent {
    #[serde(rename = "TRADE_ADDED")]
    TradeAdded(TradeAdded),
    #[serde(rename = "ORDER_UPDATE")]
    OrderUpdate(OrderUpdate),
}

// ============================================================================
// Stream events (engine → ws topic)
// ============================================================================

/// Stream payload, tagged by event kind. The wire shape of a trade is
/// `{ "e": "trade", "t": .., "p": .., "q": .., "s": .. }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "e")]
pub enum StreamData {
    #[serde(rename = "trade")]
    Trade {
        #[serde(rename = "t")]
        trade_id: i64,
        #[serde(rename = "p")]
        price: Decimal,
        #[serde(rename = "q")]
        quantity: Decimal,
        #[serde(rename = "s")]
        market: String,
    },
}

/// Wrapper for all messages pushed to stream subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    pub stream: String,
    pub data: StreamData,
}

impl StreamMessage {
    /// Build the trade stream event for a fill on `market`.
    pub fn trade(market: &str, fill: &Fill) -> Self {
        Self {
            stream: format!("trades@{}", market),
            data: StreamData::Trade {
                trade_id: fill.trade_id,
                price: fill.price,
                quantity: fill.qty,
                market: market.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_fill() -> Fill {
        Fill {
            qty: dec!(2.5),
            price: dec!(100),
            trade_id: 7,
            maker_order_id: Uuid::new_v4(),
            maker_user_id: Uuid::new_v4(),
            taker_user_id: Uuid::new_v4(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_command_envelope_round_trip() {
        let msg = CommandMessage::CreateOrder(CreateOrderData {
            market: "SOL_USDC".to_string(),
            side: Side::Buy,
            price: dec!(100.5),
            quantity: dec!(3),
        });
        let envelope = CommandEnvelope::new("reply-1".to_string(), Uuid::new_v4(), &msg);

        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: CommandEnvelope = serde_json::from_str(&raw).unwrap();
        let decoded = parsed.decode_message().unwrap();

        match decoded {
            CommandMessage::CreateOrder(data) => {
                assert_eq!(data.market, "SOL_USDC");
                assert_eq!(data.price, dec!(100.5));
                assert_eq!(data.side, Side::Buy);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_command_wire_shape() {
        let msg = CommandMessage::GetDepth(GetDepthData {
            market: "SOL_USDC".to_string(),
            limit: 10,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "GET_DEPTH");
        assert_eq!(value["data"]["market"], "SOL_USDC");
        assert_eq!(value["data"]["limit"], 10);
    }

    #[test]
    fn test_decode_unknown_type() {
        let envelope = CommandEnvelope {
            client_id: "reply-1".to_string(),
            user_id: Uuid::new_v4(),
            message: serde_json::json!({ "type": "SELF_DESTRUCT", "data": {} }),
        };
        match envelope.decode_message() {
            Err(DecodeError::UnknownType(ty)) => assert_eq!(ty, "SELF_DESTRUCT"),
            other => panic!("expected unknown type, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_known_type() {
        let envelope = CommandEnvelope {
            client_id: "reply-1".to_string(),
            user_id: Uuid::new_v4(),
            // CREATE_ORDER missing its payload fields.
            message: serde_json::json!({ "type": "CREATE_ORDER", "data": { "market": "SOL_USDC" } }),
        };
        assert!(matches!(
            envelope.decode_message(),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_reply_envelope_skips_empty_fields() {
        let reply: ApiResponse<CancelOrderResponse> = ApiResponse::error("market not found");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "market not found");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_persistence_event_tagging() {
        let event = PersistenceEvent::TradeAdded(TradeAdded {
            id: Uuid::new_v4(),
            is_buyer_maker: false,
            price: dec!(100),
            quantity: dec!(2.5),
            quote_quantity: dec!(250),
            timestamp: 1_700_000_000_000,
            market: "SOL_USDC".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "TRADE_ADDED");
        // Decimals travel as strings.
        assert_eq!(value["price"], "100");
        assert_eq!(value["quote_quantity"], "250");

        let back: PersistenceEvent = serde_json::from_value(value).unwrap();
        assert!(matches!(back, PersistenceEvent::TradeAdded(_)));
    }

    #[test]
    fn test_stream_message_wire_shape() {
        let fill = sample_fill();
        let msg = StreamMessage::trade("SOL_USDC", &fill);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["stream"], "trades@SOL_USDC");
        assert_eq!(value["data"]["e"], "trade");
        assert_eq!(value["data"]["t"], 7);
        assert_eq!(value["data"]["p"], "100");
        assert_eq!(value["data"]["q"], "2.5");
        assert_eq!(value["data"]["s"], "SOL_USDC");
    }

    #[test]
    fn test_side_serialization() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.to_string(), "buy");
    }
}
