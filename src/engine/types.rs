//! Matching Engine Types

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::protocol::{Fill, OrderView, Side};

/// A resting order inside the book.
///
/// `sequence` is assigned on admission and is the time-priority tiebreak
/// within a price level; `filled` never exceeds `quantity`.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub sequence: u64,
}

impl OrderEntry {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }

    pub fn view(&self) -> OrderView {
        OrderView {
            id: self.id,
            side: self.side,
            price: self.price,
            quantity: self.quantity,
            filled: self.filled,
        }
    }
}

/// Result of admitting one order: the fills it produced in match order,
/// the taker's post-match state, and the post-match state of every maker
/// whose `filled` advanced.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub order_id: Uuid,
    pub fills: Vec<Fill>,
    pub taker: OrderView,
    pub makers: Vec<OrderView>,
}

/// Matching engine errors. These are logical outcomes, not faults: the book
/// state is unchanged whenever one is returned.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MatchingError {
    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("order {0} is not owned by the caller")]
    Unauthorized(Uuid),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
}
