//! Orderbook Implementation
//!
//! In-memory price-time priority book for a single market. The book is
//! owned exclusively by the engine loop; there is no interior locking, the
//! single writer serializes every mutation.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::types::{MatchResult, MatchingError, OrderEntry};
use crate::protocol::{DepthPayload, Fill, OrderView, Side};

/// Orders resting at one price, keyed by admission sequence. Iteration
/// order is FIFO, and a cancellation that knows the sequence lands on its
/// order without scanning the level.
type PriceLevel = BTreeMap<u64, OrderEntry>;

/// Order book for one market.
///
/// Price levels live in ordered maps (`bids` iterated descending, `asks`
/// ascending). `order_index` maps a live order to its `(side, price,
/// sequence)`, so cancellation is two ordered-map lookups regardless of how
/// many orders share the level.
pub struct Orderbook {
    market: String,
    bids: BTreeMap<Decimal, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
    order_index: HashMap<Uuid, (Side, Decimal, u64)>,
    /// Admission counter; time priority within a level.
    order_seq: u64,
    /// Strictly monotonic per market.
    trade_seq: i64,
}

impl Orderbook {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::new(),
            order_seq: 0,
            trade_seq: 0,
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Number of live resting orders.
    pub fn open_order_count(&self) -> usize {
        self.order_index.len()
    }

    /// Admit an order: match it against the opposite side respecting
    /// price-time priority, then rest any remainder. The book is never
    /// crossed on return.
    ///
    /// Validation of price and quantity happens before the book is reached;
    /// callers pass only positive values.
    pub fn add_order(
        &mut self,
        user_id: Uuid,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> MatchResult {
        let mut taker = OrderEntry {
            id: Uuid::new_v4(),
            user_id,
            side,
            price,
            quantity,
            filled: Decimal::ZERO,
            sequence: 0,
        };
        let now = chrono::Utc::now().timestamp_millis();

        let (fills, makers) = match side {
            Side::Buy => self.match_against_asks(&mut taker, now),
            Side::Sell => self.match_against_bids(&mut taker, now),
        };

        let result_taker = taker.view();
        let order_id = taker.id;

        // Rest the remainder; an exactly-filled taker leaves no shell behind.
        if taker.filled < taker.quantity {
            self.order_seq += 1;
            taker.sequence = self.order_seq;
            self.order_index
                .insert(taker.id, (side, taker.price, taker.sequence));
            let book = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            book.entry(taker.price)
                .or_default()
                .insert(taker.sequence, taker);
        }

        MatchResult {
            order_id,
            fills,
            taker: result_taker,
            makers,
        }
    }

    /// Walk asks from the lowest price while the taker's limit covers the
    /// level, consuming makers in FIFO order.
    fn match_against_asks(
        &mut self,
        taker: &mut OrderEntry,
        now: i64,
    ) -> (Vec<Fill>, Vec<OrderView>) {
        let mut fills = Vec::new();
        let mut makers = Vec::new();
        let Self {
            asks,
            order_index,
            trade_seq,
            ..
        } = self;

        while taker.filled < taker.quantity {
            let Some((&level_price, _)) = asks.iter().next() else {
                break;
            };
            if level_price > taker.price {
                break;
            }
            let Some(queue) = asks.get_mut(&level_price) else {
                break;
            };

            while taker.filled < taker.quantity {
                let Some(mut slot) = queue.first_entry() else {
                    break;
                };
                let maker = slot.get_mut();
                let fill_qty = taker.remaining().min(maker.remaining());
                taker.filled += fill_qty;
                maker.filled += fill_qty;
                *trade_seq += 1;

                fills.push(Fill {
                    qty: fill_qty,
                    price: maker.price,
                    trade_id: *trade_seq,
                    maker_order_id: maker.id,
                    maker_user_id: maker.user_id,
                    taker_user_id: taker.user_id,
                    timestamp: now,
                });
                makers.push(maker.view());

                if maker.filled == maker.quantity {
                    let maker_id = maker.id;
                    slot.remove();
                    order_index.remove(&maker_id);
                }
            }

            if queue.is_empty() {
                asks.remove(&level_price);
            }
        }

        (fills, makers)
    }

    /// Symmetric walk over bids from the highest price.
    fn match_against_bids(
        &mut self,
        taker: &mut OrderEntry,
        now: i64,
    ) -> (Vec<Fill>, Vec<OrderView>) {
        let mut fills = Vec::new();
        let mut makers = Vec::new();
        let Self {
            bids,
            order_index,
            trade_seq,
            ..
        } = self;

        while taker.filled < taker.quantity {
            let Some((&level_price, _)) = bids.iter().next_back() else {
                break;
            };
            if level_price < taker.price {
                break;
            }
            let Some(queue) = bids.get_mut(&level_price) else {
                break;
            };

            while taker.filled < taker.quantity {
                let Some(mut slot) = queue.first_entry() else {
                    break;
                };
                let maker = slot.get_mut();
                let fill_qty = taker.remaining().min(maker.remaining());
                taker.filled += fill_qty;
                maker.filled += fill_qty;
                *trade_seq += 1;

                fills.push(Fill {
                    qty: fill_qty,
                    price: maker.price,
                    trade_id: *trade_seq,
                    maker_order_id: maker.id,
                    maker_user_id: maker.user_id,
                    taker_user_id: taker.user_id,
                    timestamp: now,
                });
                makers.push(maker.view());

                if maker.filled == maker.quantity {
                    let maker_id = maker.id;
                    slot.remove();
                    order_index.remove(&maker_id);
                }
            }

            if queue.is_empty() {
                bids.remove(&level_price);
            }
        }

        (fills, makers)
    }

    /// Cancel a resting order. Failure is idempotent: a missing id returns
    /// `OrderNotFound` and leaves the book untouched; only the owner may
    /// cancel. Fills already emitted for a partially filled order stand.
    pub fn cancel_order(&mut self, order_id: Uuid, user_id: Uuid) -> Result<(), MatchingError> {
        let &(side, price, sequence) = self
            .order_index
            .get(&order_id)
            .ok_or(MatchingError::OrderNotFound(order_id))?;

        let book = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let queue = book
            .get_mut(&price)
            .expect("order index referenced a missing price level");
        let order = queue
            .get(&sequence)
            .expect("order index referenced a missing order");

        if order.user_id != user_id {
            return Err(MatchingError::Unauthorized(order_id));
        }

        queue.remove(&sequence);
        if queue.is_empty() {
            book.remove(&price);
        }
        self.order_index.remove(&order_id);
        Ok(())
    }

    /// Aggregate remaining quantity per price level, at most `limit` levels
    /// per side. Bids descend, asks ascend.
    pub fn depth(&self, limit: usize) -> DepthPayload {
        let level_total = |queue: &PriceLevel| -> Decimal {
            queue.values().map(|o| o.remaining()).sum()
        };

        DepthPayload {
            market: self.market.clone(),
            bids: self
                .bids
                .iter()
                .rev()
                .take(limit)
                .map(|(price, queue)| [*price, level_total(queue)])
                .collect(),
            asks: self
                .asks
                .iter()
                .take(limit)
                .map(|(price, queue)| [*price, level_total(queue)])
                .collect(),
        }
    }

    /// Snapshot of resting orders owned by `user_id`.
    pub fn open_orders(&self, user_id: Uuid) -> Vec<OrderView> {
        self.bids
            .values()
            .rev()
            .chain(self.asks.values())
            .flat_map(|queue| queue.values())
            .filter(|o| o.user_id == user_id)
            .map(|o| o.view())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book() -> Orderbook {
        Orderbook::new("SOL_USDC")
    }

    fn user() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn test_simple_cross() {
        let mut book = book();
        let (u1, u2) = (user(), user());

        book.add_order(u1, Side::Sell, dec!(100), dec!(5));
        let result = book.add_order(u2, Side::Buy, dec!(100), dec!(5));

        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].qty, dec!(5));
        assert_eq!(result.fills[0].price, dec!(100));
        assert_eq!(result.fills[0].maker_user_id, u1);
        assert_eq!(result.fills[0].taker_user_id, u2);
        assert_eq!(book.open_order_count(), 0);
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn test_walk_the_book() {
        let mut book = book();
        let (u1, u2, u3) = (user(), user(), user());

        book.add_order(u1, Side::Sell, dec!(100), dec!(3));
        book.add_order(u2, Side::Sell, dec!(101), dec!(4));
        let result = book.add_order(u3, Side::Buy, dec!(101), dec!(6));

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].qty, dec!(3));
        assert_eq!(result.fills[0].price, dec!(100));
        assert_eq!(result.fills[0].maker_user_id, u1);
        assert_eq!(result.fills[1].qty, dec!(3));
        assert_eq!(result.fills[1].price, dec!(101));
        assert_eq!(result.fills[1].maker_user_id, u2);

        // Taker is fully filled; u2's residual ask of 1 remains at 101.
        let depth = book.depth(10);
        assert!(depth.bids.is_empty());
        assert_eq!(depth.asks, vec![[dec!(101), dec!(1)]]);
    }

    #[test]
    fn test_partial_fill_rests_remainder() {
        let mut book = book();
        let (u1, u2) = (user(), user());

        book.add_order(u1, Side::Sell, dec!(100), dec!(2));
        let result = book.add_order(u2, Side::Buy, dec!(101), dec!(5));

        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].qty, dec!(2));
        assert_eq!(result.fills[0].price, dec!(100));

        let depth = book.depth(10);
        assert_eq!(depth.bids, vec![[dec!(101), dec!(3)]]);
        assert!(depth.asks.is_empty());
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = book();
        let (u1, u2, u3) = (user(), user(), user());

        book.add_order(u1, Side::Sell, dec!(100), dec!(2));
        book.add_order(u2, Side::Sell, dec!(100), dec!(2));
        let result = book.add_order(u3, Side::Buy, dec!(100), dec!(3));

        // Earlier maker consumed in full before the later one is touched.
        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].qty, dec!(2));
        assert_eq!(result.fills[0].maker_user_id, u1);
        assert_eq!(result.fills[1].qty, dec!(1));
        assert_eq!(result.fills[1].maker_user_id, u2);

        let depth = book.depth(10);
        assert_eq!(depth.asks, vec![[dec!(100), dec!(1)]]);
        let open = book.open_orders(u2);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].filled, dec!(1));
    }

    #[test]
    fn test_no_cross_when_limit_too_low() {
        let mut book = book();
        let (u1, u2) = (user(), user());

        book.add_order(u1, Side::Sell, dec!(100), dec!(5));
        let result = book.add_order(u2, Side::Buy, dec!(99), dec!(5));

        assert!(result.fills.is_empty());
        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert_eq!(book.best_ask(), Some(dec!(100)));
        assert!(book.best_bid().unwrap() < book.best_ask().unwrap());
    }

    #[test]
    fn test_cancel_then_refill() {
        let mut book = book();
        let (u1, u2) = (user(), user());

        let resting = book.add_order(u1, Side::Buy, dec!(100), dec!(10));
        assert!(book.cancel_order(resting.order_id, u1).is_ok());

        let result = book.add_order(u2, Side::Sell, dec!(100), dec!(10));
        assert!(result.fills.is_empty());

        let depth = book.depth(10);
        assert!(depth.bids.is_empty());
        assert_eq!(depth.asks, vec![[dec!(100), dec!(10)]]);
    }

    #[test]
    fn test_conservation() {
        let mut book = book();
        let taker = user();

        book.add_order(user(), Side::Sell, dec!(100), dec!(1.5));
        book.add_order(user(), Side::Sell, dec!(100.5), dec!(2.25));
        book.add_order(user(), Side::Sell, dec!(101), dec!(4));

        let quantity = dec!(6);
        let result = book.add_order(taker, Side::Buy, dec!(100.5), quantity);

        let filled: Decimal = result.fills.iter().map(|f| f.qty).sum();
        let remaining_on_book: Decimal = book
            .open_orders(taker)
            .iter()
            .map(|o| o.quantity - o.filled)
            .sum();
        assert_eq!(filled + remaining_on_book, quantity);
        assert_eq!(result.taker.filled, filled);
    }

    #[test]
    fn test_maker_price_execution() {
        let mut book = book();
        book.add_order(user(), Side::Sell, dec!(100), dec!(1));

        let result = book.add_order(user(), Side::Buy, dec!(105), dec!(1));
        assert_eq!(result.fills[0].price, dec!(100));
    }

    #[test]
    fn test_marketable_exact_fill_does_not_rest() {
        let mut book = book();
        book.add_order(user(), Side::Sell, dec!(100), dec!(5));

        let taker = user();
        let result = book.add_order(taker, Side::Buy, dec!(100), dec!(5));
        assert_eq!(result.taker.filled, dec!(5));
        assert_eq!(book.open_order_count(), 0);
        assert!(book.open_orders(taker).is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut book = book();
        let u1 = user();
        let resting = book.add_order(u1, Side::Sell, dec!(100), dec!(5));

        assert!(book.cancel_order(resting.order_id, u1).is_ok());
        assert_eq!(
            book.cancel_order(resting.order_id, u1),
            Err(MatchingError::OrderNotFound(resting.order_id))
        );
        assert_eq!(book.open_order_count(), 0);
    }

    #[test]
    fn test_cancel_requires_owner() {
        let mut book = book();
        let (owner, stranger) = (user(), user());
        let resting = book.add_order(owner, Side::Sell, dec!(100), dec!(5));

        assert_eq!(
            book.cancel_order(resting.order_id, stranger),
            Err(MatchingError::Unauthorized(resting.order_id))
        );
        // Untouched: the owner can still cancel.
        assert!(book.cancel_order(resting.order_id, owner).is_ok());
    }

    #[test]
    fn test_cancel_inside_populated_level() {
        let mut book = book();
        let (u1, u2, u3) = (user(), user(), user());

        book.add_order(u1, Side::Sell, dec!(100), dec!(1));
        let middle = book.add_order(u2, Side::Sell, dec!(100), dec!(2));
        book.add_order(u3, Side::Sell, dec!(100), dec!(3));

        assert!(book.cancel_order(middle.order_id, u2).is_ok());
        assert_eq!(book.depth(10).asks, vec![[dec!(100), dec!(4)]]);

        // The makers around the hole keep their time priority.
        let result = book.add_order(user(), Side::Buy, dec!(100), dec!(4));
        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].maker_user_id, u1);
        assert_eq!(result.fills[1].maker_user_id, u3);
    }

    #[test]
    fn test_cancel_partially_filled_leaves_fills_intact() {
        let mut book = book();
        let (maker, taker) = (user(), user());

        let resting = book.add_order(maker, Side::Sell, dec!(100), dec!(5));
        let result = book.add_order(taker, Side::Buy, dec!(100), dec!(2));
        assert_eq!(result.fills[0].qty, dec!(2));

        assert!(book.cancel_order(resting.order_id, maker).is_ok());
        assert!(book.depth(10).asks.is_empty());
    }

    #[test]
    fn test_depth_aggregation_and_order() {
        let mut book = book();
        book.add_order(user(), Side::Buy, dec!(99), dec!(1));
        book.add_order(user(), Side::Buy, dec!(100), dec!(2));
        book.add_order(user(), Side::Buy, dec!(100), dec!(3));
        book.add_order(user(), Side::Sell, dec!(101), dec!(4));
        book.add_order(user(), Side::Sell, dec!(102), dec!(5));

        let depth = book.depth(10);
        assert_eq!(depth.market, "SOL_USDC");
        assert_eq!(depth.bids, vec![[dec!(100), dec!(5)], [dec!(99), dec!(1)]]);
        assert_eq!(depth.asks, vec![[dec!(101), dec!(4)], [dec!(102), dec!(5)]]);

        let top = book.depth(1);
        assert_eq!(top.bids.len(), 1);
        assert_eq!(top.asks.len(), 1);
    }

    #[test]
    fn test_trade_ids_strictly_monotonic() {
        let mut book = book();
        book.add_order(user(), Side::Sell, dec!(100), dec!(1));
        book.add_order(user(), Side::Sell, dec!(100), dec!(1));
        book.add_order(user(), Side::Sell, dec!(101), dec!(1));

        let result = book.add_order(user(), Side::Buy, dec!(101), dec!(3));
        assert_eq!(result.fills.len(), 3);
        let ids: Vec<i64> = result.fills.iter().map(|f| f.trade_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_book_never_crossed() {
        let mut book = book();
        book.add_order(user(), Side::Sell, dec!(100), dec!(5));
        book.add_order(user(), Side::Buy, dec!(102), dec!(2));
        book.add_order(user(), Side::Buy, dec!(99), dec!(1));
        book.add_order(user(), Side::Sell, dec!(98), dec!(10));

        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            assert!(bid < ask);
        }
    }

    #[test]
    fn test_sell_walk_descends_bids() {
        let mut book = book();
        let (u1, u2, u3) = (user(), user(), user());

        book.add_order(u1, Side::Buy, dec!(102), dec!(1));
        book.add_order(u2, Side::Buy, dec!(101), dec!(1));
        let result = book.add_order(u3, Side::Sell, dec!(101), dec!(2));

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].price, dec!(102));
        assert_eq!(result.fills[1].price, dec!(101));
        assert_eq!(book.open_order_count(), 0);
    }

    #[test]
    fn test_open_orders_snapshot() {
        let mut book = book();
        let (mine, other) = (user(), user());

        book.add_order(mine, Side::Buy, dec!(99), dec!(2));
        book.add_order(mine, Side::Sell, dec!(105), dec!(3));
        book.add_order(other, Side::Buy, dec!(98), dec!(1));

        let open = book.open_orders(mine);
        assert_eq!(open.len(), 2);
        assert!(open.iter().any(|o| o.side == Side::Buy && o.price == dec!(99)));
        assert!(open.iter().any(|o| o.side == Side::Sell && o.price == dec!(105)));
    }
}
