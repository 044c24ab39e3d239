//! Order Matching Engine
//!
//! Price-time priority matching over per-market in-memory books.
//!
//! # Architecture
//!
//! ```text
//! command queue (BRPOP)
//!   ↓
//! EngineService (single consumer)
//!   └→ MarketRegistry
//!        └→ Orderbook (one per market)
//!   → persistence queue / stream topic / reply channel
//! ```
//!
//! Book mutation is single-writer: the loop exclusively owns every book and
//! suspends only at the dequeue and at bus publishes, so one command's match
//! is atomic from the book's standpoint. Read queries (depth, open orders)
//! are routed through the same queue rather than a shared lock.

mod orderbook;
mod registry;
mod service;
mod types;

pub use orderbook::Orderbook;
pub use registry::{CommandOutcome, MarketRegistry};
pub use service::EngineService;
pub use types::{MatchResult, MatchingError, OrderEntry};
