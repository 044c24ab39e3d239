//! Exchange backend library.
//!
//! Shared code for the four platform processes:
//!
//! ```text
//! api ──(command queue)──▶ engine ──(persistence queue)──▶ db-processor
//!  ▲                          │
//!  └──(reply channel)─────────┤
//!                             └──(stream topic)──▶ ws ──▶ clients
//! ```
//!
//! The `api` binary is the HTTP front-end, `engine` is the single-writer
//! matching loop, `db-processor` writes trades and order updates to
//! Postgres, and `ws` fans trade events out to WebSocket subscribers.

pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod persistence;
pub mod protocol;
pub mod websocket;
