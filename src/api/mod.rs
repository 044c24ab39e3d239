//! HTTP Front-End
//!
//! Thin edge over the bus: authenticates callers, validates payloads, and
//! speaks the command/reply protocol with the engine. It never touches a
//! book directly.

pub mod handlers;
pub mod routes;

use crate::bus::MessageBus;
use crate::config::AppConfig;
use crate::db::Database;

/// Shared state for the API process.
pub struct ApiState {
    pub config: AppConfig,
    pub db: Database,
    pub bus: MessageBus,
}
