//! API Handlers

pub mod auth;
pub mod order;

use serde::Serialize;

/// Error body shared by every handler.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
