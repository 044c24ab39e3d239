//! Order Handlers
//!
//! Each handler is one request/reply exchange with the engine: subscribe to
//! a fresh reply channel, enqueue the command envelope, await the engine's
//! reply with a bounded timeout, and surface the authoritative result. On
//! timeout the caller gets a generic submission timeout; the command may
//! still have been processed, and the handler does not retry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::ErrorResponse;
use crate::api::ApiState;
use crate::auth::middleware::AuthUser;
use crate::bus::{keys, BusError};
use crate::protocol::{
    ApiResponse, CancelOrderData, CancelOrderResponse, CommandEnvelope, CommandMessage,
    CreateOrderData, CreateOrderResponse, GetDepthData, GetDepthResponse, GetOpenOrdersData,
    GetOpenOrdersResponse, Side,
};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub market: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct MarketQuery {
    pub market: String,
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub market: String,
    pub limit: Option<usize>,
}

const DEFAULT_DEPTH_LIMIT: usize = 20;

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new limit order
/// POST /orders
pub async fn create_order(
    State(state): State<Arc<ApiState>>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, (StatusCode, Json<ErrorResponse>)> {
    // Reject obviously invalid orders before they reach the queue.
    if req.price <= Decimal::ZERO {
        return Err(bad_request("price must be positive", "INVALID_PRICE"));
    }
    if req.quantity <= Decimal::ZERO {
        return Err(bad_request("quantity must be positive", "INVALID_QUANTITY"));
    }

    let command = CommandMessage::CreateOrder(CreateOrderData {
        market: req.market,
        side: req.side,
        price: req.price,
        quantity: req.quantity,
    });

    let response: CreateOrderResponse =
        engine_request(&state, auth_user.user_id, &command).await?;
    Ok(Json(response))
}

/// Cancel a resting order
/// DELETE /orders/:order_id?market=SOL_USDC
pub async fn cancel_order(
    State(state): State<Arc<ApiState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<CancelOrderResponse>, (StatusCode, Json<ErrorResponse>)> {
    let command = CommandMessage::CancelOrder(CancelOrderData {
        market: query.market,
        order_id,
    });

    let response: CancelOrderResponse =
        engine_request(&state, auth_user.user_id, &command).await?;
    Ok(Json(response))
}

/// Current book depth for a market
/// GET /depth?market=SOL_USDC&limit=20
pub async fn get_depth(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<GetDepthResponse>, (StatusCode, Json<ErrorResponse>)> {
    let command = CommandMessage::GetDepth(GetDepthData {
        market: query.market,
        limit: query.limit.unwrap_or(DEFAULT_DEPTH_LIMIT),
    });

    // Depth is a public query; the engine ignores the user for it.
    let response: GetDepthResponse = engine_request(&state, Uuid::nil(), &command).await?;
    Ok(Json(response))
}

/// The caller's resting orders on a market
/// GET /orders/open?market=SOL_USDC
pub async fn get_open_orders(
    State(state): State<Arc<ApiState>>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<GetOpenOrdersResponse>, (StatusCode, Json<ErrorResponse>)> {
    let command = CommandMessage::GetOpenOrders(GetOpenOrdersData {
        market: query.market,
    });

    let response: GetOpenOrdersResponse =
        engine_request(&state, auth_user.user_id, &command).await?;
    Ok(Json(response))
}

// ============================================================================
// Engine RPC
// ============================================================================

/// Round-trip one command through the bus and unwrap the reply envelope.
async fn engine_request<T: DeserializeOwned>(
    state: &ApiState,
    user_id: Uuid,
    command: &CommandMessage,
) -> Result<T, (StatusCode, Json<ErrorResponse>)> {
    let reply_channel = keys::reply_channel();
    let envelope = CommandEnvelope::new(reply_channel.clone(), user_id, command);
    let payload = serde_json::to_string(&envelope).map_err(|e| {
        tracing::error!("failed to serialize command envelope: {}", e);
        bad_gateway("engine unavailable")
    })?;

    let raw = state
        .bus
        .request(
            keys::COMMAND_QUEUE,
            &reply_channel,
            &payload,
            state.config.engine_reply_timeout(),
        )
        .await
        .map_err(|e| match e {
            BusError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse {
                    error: "order submission timed out".to_string(),
                    code: "SUBMISSION_TIMEOUT".to_string(),
                }),
            ),
            other => {
                tracing::error!("engine request failed: {}", other);
                bad_gateway("engine unavailable")
            }
        })?;

    let reply: ApiResponse<T> = serde_json::from_str(&raw).map_err(|e| {
        tracing::error!("could not parse engine reply: {}", e);
        bad_gateway("engine returned an invalid reply")
    })?;

    if !reply.success {
        let message = reply
            .message
            .unwrap_or_else(|| "order rejected".to_string());
        return Err(bad_request(&message, "REJECTED"));
    }

    reply
        .data
        .ok_or_else(|| bad_gateway("engine reply was missing its payload"))
}

fn bad_request(error: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

fn bad_gateway(error: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorResponse {
            error: error.to_string(),
            code: "ENGINE_UNAVAILABLE".to_string(),
        }),
    )
}
