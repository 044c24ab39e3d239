use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::api::ApiState;
use crate::auth::middleware::auth_middleware;

pub fn create_router(state: Arc<ApiState>) -> Router<Arc<ApiState>> {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(handlers::auth::signup))
        .route("/auth/login", post(handlers::auth::login))
        .route("/depth", get(handlers::order::get_depth));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/orders", post(handlers::order::create_order))
        .route("/orders/open", get(handlers::order::get_open_orders))
        .route("/orders/:order_id", delete(handlers::order::cancel_order))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}
