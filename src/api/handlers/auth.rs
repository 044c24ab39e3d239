//! Auth Handlers
//!
//! Signup and login. Passwords are bcrypt-hashed; sessions are HS256 JWTs
//! whose subject is the user id the engine will trust.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;

use super::ErrorResponse;
use crate::api::ApiState;
use crate::auth::jwt::JwtManager;
use crate::models::{LoginRequest, LoginResponse, SignupRequest, User};

/// Create a new account
/// POST /auth/signup
pub async fn signup(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SignupRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    if req.username.trim().is_empty() || req.email.trim().is_empty() {
        return Err(bad_request("username and email are required", "INVALID_INPUT"));
    }
    if req.password.len() < 8 {
        return Err(bad_request(
            "password must be at least 8 characters",
            "INVALID_PASSWORD",
        ));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST).map_err(|e| {
        tracing::error!("failed to hash password: {}", e);
        internal("failed to create user")
    })?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.username.trim())
    .bind(req.email.trim())
    .bind(&password_hash)
    .execute(&state.db.pool)
    .await;

    match result {
        Ok(_) => Ok(StatusCode::CREATED),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "username or email already taken".to_string(),
                code: "ALREADY_EXISTS".to_string(),
            }),
        )),
        Err(e) => {
            tracing::error!("failed to create user: {}", e);
            Err(internal("failed to create user"))
        }
    }
}

/// Exchange credentials for a session token
/// POST /auth/login
pub async fn login(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user: Option<User> = sqlx::query_as(
        r#"
        SELECT id, username, email, password_hash, created_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(req.email.trim())
    .fetch_optional(&state.db.pool)
    .await
    .map_err(|e| {
        tracing::error!("failed to look up user: {}", e);
        internal("login failed")
    })?;

    let Some(user) = user else {
        return Err(unauthorized());
    };

    let valid = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(unauthorized());
    }

    let jwt_manager = JwtManager::new(&state.config.jwt_secret, state.config.jwt_expiry_seconds);
    let token = jwt_manager.generate_token(user.id).map_err(|e| {
        tracing::error!("failed to sign token: {}", e);
        internal("login failed")
    })?;

    Ok(Json(LoginResponse { token }))
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

fn unauthorized() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "invalid credentials".to_string(),
            code: "INVALID_CREDENTIALS".to_string(),
        }),
    )
}

fn internal(error: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.to_string(),
            code: "INTERNAL".to_string(),
        }),
    )
}
