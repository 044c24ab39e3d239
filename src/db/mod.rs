//! Database Module
//!
//! Postgres access for the two processes that use it: the API writes users,
//! the db-processor writes orders and trades. Each process owns exactly one
//! pool and issues one short statement per request or queue event, so a
//! handful of connections covers either of them.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const DEFAULT_POOL_SIZE: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection wrapper
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Open this process's pool. `DB_POOL_SIZE` overrides the default for
    /// deployments that run the API with more concurrency than usual.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool_size = std::env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;

        tracing::info!(pool_size, "database pool ready");
        Ok(Self { pool })
    }

    /// Ensure the platform schema exists. Idempotent; every writer process
    /// runs this at startup.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                market TEXT NOT NULL,
                price NUMERIC NOT NULL,
                quantity NUMERIC NOT NULL,
                side TEXT NOT NULL,
                executed_qty NUMERIC NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id UUID PRIMARY KEY,
                market TEXT NOT NULL,
                is_buyer_maker BOOLEAN NOT NULL,
                price NUMERIC NOT NULL,
                quantity NUMERIC NOT NULL,
                quote_quantity NUMERIC NOT NULL,
                executed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database schema is up to date");
        Ok(())
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
