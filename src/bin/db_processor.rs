//! Persistence worker process: drains the persistence queue into Postgres.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange_backend::bus::MessageBus;
use exchange_backend::config::AppConfig;
use exchange_backend::db::Database;
use exchange_backend::persistence::PersistenceWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exchange_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting db-processor v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    tracing::info!("Database connected");

    let bus = MessageBus::connect(&config.redis_url).await?;
    tracing::info!("Message bus connected at {}", config.redis_url);

    PersistenceWorker::new(db.pool, bus).run().await
}
