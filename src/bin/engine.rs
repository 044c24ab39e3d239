//! Matching engine process: the single consumer of the command queue and
//! the sole owner of every order book.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange_backend::bus::MessageBus;
use exchange_backend::config::AppConfig;
use exchange_backend::engine::{EngineService, MarketRegistry};

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

    tracing::info!("Starting matching engine v{}", env!("CARGO_PKG_VERSION"));

    let bus = MessageBus::connect(&config.redis_url).await?;
    tracing::info!("Message bus connected at {}", config.redis_url);

    let registry = MarketRegistry::new(config.market_list());
    EngineService::new(registry, bus).run().await
}
