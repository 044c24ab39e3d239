//! WebSocket relay process: subscribes to the trade stream topic and fans
//! every event out to connected clients.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exchange_backend::bus::MessageBus;
use exchange_backend::config::AppConfig;
use exchange_backend::websocket::{relay, RelayHub};

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

    tracing::info!("Starting WebSocket relay v{}", env!("CARGO_PKG_VERSION"));

    let bus = MessageBus::connect(&config.redis_url).await?;
    tracing::info!("Message bus connected at {}", config.redis_url);

    let hub = Arc::new(RelayHub::new(config.ws_client_buffer));

    tokio::spawn(relay::run_relay(bus, Arc::clone(&hub)));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(hub);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.ws_port));
    tracing::info!("WebSocket server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler(State(hub): State<Arc<RelayHub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| relay::handle_socket(socket, hub))
}
