use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use orders_rs::{
    config::{BusType, Config, StoreType},
    db,
    outbox::{OutboxStore, RelayMetrics, RelaySupervisor},
    repos::{InMemoryStore, OrderStore, PgStore},
    routes::{router, AppState},
    services::OrderService,
};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting orders service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        host = %config.host,
        port = config.port,
        store_type = ?config.store_type,
        bus_type = ?config.bus_type,
        batch_size = config.outbox_batch_size,
        poll_interval_secs = config.outbox_poll_interval.as_secs(),
        "Configuration loaded"
    );

    // Storage: one value serves both the write path and the relays
    let (order_store, outbox_store): (Arc<dyn OrderStore>, Arc<dyn OutboxStore>) =
        match config.store_type {
            StoreType::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .expect("DATABASE_URL required for postgres store");
                tracing::info!("Connecting to database...");
                let pool = db::init_pool(database_url)
                    .await
                    .expect("Failed to connect to database");

                tracing::info!("Running migrations...");
                db::run_migrations(&pool)
                    .await
                    .expect("Failed to run migrations");

                let store = Arc::new(PgStore::new(pool));
                (store.clone() as Arc<dyn OrderStore>, store as Arc<dyn OutboxStore>)
            }
            StoreType::InMemory => {
                tracing::warn!("Using in-memory store; orders and outbox are lost on restart");
                let store = Arc::new(InMemoryStore::new());
                (store.clone() as Arc<dyn OrderStore>, store as Arc<dyn OutboxStore>)
            }
        };

    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::Nats => {
            tracing::info!(nats_url = %config.nats_url, "Connecting to NATS");
            let client = async_nats::connect(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            let bus = NatsBus::new(client);
            bus.ensure_stream(&config.nats_stream, &config.destinations())
                .await
                .expect("Failed to declare NATS stream");
            Arc::new(bus)
        }
        BusType::InMemory => {
            tracing::info!("Using in-memory event bus");
            Arc::new(InMemoryBus::with_destinations(config.destinations()))
        }
    };

    let metrics = RelayMetrics::new().expect("Failed to register relay metrics");

    let relays = RelaySupervisor::from_routes(
        &config.routes,
        config.outbox_batch_size,
        config.outbox_poll_interval,
        outbox_store,
        bus,
        metrics.clone(),
    )
    .expect("Failed to configure outbox relays")
    .start();

    let app = router(AppState {
        orders: Arc::new(OrderService::new(order_store)),
        metrics,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");
    tracing::info!("Orders service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    relays.shutdown().await;
    tracing::info!("Orders service stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
