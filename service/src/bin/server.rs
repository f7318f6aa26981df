//! Turnout Registration Server
//!
//! Main server process for the registration engine.
//!
//! This binary:
//! - Connects the `PostgreSQL` authoritative store and runs migrations
//! - Connects the Redis cache mirror
//! - Connects the Redpanda change announcer and starts the outbox relay
//! - Serves the registration API over HTTP
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin server
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnout_cache::{CacheTtls, RedisCacheMirror};
use turnout_core::SystemClock;
use turnout_postgres::{
    CapacityPolicy, OutboxRelay, PostgresArbiter, PostgresEventStore, PostgresLedger,
};
use turnout_redpanda::RedpandaAnnouncer;
use turnout_service::{
    AppState, Config, EventService, RegistrationService, build_router,
    metrics::register_business_metrics,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,turnout=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Turnout registration server...");

    let config = Config::from_env();
    tracing::info!(
        postgres = %config.postgres.url,
        redis = %config.redis.url,
        redpanda = %config.redpanda.brokers,
        "Configuration loaded"
    );

    register_business_metrics();

    // Authoritative store
    let pool =
        turnout_postgres::connect_pool(&config.postgres.url, config.postgres.max_connections)
            .await?;
    turnout_postgres::migrate(&pool).await?;
    tracing::info!("Postgres connected, migrations applied");

    let clock: Arc<dyn turnout_core::Clock> = Arc::new(SystemClock);
    let lock_timeout = Duration::from_millis(config.policy.lock_timeout_ms);
    let store = Arc::new(PostgresEventStore::new(
        pool.clone(),
        Arc::clone(&clock),
        lock_timeout,
        config.redpanda.changes_topic.clone(),
    ));
    let arbiter = Arc::new(PostgresArbiter::new(
        pool.clone(),
        Arc::clone(&clock),
        CapacityPolicy {
            cancellation_cutoff: chrono::Duration::hours(config.policy.cancellation_cutoff_hours),
            lock_timeout,
        },
        config.redpanda.changes_topic.clone(),
    ));
    let ledger = Arc::new(PostgresLedger::new(pool.clone()));

    // Cache mirror
    let ttls = CacheTtls {
        event: Duration::from_secs(config.redis.event_ttl_secs),
        list: Duration::from_secs(config.redis.list_ttl_secs),
        registered_flag: Duration::from_secs(config.redis.flag_ttl_secs),
    };
    let cache = Arc::new(RedisCacheMirror::new(&config.redis.url, ttls).await?);
    tracing::info!("Redis cache mirror connected");

    // Change announcer and outbox relay
    let announcer = Arc::new(
        RedpandaAnnouncer::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks(&config.redpanda.producer_acks)
            .build()?,
    );
    let relay = OutboxRelay::new(pool.clone(), announcer)
        .with_poll_interval(Duration::from_millis(config.policy.outbox_poll_ms))
        .with_batch_size(config.policy.outbox_batch_size);
    tokio::spawn(async move {
        relay.run().await;
    });
    tracing::info!("Outbox relay started");

    // HTTP server
    let state = AppState::new(
        EventService::new(store, Arc::clone(&cache) as Arc<dyn turnout_core::CacheMirror>),
        RegistrationService::new(arbiter, ledger, cache),
    );
    let router = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Turnout registration server is running");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down gracefully...");
        })
        .await?;

    Ok(())
}
