//! Ident HTTP server binary.
//!
//! Serves the API and runs the event consumer and outbox relay until SIGINT
//! or SIGTERM.

mod config;

use std::sync::Arc;

use clap::Parser;
use ident_core::Identity;
use ident_core::bus::RedisStreamBus;
use ident_core::cache::{RedisClientCache, Sealer};
use ident_core::identity::Stores;
use ident_core::outbox::RelayConfig;
use ident_core::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, LogFormat};

const DEFAULT_LOG_FILTER: &str = "info,ident_api=debug,ident_core=debug";

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_format);

    info!(version = ident_core::version(), bind_addr = %args.bind_addr, "starting ident_server");

    // Fail on bad configuration before touching any backend.
    let settings = args.settings()?;
    let api_config = args.api_config();

    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(args.query_timeout())
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    ident_api::migrate(&pool).await?;

    let store = PgStore::new(pool).with_query_timeout(args.query_timeout());
    let sealer = Sealer::new(&args.cache_encryption_key)?;
    let cache = RedisClientCache::connect(&args.redis_url, sealer, args.client_cache_ttl()).await?;
    let bus = RedisStreamBus::connect(args.bus_url(), &args.bus_group, &args.bus_consumer).await?;

    let identity = Arc::new(Identity::new(
        Stores::shared(store, Arc::new(cache), Arc::new(bus)),
        settings,
    )?);

    let cancel = CancellationToken::new();
    let mut workers = identity.consumer().spawn(cancel.clone());
    let relay = identity.outbox_relay(RelayConfig::default());
    workers.push(tokio::spawn({
        let cancel = cancel.clone();
        async move { relay.run(cancel).await }
    }));

    let app = ident_api::router(ident_api::AppState {
        identity,
        config: api_config,
    });

    let listener = tokio::net::TcpListener::bind(&args.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = shutdown_signal() => {},
                    _ = cancel.cancelled() => {},
                }
            }
        })
        .await;

    // Stop the background workers whether or not the server exited cleanly.
    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }
    info!("ident_server stopped");

    serve_result?;
    Ok(())
}
