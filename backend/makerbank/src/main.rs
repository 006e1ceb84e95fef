//! MakerBank classroom ledger: entry point.
//!
//! Runs the weekly interest scheduler as a background task and serves the
//! ledger over a small Axum REST API. Both share one SQLite-backed
//! [`ledger::Ledger`].

mod accounts;
mod api;
mod balance;
mod clock;
mod config;
mod courses;
mod db;
mod errors;
mod ledger;
mod models;
mod money;
mod notify;
mod scheduler;
mod workflow;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_accounts;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clock::SystemClock;
use config::Config;
use db::LedgerStore;
use ledger::Ledger;
use notify::{LogNotifier, Notifier, WebhookNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.max_connections).await?;
    let store = LedgerStore::new(pool);

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!("Delivering notifications to {url}");
            Arc::new(WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(config.notify_timeout_secs),
            )?)
        }
        None => Arc::new(LogNotifier),
    };
    let ledger = Ledger::new(store, Arc::new(SystemClock), notifier);

    // ─── Background interest scheduler ────────────────────
    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(scheduler::run(
        ledger.clone(),
        Duration::from_secs(config.poll_interval_secs),
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState { ledger }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    shutdown.cancel();
    scheduler.await?;
    Ok(())
}
