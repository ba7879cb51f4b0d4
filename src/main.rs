//! Vigil - an alert lifecycle and escalation engine for household care.
//!
//! # Overview
//!
//! Vigil ingests activity events, turns the dangerous ones into alerts,
//! notifies the care network across multiple channels, and escalates when
//! nobody responds. A background sweep auto-resolves stale alerts and moves
//! unanswered ones up the ladder.
//!
//! # API Endpoints
//!
//! - `POST /events` - Ingest an activity event
//! - `POST /alerts`, `GET /alerts`, `GET /alerts/:id` - Alert CRUD
//! - `POST /alerts/:id/{acknowledge,resolve,escalate}` - Lifecycle actions
//! - `POST /alerts/:id/notifications` - Delivery-status updates
//! - `POST /sos` - Manual SOS
//! - `POST /contacts`, `GET /contacts` - Care network
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vigil::api::{AppState, router};
use vigil::config::Config;
use vigil::escalation::Engine;
use vigil::notify::{ChannelSenders, Dispatcher};
use vigil::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(port = config.port, db_url = %config.database_url, "Starting Vigil server");

    // Initialize storage
    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    // Channel senders: simulated wherever no provider webhook is configured
    let senders = ChannelSenders::new(
        config.email_webhook.clone(),
        config.sms_webhook.clone(),
        config.push_webhook.clone(),
        config.emergency_webhook.clone(),
        config.sender_timeout_ms,
    );
    let engine = Engine::new(storage, Dispatcher::new(senders), &config);

    // Background sweep: auto-resolve overdue alerts, escalate unanswered ones
    let sweeper = engine.clone();
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.run_sweep(Utc::now()).await {
                warn!(error = %e, "Sweep run failed");
            }
        }
    });

    // Build router
    let app = router(AppState { engine }).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Vigil is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
