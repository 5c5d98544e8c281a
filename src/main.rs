//! ==============================================================================
//! main.rs - sensor dashboard entry point
//! ==============================================================================
//!
//! purpose:
//!     hosts the classroom environment dashboard: sensor readings pulled from
//!     the hosted backend, summarized and served as a page plus a json api,
//!     next to a comment board and an in-memory bulletin board.
//!
//! responsibilities:
//!     - load dashboard.toml and the backend secrets (missing secrets are fatal)
//!     - build the backend gateway and the auth provider
//!     - serve the web ui/api (server.rs)
//!     - run the refresh loop that keeps the shared snapshot current
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                    host (this file)                      │
//!     │  ┌──────────────┐            ┌────────────────────────┐  │
//!     │  │ refresh loop │            │ web server             │  │
//!     │  │ (ticker)     │            │ (server.rs)            │  │
//!     │  └──────┬───────┘            └───────────┬────────────┘  │
//!     │         │ snapshot  <── reads ───────────┤               │
//!     │         └──────────────┬─────────────────┘               │
//!     │                 ┌──────┴──────┐                          │
//!     │                 │   cache     │ <- cache.rs              │
//!     │                 └──────┬──────┘                          │
//!     └────────────────────────┼─────────────────────────────────┘
//!                              │ rest (gateway.rs)
//!                      ┌───────┴───────┐
//!                      │ hosted store  │
//!                      └───────────────┘
//!
//! ==============================================================================

mod auth;
mod bulletin;
mod cache;
mod comments;
mod config;
mod dashboard;
mod domain;
mod error;
mod gateway;
mod refresh;
mod render;
mod server;
mod session;
mod stats;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::SupabaseAuth;
use crate::config::{DashboardConfig, Secrets};
use crate::gateway::SupabaseGateway;
use crate::refresh::RefreshTicker;
use crate::server::AppState;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sensor_board={level},warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: configuration
    let config = DashboardConfig::load_or_default();
    init_tracing(&config.logging.level);
    info!(version = env!("CARGO_PKG_VERSION"), "sensor dashboard starting");
    config.log_summary();

    // no backend, no dashboard
    let secrets = match Secrets::load() {
        Ok(secrets) => secrets,
        Err(e) => {
            error!(error = %format!("{e:#}"), "backend secrets missing");
            return Err(e);
        }
    };

    // step 2: backend clients
    let timeout = config.gateway.timeout();
    let gateway = SupabaseGateway::new(&secrets.url, &secrets.api_key, timeout)?
        .with_readings_table(&config.sensors.table);
    let auth = SupabaseAuth::new(&secrets.url, &secrets.api_key, timeout)?;
    info!(url = %secrets.url, "backend configured");

    // step 3: shared state, staff accounts seeded from config
    let state = AppState::new(Arc::new(gateway), Arc::new(auth), config.clone());
    if !config.bulletin.staff.is_empty() {
        info!(count = config.bulletin.staff.len(), "staff accounts seeded");
    }

    // step 4: web server in the background
    let web_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_server(web_state).await {
            error!(error = %format!("{e:#}"), "web server stopped");
        }
    });

    // step 5: refresh loop
    let show_data = config.logging.show_sensor_data;
    let mut ticker = RefreshTicker::start(config.poll_interval());
    info!(interval_seconds = config.polling.interval_seconds, "refresh loop started");

    while let Some(tick) = ticker.tick().await {
        let view = state.refresh_snapshot().await;
        if let Some(e) = &view.error {
            warn!(tick, error = %e, "refresh failed");
            continue;
        }
        match (&view.stats, show_data) {
            (Some(stats), true) => info!(
                tick,
                rows = stats.count,
                temperature = ?stats.temperature.map(|m| m.current),
                humidity = ?stats.humidity.map(|m| m.current),
                light = ?stats.light.map(|m| m.current),
                "snapshot refreshed"
            ),
            (None, _) => warn!(tick, hours = view.hours, "no sensor data in window"),
            _ => {}
        }
    }
    Ok(())
}
