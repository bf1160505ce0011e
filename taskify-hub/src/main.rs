//! Taskify hub: realtime table server for Taskify clients.
//!
//! An axum WebSocket server holding the tasks, teams, memberships and
//! profiles tables in memory. Clients run selects and writes over JSON
//! frames and subscribe to per-table change events.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin taskify-hub
//!
//! # Run on custom address
//! cargo run --bin taskify-hub -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! TASKIFY_HUB_ADDR=127.0.0.1:8080 cargo run --bin taskify-hub
//! ```

use std::sync::Arc;

use clap::Parser;
use taskify_hub::config::{HubCliArgs, HubConfig};
use taskify_hub::hub::{self, HubState};
use taskify_hub::tables::HubTables;

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskify hub");

    let tables = HubTables::new(config.event_buffer);
    let state = Arc::new(HubState::with_config(config.max_frame_size, tables));

    match hub::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "hub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
