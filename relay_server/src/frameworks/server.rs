// Framework bootstrap for the relay server runtime.

use crate::domain::World;
use crate::frameworks::config::{self, RelaySettings};
use crate::interface_adapters::net::ws_handler;
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::ids::ConnectionIds;
use crate::use_cases::{Hub, RelayStats, WorldHandle};

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::{io::Result, sync::Arc};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Serves the relay on an already bound listener with the given settings.
pub async fn run(listener: tokio::net::TcpListener, settings: RelaySettings) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state(settings);
    let app = router(state);

    tracing::info!(%address, "listening");

    // Serve app and report errors rather than panicking
    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let settings = RelaySettings::from_env().ok_or_else(|| {
        tracing::error!("AUTH_TOKEN is not set");
        std::io::Error::other("AUTH_TOKEN must be set")
    })?;

    let address = SocketAddr::new(config::http_host(), config::http_port());

    // Bind TCP listener with error handling
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener, settings).await
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// Composition root: the world and hub are created once here and passed down.
fn build_state(settings: RelaySettings) -> Arc<AppState> {
    let stats = Arc::new(RelayStats::default());

    let hub = Hub::spawn(settings.hub_command_capacity, stats.clone());
    let world = WorldHandle::spawn(
        World::authoritative(settings.arena),
        hub,
        settings.world_command_capacity,
        settings.world_report_interval,
        stats.clone(),
    );

    tracing::debug!(
        arena_width = settings.arena.width,
        arena_height = settings.arena.height,
        max_message_size = settings.connection.max_message_size,
        outbound_queue_capacity = settings.connection.outbound_queue_capacity,
        ping_period_ms = settings.connection.ping_period.as_millis(),
        "relay configured"
    );

    Arc::new(AppState {
        world,
        stats,
        auth_token: Arc::from(settings.auth_token.as_str()),
        connection: settings.connection,
        conn_ids: ConnectionIds::seeded_from_clock(),
    })
}
