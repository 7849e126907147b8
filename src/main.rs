//! Traffic Hub
//!
//! Main entry point for the relay hub.

use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traffic_hub::{
    state::{AppConfig, AppState},
    web_api,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traffic_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Traffic Hub v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        ai_health_url = %config.ai_health_url,
        max_concurrent = config.max_concurrent,
        rate_limit_per_minute = config.rate_limit_per_minute,
        "Configuration loaded"
    );

    let state = AppState::new(config);

    // Start AI worker health probe
    tokio::spawn(state.ai_monitor.clone().run());

    // Keepalive sweep: a connection that misses one window is terminated
    let supervisor = state.supervisor.clone();
    let keepalive_interval = Duration::from_secs(state.config.keepalive_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keepalive_interval);
        // The first tick fires immediately; skip it so fresh
        // connections get a full window before the first sweep
        interval.tick().await;
        loop {
            interval.tick().await;
            let terminated = supervisor.sweep().await;
            if terminated > 0 {
                tracing::warn!(terminated, "Keepalive sweep closed dead connections");
            }
        }
    });

    // In-flight watchdog: recover capacity lost to a stalled worker
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            dispatcher.watchdog_check().await;
        }
    });

    // Start system health monitoring
    let health_monitor = state.system_health.clone();
    tokio::spawn(async move {
        use sysinfo::System;
        let mut sys = System::new_all();
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;
            sys.refresh_all();

            // Calculate average CPU usage across all cores
            let cpu = {
                let cpus = sys.cpus();
                if cpus.is_empty() {
                    0.0
                } else {
                    cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
                }
            };
            let memory = if sys.total_memory() > 0 {
                (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
            } else {
                0.0
            };

            let mut health = health_monitor.write().await;
            health.update(cpu, memory);
        }
    });

    // Build router
    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
