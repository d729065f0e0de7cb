use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reverie_engine::api::http;
use reverie_engine::{App, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::load().context("loading configuration")?;
    info!(?config, "Starting reverie-engine");

    let app = Arc::new(App::in_memory(config.clone()));

    spawn_reaper(app.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, http::router(app))
        .await
        .context("serving")?;
    Ok(())
}

/// Periodically abort suspended executions idle past the retention window.
fn spawn_reaper(app: Arc<App>) {
    let interval = Duration::from_secs(app.config.reaper_interval_secs);
    let retention = chrono::Duration::minutes(app.config.retention_minutes);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = app.executions.expire_stale(retention, Utc::now()).await {
                error!(error = %err, "Expiry sweep failed");
            }
        }
    });
}
