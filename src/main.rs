use anyhow::Context;
use actix_web::HttpServer;
use std::sync::Arc;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

use media_relay_gateway::{
    config::Config,
    server::{build_app, sweep_rate_limits, AppState},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with more detailed format
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let config = Config::from_env().context("Failed to load configuration")?;
    let state = AppState::from_config(config.clone()).context("Failed to build gateway")?;

    actix_web::rt::spawn(sweep_rate_limits(Arc::clone(&state.limiter)));

    tracing::info!(
        "Starting media relay gateway on {}:{} ({} workers, remux via {})",
        config.server.host,
        config.server.port,
        config.server.workers,
        config.remux.ffmpeg_path
    );

    HttpServer::new(move || build_app(&state))
        .workers(config.server.workers)
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    Ok(())
}
