// src/main.rs
mod api;
mod config;
mod model;
mod source;
mod stacker;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use source::OrderSource;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() {
    let dotenv_result = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = dotenv_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!("⚠️ Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();
    info!(
        "🔗 Upstream order API: {}",
        app_config.source.base_url()
    );

    let source = match OrderSource::new(app_config.source.clone()) {
        Ok(source) => Arc::new(source),
        Err(err) => {
            error!("❌ Could not create upstream client: {err}");
            std::process::exit(1);
        }
    };

    info!("🚀 Order stacking service starting...");
    if let Err(err) = api::start_api_server(app_config.api.clone(), source).await {
        error!("❌ API server terminated with an error: {err}");
        std::process::exit(1);
    }
}
