//! Worker process: consumes the generation queue and calls the image API

use gen_dispatch::{channel, config::Settings, logging, worker};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    logging::init(&settings.logging);

    if settings.broker.kind == "memory" {
        anyhow::bail!("gen-worker needs a shared broker; the in-memory channel only works inside gen-dispatch");
    }

    info!(queue = %settings.broker.queue, "Starting gen-worker");

    let channel = channel::from_config(&settings.broker)?;
    let executor = Arc::new(worker::from_settings(&settings)?);

    tokio::select! {
        _ = worker::run(
            channel.clone(),
            executor,
            &settings.broker.queue,
            settings.broker.reconnect_delay(),
        ) => {}
        signal = tokio::signal::ctrl_c() => signal?,
    }

    info!("Shutting down worker");
    channel.close().await;
    Ok(())
}
