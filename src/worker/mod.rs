//! Worker module - job execution and source image rehosting

pub mod executor;
pub mod rehost;

pub use executor::WorkerExecutor;
pub use rehost::{PassthroughResolver, PublicUrlResolver, Rehoster};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::fal::FalBackend;
use crate::channel::{MessageChannel, Subscription};
use crate::config::Settings;
use crate::error::{AppError, Result};

/// Build a worker backed by the FAL API and the configured rehoster
pub fn from_settings(settings: &Settings) -> Result<WorkerExecutor> {
    let images = Arc::new(FalBackend::new(&settings.fal)?);
    let resolver = Arc::new(Rehoster::new(&settings.rehost)?);
    Ok(WorkerExecutor::new(images, resolver))
}

/// Connect `channel` and start consuming `queue` with `executor`
pub async fn start(
    channel: &Arc<dyn MessageChannel>,
    executor: Arc<WorkerExecutor>,
    queue: &str,
) -> Result<Subscription> {
    channel
        .connect()
        .await
        .map_err(|e| AppError::ChannelUnavailable(e.to_string()))?;
    let subscription = channel.subscribe(queue, executor).await?;
    info!(queue = %queue, "Worker consuming generation jobs");
    Ok(subscription)
}

/// Keep a consumer on `queue` for as long as the returned future is polled.
///
/// Whenever the consumer stops (lost connection, broker-side cancel) the
/// channel is reconnected and the queue subscribed again after `pause`.
pub async fn run(
    channel: Arc<dyn MessageChannel>,
    executor: Arc<WorkerExecutor>,
    queue: &str,
    pause: Duration,
) {
    loop {
        match start(&channel, executor.clone(), queue).await {
            Ok(subscription) => {
                subscription.closed().await;
                warn!(queue = %queue, "Worker consumer stopped, subscribing again");
            }
            Err(e) => warn!(queue = %queue, error = %e, "Worker could not subscribe"),
        }
        tokio::time::sleep(pause).await;
    }
}
