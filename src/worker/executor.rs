//! Worker side of the generation queue

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::traits::ImageBackend;
use crate::channel::MessageHandler;
use crate::dispatch::{Job, Reply};
use crate::error::Result;
use crate::worker::rehost::PublicUrlResolver;

/// Executes one generation job per queue message.
///
/// Holds no per-job state; every message yields exactly one [`Reply`].
pub struct WorkerExecutor {
    images: Arc<dyn ImageBackend>,
    resolver: Arc<dyn PublicUrlResolver>,
}

impl WorkerExecutor {
    pub fn new(images: Arc<dyn ImageBackend>, resolver: Arc<dyn PublicUrlResolver>) -> Self {
        Self { images, resolver }
    }

    /// Decode and run a job, folding every failure into an error reply
    pub async fn execute(&self, payload: &[u8]) -> Reply {
        match self.run(payload).await {
            Ok(file_url) => Reply::ok(file_url),
            Err(err) => {
                warn!(error = %err, status = err.status_code().as_u16(), "Generation job failed");
                Reply::from_error(&err)
            }
        }
    }

    async fn run(&self, payload: &[u8]) -> Result<String> {
        let job = Job::decode(payload)?;
        let mode = job.mode();
        info!(mode, backend = self.images.name(), "Received generation job");

        let file_url = match &job {
            Job::TextToImage(job) => {
                self.images
                    .text_to_image(&job.prompt, &job.options())
                    .await?
            }
            Job::Edit(job) | Job::Filter(job) | Job::Adjust(job) => {
                let image_url = self
                    .resolver
                    .resolve_public_url(&job.image_url, job.image_path.as_deref())
                    .await;
                self.images
                    .edit_image(&job.prompt, &[image_url], &job.options())
                    .await?
            }
            Job::Compose(job) => {
                let mut image_urls = Vec::with_capacity(job.image_urls.len());
                for (index, url) in job.image_urls.iter().enumerate() {
                    // only the first image has a known disk location
                    let path = if index == 0 { job.image_path.as_deref() } else { None };
                    image_urls.push(self.resolver.resolve_public_url(url, path).await);
                }
                self.images
                    .edit_image(&job.prompt, &image_urls, &job.options())
                    .await?
            }
        };

        info!(mode, "Generation job done");
        Ok(file_url)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[async_trait]
impl MessageHandler for WorkerExecutor {
    async fn handle(&self, payload: Vec<u8>) -> Vec<u8> {
        let reply = match AssertUnwindSafe(self.execute(&payload)).catch_unwind().await {
            Ok(reply) => reply,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "Unexpected worker fault");
                Reply::error(500, message)
            }
        };
        reply.to_bytes()
    }
}
