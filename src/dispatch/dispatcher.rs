//! Request/reply dispatch of generation jobs
//!
//! A job is published to the work queue once per attempt, each time with a
//! fresh correlation id, and the caller waits for the correlated reply up to
//! a per-attempt deadline. Attempts are classified as success, terminal
//! error (the worker answered with an error) or transient fault (no answer,
//! or the transport broke). Only transient faults are retried.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::channel::{ChannelError, MessageChannel, RpcRequest};
use crate::config::DispatchConfig;
use crate::dispatch::job::Job;
use crate::dispatch::reply::Reply;
use crate::dispatch::GENERATION_QUEUE;
use crate::error::{AppError, Result};

/// Timeout and retry budget for a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Extra attempts after the first one
    pub retries: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retries: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            backoff: config.backoff(),
        }
    }
}

/// Classification of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The worker produced a file
    Success(String),
    /// The worker answered with an error; retrying would get the same answer
    Terminal(AppError),
    /// No usable answer arrived; worth another attempt
    Transient(ChannelError),
}

/// Map the raw result of one request/reply round trip to its outcome
pub fn classify_attempt(result: std::result::Result<Vec<u8>, ChannelError>) -> AttemptOutcome {
    match result {
        Ok(bytes) => match Reply::decode_lenient(&bytes) {
            Reply::Ok { file_url } => AttemptOutcome::Success(file_url),
            Reply::Error { code, detail } => AttemptOutcome::Terminal(AppError::Worker { code, detail }),
        },
        Err(fault) => AttemptOutcome::Transient(fault),
    }
}

/// Publishes jobs and awaits their correlated replies
pub struct Dispatcher {
    channel: Arc<dyn MessageChannel>,
    queue: String,
    policy: DispatchPolicy,
}

impl Dispatcher {
    /// Create a dispatcher publishing to the generation queue
    pub fn new(channel: Arc<dyn MessageChannel>, policy: DispatchPolicy) -> Self {
        Self::with_queue(channel, GENERATION_QUEUE, policy)
    }

    /// Create a dispatcher publishing to a custom queue
    pub fn with_queue(
        channel: Arc<dyn MessageChannel>,
        queue: impl Into<String>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            channel,
            queue: queue.into(),
            policy,
        }
    }

    /// Submit with the configured timeout and retry budget
    pub async fn submit_default(&self, job: &Job) -> Result<String> {
        self.submit(job, self.policy.timeout, self.policy.retries)
            .await
    }

    /// Publish `job` and wait for the worker's file URL.
    ///
    /// Makes at most `retries + 1` attempts, each bounded by `timeout`, with
    /// the configured backoff between them. A worker error reply ends the
    /// call immediately with that error.
    #[instrument(skip_all, fields(mode = job.mode(), queue = %self.queue))]
    pub async fn submit(&self, job: &Job, timeout: Duration, retries: u32) -> Result<String> {
        self.ensure_connected(timeout).await?;

        let payload = job.to_bytes()?;
        let attempts = retries.saturating_add(1);
        let mut last_fault: Option<ChannelError> = None;

        for attempt in 1..=attempts {
            let request = RpcRequest::new(self.queue.clone(), payload.clone(), timeout);
            let correlation_id = request.correlation_id;
            info!(attempt, %correlation_id, "Publishing generation job");

            // the deadline covers the whole round trip, broker setup included
            let result = match tokio::time::timeout(timeout, self.channel.request(request)).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(timeout)),
            };

            match classify_attempt(result) {
                AttemptOutcome::Success(file_url) => {
                    info!(attempt, %correlation_id, "Generation job completed");
                    return Ok(file_url);
                }
                AttemptOutcome::Terminal(err) => {
                    warn!(attempt, %correlation_id, error = %err, "Worker rejected generation job");
                    return Err(err);
                }
                AttemptOutcome::Transient(fault) => {
                    warn!(attempt, %correlation_id, error = %fault, "No reply from worker");
                    last_fault = Some(fault);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        let last_fault = last_fault
            .map(|fault| fault.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        error!(attempts, last_fault = %last_fault, "Giving up on generation job");
        Err(AppError::GatewayTimeout {
            attempts,
            last_fault,
        })
    }

    async fn ensure_connected(&self, timeout: Duration) -> Result<()> {
        let connected = match tokio::time::timeout(timeout, self.channel.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Connection(format!(
                "no connection within {:?}",
                timeout
            ))),
        };
        connected.map_err(|e| {
            error!(error = %e, "Could not connect to the message broker");
            AppError::ChannelUnavailable(e.to_string())
        })
    }
}
