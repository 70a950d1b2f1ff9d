//! Common traits and types for message channels

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Transport-level failures of a message channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("channel is not connected")]
    NotConnected,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("publish to '{queue}' failed: {message}")]
    Publish { queue: String, message: String },

    #[error("subscribe to '{queue}' failed: {message}")]
    Subscribe { queue: String, message: String },

    #[error("reply destination closed before a reply arrived")]
    ReplyDropped,

    #[error("transport fault: {0}")]
    Transport(String),
}

/// A request published with reply correlation
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// Work queue the request is published to
    pub queue: String,
    /// Identity routing exactly one reply back to this request
    pub correlation_id: Uuid,
    /// Serialized job
    pub payload: Vec<u8>,
    /// How long to wait for the reply
    pub timeout: Duration,
}

impl RpcRequest {
    /// Create a request with a fresh correlation id
    pub fn new(queue: impl Into<String>, payload: Vec<u8>, timeout: Duration) -> Self {
        Self {
            queue: queue.into(),
            correlation_id: Uuid::new_v4(),
            payload,
            timeout,
        }
    }
}

/// Running consumer started by [`MessageChannel::subscribe`].
///
/// Dropping the handle leaves the consumer running.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Resolves once the consumer has stopped, whether its stream ended,
    /// the broker dropped it or the channel was closed.
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}

/// Consumer side of a subscription.
///
/// The returned bytes are published as the reply when the incoming message
/// asked for one. Implementations must not panic; anything they want the
/// caller to see has to be encoded in the reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>) -> Vec<u8>;
}

/// Publish/subscribe transport with request/reply correlation
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Establish the connection. Calling it on a connected channel is a no-op.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Tear down the connection and every subscription.
    ///
    /// Idempotent, and a no-op on a channel that never connected.
    async fn close(&self);

    /// Whether the connection is currently usable
    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish to a named queue
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Start consuming a named queue, one message at a time, with `handler`
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, ChannelError>;

    /// Publish `request` and wait for the single correlated reply.
    ///
    /// The per-request reply destination is released on every return path,
    /// including timeout and cancellation of the returned future.
    async fn request(&self, request: RpcRequest) -> Result<Vec<u8>, ChannelError>;
}
