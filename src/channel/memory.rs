//! # In-Memory Message Channel
//!
//! Process-local channel for tests and single-process development.
//!
//! - **Competing consumers**: every subscription on a queue pulls from the
//!   same receiver, one message at a time.
//! - **Correlated replies**: waiting requests are parked in a map keyed by
//!   correlation id; the entry is removed when the waiter goes away, so a
//!   late reply finds nothing and is dropped.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::traits::{
    ChannelError, MessageChannel, MessageHandler, RpcRequest, Subscription,
};

/// Message as it sits in a queue
#[derive(Debug)]
struct Envelope {
    payload: Vec<u8>,
    /// Set when the publisher waits for a reply
    correlation_id: Option<Uuid>,
}

struct MemoryQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    published: Arc<AtomicU64>,
}

impl MemoryQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            published: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Default)]
struct Inner {
    connected: AtomicBool,
    queues: DashMap<String, MemoryQueue>,
    pending: DashMap<Uuid, oneshot::Sender<Vec<u8>>>,
    consumers: Mutex<Vec<AbortHandle>>,
    orphaned: AtomicU64,
}

impl Inner {
    fn deliver_reply(&self, correlation_id: Uuid, reply: Vec<u8>) {
        match self.pending.remove(&correlation_id) {
            Some((_, waiter)) => {
                if waiter.send(reply).is_err() {
                    self.orphaned.fetch_add(1, Ordering::Relaxed);
                    debug!(%correlation_id, "Waiter vanished, dropping reply");
                }
            }
            None => {
                self.orphaned.fetch_add(1, Ordering::Relaxed);
                debug!(%correlation_id, "No waiter for reply, dropping it");
            }
        }
    }
}

/// Removes a pending-reply entry when the waiting request goes away
struct PendingReply {
    inner: Arc<Inner>,
    correlation_id: Uuid,
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.correlation_id);
    }
}

/// In-memory implementation of [`MessageChannel`]
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    inner: Arc<Inner>,
}

impl InMemoryChannel {
    /// Create a new, not yet connected channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently waiting for a reply
    pub fn pending_replies(&self) -> usize {
        self.inner.pending.len()
    }

    /// Replies that arrived after their waiter had given up
    pub fn orphaned_replies(&self) -> u64 {
        self.inner.orphaned.load(Ordering::Relaxed)
    }

    /// Total messages ever published to `queue`
    pub fn published_count(&self, queue: &str) -> u64 {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.published.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ChannelError::NotConnected)
        }
    }

    fn enqueue(&self, queue: &str, envelope: Envelope) -> Result<(), ChannelError> {
        let entry = self
            .inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(MemoryQueue::new);

        entry.tx.send(envelope).map_err(|_| ChannelError::Publish {
            queue: queue.to_string(),
            message: "queue receiver closed".to_string(),
        })?;
        entry.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn receiver(&self, queue: &str) -> Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>> {
        self.inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(MemoryQueue::new)
            .rx
            .clone()
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn connect(&self) -> Result<(), ChannelError> {
        if !self.inner.connected.swap(true, Ordering::SeqCst) {
            info!("In-memory channel connected");
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        for handle in self.inner.consumers.lock().drain(..) {
            handle.abort();
        }
        // Dropping the senders wakes every waiter with a transport fault
        self.inner.pending.clear();
        self.inner.queues.clear();
        info!("In-memory channel closed");
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.enqueue(
            queue,
            Envelope {
                payload,
                correlation_id: None,
            },
        )
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, ChannelError> {
        self.ensure_connected()?;

        let rx = self.receiver(queue);
        let inner = self.inner.clone();
        let queue_name = queue.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let envelope = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(envelope) = envelope else {
                    break;
                };

                let reply = handler.handle(envelope.payload).await;
                if let Some(correlation_id) = envelope.correlation_id {
                    inner.deliver_reply(correlation_id, reply);
                }
            }
            debug!(queue = %queue_name, "In-memory consumer stopped");
        });

        self.inner.consumers.lock().push(handle.abort_handle());
        debug!(queue = %queue, "Subscribed to in-memory queue");
        Ok(Subscription::new(handle))
    }

    async fn request(&self, request: RpcRequest) -> Result<Vec<u8>, ChannelError> {
        self.ensure_connected()?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request.correlation_id, tx);
        let _pending = PendingReply {
            inner: self.inner.clone(),
            correlation_id: request.correlation_id,
        };

        self.enqueue(
            &request.queue,
            Envelope {
                payload: request.payload,
                correlation_id: Some(request.correlation_id),
            },
        )?;

        match tokio::time::timeout(request.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChannelError::ReplyDropped),
            Err(_) => Err(ChannelError::Timeout(request.timeout)),
        }
    }
}
