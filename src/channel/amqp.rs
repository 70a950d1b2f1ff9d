//! # RabbitMQ Message Channel
//!
//! AMQP 0.9.1 implementation of [`MessageChannel`] using the `lapin` crate.
//!
//! ## Request/reply
//!
//! Every request declares its own server-named, exclusive, auto-delete reply
//! queue and consumes it without acks. The request is published to the
//! durable work queue with `reply_to` set to that queue and
//! `correlation_id` set to the request id. Once the reply arrives or the
//! deadline fires, the reply consumer is cancelled and the queue deleted;
//! a late reply is then routed nowhere and discarded by the broker.
//!
//! ## Consumers
//!
//! Each subscription gets a dedicated AMQP channel with a prefetch limit,
//! handles one delivery at a time and acks only after the reply is
//! published.

use async_trait::async_trait;
use dashmap::DashSet;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::traits::{
    ChannelError, MessageChannel, MessageHandler, RpcRequest, Subscription,
};

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

impl AmqpSession {
    /// A channel-level exception closes the channel but not the connection
    fn is_usable(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// RabbitMQ-backed [`MessageChannel`]
pub struct AmqpChannel {
    url: String,
    prefetch: u16,
    session: RwLock<Option<Arc<AmqpSession>>>,
    connect_lock: tokio::sync::Mutex<()>,
    declared_queues: DashSet<String>,
    consumers: Mutex<Vec<AbortHandle>>,
}

impl AmqpChannel {
    /// Create a channel for the broker at `url`. Nothing is opened until
    /// [`MessageChannel::connect`] is called.
    pub fn new(url: impl Into<String>, prefetch: u16) -> Self {
        Self {
            url: url.into(),
            prefetch: prefetch.max(1),
            session: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            declared_queues: DashSet::new(),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Broker URL with credentials hidden, for logging
    pub fn url_redacted(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}***{}", &self.url[..scheme_end + 3], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }

    fn session(&self) -> Result<Arc<AmqpSession>, ChannelError> {
        self.session
            .read()
            .as_ref()
            .filter(|s| s.is_usable())
            .cloned()
            .ok_or(ChannelError::NotConnected)
    }

    /// Declare a durable work queue once per connection
    async fn ensure_queue(&self, channel: &Channel, queue: &str) -> Result<(), ChannelError> {
        if self.declared_queues.contains(queue) {
            return Ok(());
        }

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ChannelError::Transport(format!("declare '{}' failed: {}", queue, e)))?;

        self.declared_queues.insert(queue.to_string());
        Ok(())
    }

    /// Declare a reply queue, publish `request` and wait for its reply.
    ///
    /// Has no deadline of its own; if the caller drops the future the
    /// `ReplyQueue` guard tears the reply queue down.
    async fn round_trip(
        &self,
        session: &AmqpSession,
        request: RpcRequest,
    ) -> Result<Vec<u8>, ChannelError> {
        self.ensure_queue(&session.channel, &request.queue).await?;

        let transport = |e: lapin::Error| ChannelError::Transport(e.to_string());

        let declared = session
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;

        let mut reply_queue = ReplyQueue {
            channel: session.channel.clone(),
            queue: declared.name().as_str().to_string(),
            consumer_tag: None,
            released: false,
        };

        let correlation_id = request.correlation_id.to_string();
        let consumer_tag = format!("rpc-{}", correlation_id);
        let mut consumer = session
            .channel
            .basic_consume(
                &reply_queue.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;
        reply_queue.consumer_tag = Some(consumer_tag);

        let published = session
            .channel
            .basic_publish(
                "",
                &request.queue,
                BasicPublishOptions::default(),
                &request.payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into())
                    .with_reply_to(reply_queue.queue.as_str().into())
                    .with_correlation_id(correlation_id.as_str().into()),
            )
            .await;
        let confirmed = match published {
            Ok(confirm) => confirm.await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = confirmed {
            reply_queue.release().await;
            return Err(ChannelError::Publish {
                queue: request.queue,
                message: e.to_string(),
            });
        }

        let mut outcome = Err(ChannelError::ReplyDropped);
        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    outcome = Err(transport(e));
                    break;
                }
            };
            let matches = delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str() == correlation_id)
                .unwrap_or(false);
            if matches {
                outcome = Ok(delivery.data);
                break;
            }
            debug!(%correlation_id, "Ignoring reply with foreign correlation id");
        }

        reply_queue.release().await;
        outcome
    }
}

/// Reply queue of one in-flight request.
///
/// `release` tears it down inline; if the owning future is dropped first,
/// `Drop` schedules the same teardown on the runtime.
struct ReplyQueue {
    channel: Channel,
    queue: String,
    consumer_tag: Option<String>,
    released: bool,
}

impl ReplyQueue {
    async fn release(mut self) {
        self.released = true;
        teardown_reply_queue(self.channel.clone(), self.queue.clone(), self.consumer_tag.take())
            .await;
    }
}

impl Drop for ReplyQueue {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(teardown_reply_queue(
                self.channel.clone(),
                self.queue.clone(),
                self.consumer_tag.take(),
            ));
        }
    }
}

async fn teardown_reply_queue(channel: Channel, queue: String, consumer_tag: Option<String>) {
    if let Some(tag) = consumer_tag {
        if let Err(e) = channel.basic_cancel(&tag, BasicCancelOptions::default()).await {
            debug!(consumer_tag = %tag, error = %e, "Reply consumer cancel failed");
        }
    }
    if let Err(e) = channel
        .queue_delete(&queue, QueueDeleteOptions::default())
        .await
    {
        debug!(queue = %queue, error = %e, "Reply queue delete failed");
    }
}

#[async_trait]
impl MessageChannel for AmqpChannel {
    async fn connect(&self) -> Result<(), ChannelError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        // a session whose channel died still holds an open connection
        let stale = self.session.write().take();
        if let Some(stale) = stale {
            if stale.connection.status().connected() {
                if let Err(e) = stale.connection.close(200, "reconnecting").await {
                    debug!(error = %e, "Stale broker connection did not close cleanly");
                }
            }
        }

        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name("gen-dispatch".into()),
        )
        .await
        .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| ChannelError::Connection(format!("channel creation failed: {}", e)))?;

        self.declared_queues.clear();
        *self.session.write() = Some(Arc::new(AmqpSession { connection, channel }));
        info!(url = %self.url_redacted(), "Connected to message broker");
        Ok(())
    }

    async fn close(&self) {
        let session = self.session.write().take();

        for handle in self.consumers.lock().drain(..) {
            handle.abort();
        }

        if let Some(session) = session {
            if let Err(e) = session.connection.close(200, "closing").await {
                warn!(error = %e, "Broker connection did not close cleanly");
            } else {
                info!("Broker connection closed");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|s| s.is_usable())
            .unwrap_or(false)
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        let session = self.session()?;
        self.ensure_queue(&session.channel, queue).await?;

        let publish_err = |e: lapin::Error| ChannelError::Publish {
            queue: queue.to_string(),
            message: e.to_string(),
        };

        session
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, ChannelError> {
        let session = self.session()?;
        self.ensure_queue(&session.channel, queue).await?;

        let subscribe_err = |e: lapin::Error| ChannelError::Subscribe {
            queue: queue.to_string(),
            message: e.to_string(),
        };

        let channel = session
            .connection
            .create_channel()
            .await
            .map_err(subscribe_err)?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(subscribe_err)?;

        let consumer_tag = format!("worker-{}", Uuid::new_v4());
        let mut consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_err)?;

        let queue_name = queue.to_string();
        let handle = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let mut delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        warn!(queue = %queue_name, error = %e, "Consumer stream failed");
                        break;
                    }
                };

                let payload = std::mem::take(&mut delivery.data);
                let reply = handler.handle(payload).await;

                if let Some(reply_to) = delivery.properties.reply_to() {
                    let mut properties =
                        BasicProperties::default().with_content_type("application/json".into());
                    if let Some(correlation_id) = delivery.properties.correlation_id() {
                        properties = properties.with_correlation_id(correlation_id.clone());
                    }

                    match channel
                        .basic_publish(
                            "",
                            reply_to.as_str(),
                            BasicPublishOptions::default(),
                            &reply,
                            properties,
                        )
                        .await
                    {
                        Ok(confirm) => {
                            if let Err(e) = confirm.await {
                                warn!(reply_to = %reply_to.as_str(), error = %e, "Reply confirmation failed");
                            }
                        }
                        Err(e) => warn!(reply_to = %reply_to.as_str(), error = %e, "Reply publish failed"),
                    }
                }

                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(queue = %queue_name, error = %e, "Ack failed");
                }
            }
            warn!(queue = %queue_name, "Broker consumer stopped");
        });

        self.consumers.lock().push(handle.abort_handle());
        info!(queue = %queue, consumer_tag = %consumer_tag, "Subscribed to broker queue");
        Ok(Subscription::new(handle))
    }

    async fn request(&self, request: RpcRequest) -> Result<Vec<u8>, ChannelError> {
        let session = self.session()?;
        let deadline = request.timeout;

        // reply queue setup and publish count against the deadline too
        match tokio::time::timeout(deadline, self.round_trip(&session, request)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(deadline)),
        }
    }
}
