//! Unit tests for the in-memory channel's request/reply bookkeeping

use async_trait::async_trait;
use gen_dispatch::channel::{ChannelError, InMemoryChannel, MessageChannel, MessageHandler, RpcRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Replies with its own name after a fixed delay
struct SlowNamed {
    name: &'static str,
    delay: Duration,
    handled: AtomicUsize,
}

impl SlowNamed {
    fn new(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            delay,
            handled: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MessageHandler for SlowNamed {
    async fn handle(&self, _payload: Vec<u8>) -> Vec<u8> {
        tokio::time::sleep(self.delay).await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        self.name.as_bytes().to_vec()
    }
}

async fn connected() -> InMemoryChannel {
    let channel = InMemoryChannel::new();
    channel.connect().await.unwrap();
    channel
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_releases_its_waiter() {
    let channel = connected().await;
    let handler = SlowNamed::new("slow", Duration::from_secs(5));
    channel.subscribe("generation", handler.clone()).await.unwrap();

    let err = channel
        .request(RpcRequest::new("generation", b"{}".to_vec(), Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert_eq!(err, ChannelError::Timeout(Duration::from_secs(1)));
    assert_eq!(channel.pending_replies(), 0);

    // let the worker finish; its reply has nobody to go to
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    assert_eq!(channel.orphaned_replies(), 1);
    assert_eq!(channel.pending_replies(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_requests_do_not_accumulate() {
    let channel = connected().await;

    for _ in 0..5 {
        let result = channel
            .request(RpcRequest::new("generation", b"{}".to_vec(), Duration::from_millis(100)))
            .await;
        assert!(matches!(result, Err(ChannelError::Timeout(_))));
    }

    assert_eq!(channel.pending_replies(), 0);
    assert_eq!(channel.published_count("generation"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_releases_its_waiter() {
    let channel = connected().await;

    let pending = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .request(RpcRequest::new("generation", vec![], Duration::from_secs(60)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(channel.pending_replies(), 1);

    pending.abort();
    let _ = pending.await;
    assert_eq!(channel.pending_replies(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_competing_consumers_share_the_queue() {
    let channel = connected().await;
    let first = SlowNamed::new("first", Duration::from_millis(50));
    let second = SlowNamed::new("second", Duration::from_millis(50));
    channel.subscribe("generation", first.clone()).await.unwrap();
    channel.subscribe("generation", second.clone()).await.unwrap();

    let requests = (0..4).map(|_| {
        let channel = channel.clone();
        async move {
            channel
                .request(RpcRequest::new("generation", vec![], Duration::from_secs(5)))
                .await
        }
    });
    let replies = futures::future::join_all(requests).await;

    assert!(replies.iter().all(|r| r.is_ok()));
    assert_eq!(
        first.handled.load(Ordering::SeqCst) + second.handled.load(Ordering::SeqCst),
        4
    );
    assert!(first.handled.load(Ordering::SeqCst) > 0);
    assert!(second.handled.load(Ordering::SeqCst) > 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_waiters() {
    let channel = connected().await;

    let pending = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .request(RpcRequest::new("generation", vec![], Duration::from_secs(60)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    channel.close().await;
    let result = pending.await.unwrap();

    assert_eq!(result, Err(ChannelError::ReplyDropped));
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_publish_without_reply() {
    let channel = connected().await;
    let handler = SlowNamed::new("sink", Duration::ZERO);
    channel.subscribe("events", handler.clone()).await.unwrap();

    channel.publish("events", b"one".to_vec()).await.unwrap();
    channel.publish("events", b"two".to_vec()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while handler.handled.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(channel.orphaned_replies(), 0);
}
