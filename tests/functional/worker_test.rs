//! Functional tests for the worker executor

use gen_dispatch::channel::MessageHandler;
use gen_dispatch::dispatch::Reply;
use gen_dispatch::worker::{PassthroughResolver, WorkerExecutor};
use serde_json::json;
use std::sync::Arc;

use crate::support::{FailingResolver, RecordingResolver, StubImages};

fn executor(images: Arc<StubImages>) -> WorkerExecutor {
    WorkerExecutor::new(images, Arc::new(PassthroughResolver))
}

async fn handle(executor: &WorkerExecutor, payload: serde_json::Value) -> Reply {
    let bytes = executor.handle(payload.to_string().into_bytes()).await;
    serde_json::from_slice(&bytes).expect("worker reply must always decode")
}

#[tokio::test]
async fn test_text_to_image_reply() {
    let images = Arc::new(StubImages::returning("https://x/img1.png"));
    let reply = handle(
        &executor(images.clone()),
        json!({"mode": "text-to-image", "prompt": "a red fox", "aspect_ratio": "1:1"}),
    )
    .await;

    assert_eq!(reply, Reply::ok("https://x/img1.png"));
    let calls = images.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "a red fox");
    assert_eq!(calls[0].options.aspect_ratio, "1:1");
    assert!(calls[0].image_urls.is_empty());
}

#[tokio::test]
async fn test_unknown_mode_is_400() {
    let images = Arc::new(StubImages::returning("https://x/unused.png"));
    let reply = handle(&executor(images.clone()), json!({"mode": "upscale", "prompt": "x"})).await;

    match reply {
        Reply::Error { code, detail } => {
            assert_eq!(code, 400);
            assert!(detail.contains("upscale"));
        }
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(images.call_count(), 0);
}

#[tokio::test]
async fn test_missing_mode_is_400() {
    let images = Arc::new(StubImages::returning("https://x/unused.png"));
    let reply = handle(&executor(images), json!({"prompt": "x"})).await;
    assert!(matches!(reply, Reply::Error { code: 400, .. }));
}

#[tokio::test]
async fn test_garbage_payload_still_gets_a_reply() {
    let images = Arc::new(StubImages::returning("https://x/unused.png"));
    let bytes = executor(images).handle(b"\xff\xfe not json".to_vec()).await;
    let reply: Reply = serde_json::from_slice(&bytes).unwrap();
    assert!(matches!(reply, Reply::Error { code: 400, .. }));
}

#[tokio::test]
async fn test_upstream_status_propagates() {
    let images = Arc::new(StubImages::failing(400, "prompt rejected"));
    let reply = handle(
        &executor(images),
        json!({"mode": "text-to-image", "prompt": "a red fox"}),
    )
    .await;

    assert_eq!(reply, Reply::error(400, "FAL error: prompt rejected"));
}

#[tokio::test]
async fn test_panicking_backend_becomes_500() {
    let images = Arc::new(StubImages::panicking());
    let reply = handle(
        &executor(images),
        json!({"mode": "text-to-image", "prompt": "a red fox"}),
    )
    .await;

    assert_eq!(reply, Reply::error(500, "image client exploded"));
}

#[tokio::test]
async fn test_panicking_resolver_becomes_500() {
    let images = Arc::new(StubImages::returning("https://x/unused.png"));
    let executor = WorkerExecutor::new(images.clone(), Arc::new(FailingResolver));
    let reply = handle(
        &executor,
        json!({"mode": "edit", "prompt": "p", "image_url": "/media/a.png"}),
    )
    .await;

    assert!(matches!(reply, Reply::Error { code: 500, .. }));
    assert_eq!(images.call_count(), 0);
}

#[tokio::test]
async fn test_edit_modes_use_resolved_url() {
    for mode in ["edit", "filter", "adjust"] {
        let images = Arc::new(StubImages::returning("https://x/edited.png"));
        let resolver = Arc::new(RecordingResolver::default());
        let executor = WorkerExecutor::new(images.clone(), resolver.clone());

        let reply = handle(
            &executor,
            json!({
                "mode": mode,
                "prompt": "warmer",
                "image_url": "/media/u1/a.png",
                "image_path": "/srv/media/u1/a.png"
            }),
        )
        .await;

        assert_eq!(reply, Reply::ok("https://x/edited.png"));
        assert_eq!(
            resolver.seen.lock().as_slice(),
            &[("/media/u1/a.png".to_string(), Some("/srv/media/u1/a.png".to_string()))]
        );
        let calls = images.calls.lock();
        assert_eq!(calls[0].image_urls, vec!["https://public.example/media/u1/a.png"]);
        assert_eq!(calls[0].options.aspect_ratio, "auto");
    }
}

#[tokio::test]
async fn test_compose_resolves_every_image() {
    let images = Arc::new(StubImages::returning("https://x/composed.png"));
    let resolver = Arc::new(RecordingResolver::default());
    let executor = WorkerExecutor::new(images.clone(), resolver.clone());

    let reply = handle(
        &executor,
        json!({
            "mode": "compose",
            "prompt": "put them together",
            "image_urls": ["/media/a.png", "/media/b.png"],
            "image_path": "/srv/media/a.png",
            "resolution": "2K"
        }),
    )
    .await;

    assert_eq!(reply, Reply::ok("https://x/composed.png"));
    assert_eq!(
        resolver.seen.lock().as_slice(),
        &[
            ("/media/a.png".to_string(), Some("/srv/media/a.png".to_string())),
            ("/media/b.png".to_string(), None),
        ]
    );
    let calls = images.calls.lock();
    assert_eq!(
        calls[0].image_urls,
        vec!["https://public.example/media/a.png", "https://public.example/media/b.png"]
    );
    assert_eq!(calls[0].options.resolution.as_deref(), Some("2K"));
}
