//! Rate-limit admission and connection-pool bounds.

mod common;

use common::{drain, MockServerFixture};
use std::sync::Arc;
use std::time::{Duration, Instant};
use voicegate::resilience::rate_limiter::RateLimitConfig;
use voicegate::{DispatchEvent, Dispatcher, Method, RequestOptions};

#[tokio::test]
async fn test_third_request_waits_for_window_reset() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture.mock_json("POST", "/sound-generation", 200, "{}", 3).await;
    let window = Duration::from_millis(1000);
    let config = fixture
        .config()
        .with_rate_limit(RateLimitConfig::new(2, window));

    // The window opens when the dispatcher is built.
    let window_start = Instant::now();
    let dispatcher = Dispatcher::new(config).await.unwrap();
    let mut rx = dispatcher.subscribe();

    let body = serde_json::json!({"text": "rain"});
    for _ in 0..3 {
        dispatcher.post("/sound-generation", &body).await.unwrap();
    }
    assert!(window_start.elapsed() >= window);
    mock.assert_async().await;

    let m = dispatcher.metrics();
    assert_eq!(m.rate_limited, 1);
    assert_eq!(m.responses, 3);
    let waits: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            DispatchEvent::RateLimited { wait_ms, .. } => Some(wait_ms),
            _ => None,
        })
        .collect();
    assert_eq!(waits.len(), 1);
    assert!(waits[0] <= 1000);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_retries_do_not_consume_extra_budget() {
    let mut fixture = MockServerFixture::new().await;
    let _fail = fixture.mock_json("GET", "/voices", 502, "bad gateway", 1).await;
    let _ok = fixture.mock_json("GET", "/voices", 200, "[]", 1).await;
    let config = fixture
        .config()
        .with_rate_limit(RateLimitConfig::new(1, Duration::from_secs(60)));
    let dispatcher = Dispatcher::new(config).await.unwrap();

    let resp = dispatcher.get("/voices").await.unwrap();
    assert_eq!(resp.retry_count, 1);
    assert_eq!(dispatcher.metrics().rate_limited, 0);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_cache_hits_bypass_rate_limit() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture.mock_json("GET", "/models", 200, "[]", 1).await;
    let config = fixture
        .config()
        .with_rate_limit(RateLimitConfig::new(1, Duration::from_secs(60)));
    let dispatcher = Dispatcher::new(config).await.unwrap();

    for _ in 0..5 {
        dispatcher.get("/models").await.unwrap();
    }
    assert_eq!(dispatcher.metrics().rate_limited, 0);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_rate_limit_waiters() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture.mock_json("GET", "/user", 200, "{}", 1).await;
    let config = fixture
        .config()
        .with_rate_limit(RateLimitConfig::new(1, Duration::from_secs(60)));
    let dispatcher = Arc::new(Dispatcher::new(config).await.unwrap());
    let mut rx = dispatcher.subscribe();

    dispatcher
        .request(Method::GET, "/user", RequestOptions::new().no_cache())
        .await
        .unwrap();
    let d = dispatcher.clone();
    let waiting = tokio::spawn(async move {
        d.request(Method::GET, "/user", RequestOptions::new().no_cache())
            .await
    });
    loop {
        if let DispatchEvent::RateLimited { .. } = rx.recv().await.unwrap() {
            break;
        }
    }
    dispatcher.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(voicegate::Error::Shutdown { .. })));
}

#[tokio::test]
async fn test_pool_bounds_concurrent_streams() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .server
        .mock("GET", "/history/audio")
        .with_body("abc")
        .expect_at_least(1)
        .create_async()
        .await;
    let config = fixture.config().with_max_concurrent(1);
    let dispatcher = Arc::new(Dispatcher::new(config).await.unwrap());

    let held = dispatcher
        .request_stream(Method::GET, "/history/audio", RequestOptions::new())
        .await
        .unwrap();

    // The only pool slot is held by `held`, so a second call must queue.
    let d = dispatcher.clone();
    let queued = tokio::spawn(async move {
        d.request_stream(Method::GET, "/history/audio", RequestOptions::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!queued.is_finished());

    drop(held);
    let second = tokio::time::timeout(Duration::from_secs(5), queued)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&second.collect().await.unwrap()[..], b"abc");
    dispatcher.shutdown().await;
}
