//! Persistent cache survives a dispatcher restart.

mod common;

use common::MockServerFixture;
use voicegate::cache::{CacheConfig, Priority};
use voicegate::{Dispatcher, Method, RequestOptions};

fn persistent_cache(dir: &std::path::Path) -> CacheConfig {
    CacheConfig::new()
        .with_max_size_bytes(1024 * 1024)
        .with_persistence(dir)
}

#[tokio::test]
async fn test_persisted_entry_is_served_after_restart() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_json("GET", "/voices", 200, r#"{"voices":["a","b"]}"#, 1)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let opts = RequestOptions::new()
        .persist(true)
        .with_priority(Priority::High);

    {
        let config = fixture.config().with_cache(persistent_cache(dir.path()));
        let dispatcher = Dispatcher::new(config).await.unwrap();
        let first = dispatcher
            .request(Method::GET, "/voices", opts.clone())
            .await
            .unwrap();
        assert!(!first.from_cache);
        dispatcher.shutdown().await;
    }
    assert!(dir.path().join("manifest.json").exists());

    let config = fixture.config().with_cache(persistent_cache(dir.path()));
    let dispatcher = Dispatcher::new(config).await.unwrap();
    // Metadata (including size) is registered on open; the payload loads on first access.
    assert_eq!(dispatcher.cache().len(), 1);
    assert_eq!(
        dispatcher.cache().resident_bytes(),
        r#"{"voices":["a","b"]}"#.len() as u64
    );

    let again = dispatcher
        .request(Method::GET, "/voices", opts)
        .await
        .unwrap();
    assert!(again.from_cache);
    assert_eq!(again.text(), r#"{"voices":["a","b"]}"#);
    mock.assert_async().await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_plain_get_persists_when_cache_is_persistent() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture.mock_json("GET", "/voices", 200, r#"{"voices":[]}"#, 1).await;
    let dir = tempfile::tempdir().unwrap();

    {
        let config = fixture.config().with_cache(persistent_cache(dir.path()));
        let dispatcher = Dispatcher::new(config).await.unwrap();
        assert!(!dispatcher.get("/voices").await.unwrap().from_cache);
        dispatcher.shutdown().await;
    }

    let config = fixture.config().with_cache(persistent_cache(dir.path()));
    let dispatcher = Dispatcher::new(config).await.unwrap();
    assert_eq!(dispatcher.cache().len(), 1);
    let again = dispatcher.get("/voices").await.unwrap();
    assert!(again.from_cache);
    assert_eq!(again.text(), r#"{"voices":[]}"#);
    mock.assert_async().await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_opted_out_entries_do_not_survive_restart() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture.mock_json("GET", "/models", 200, "[]", 2).await;
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..2 {
        let config = fixture.config().with_cache(persistent_cache(dir.path()));
        let dispatcher = Dispatcher::new(config).await.unwrap();
        let resp = dispatcher
            .request(Method::GET, "/models", RequestOptions::new().persist(false))
            .await
            .unwrap();
        assert!(!resp.from_cache);
        dispatcher.shutdown().await;
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_corrupt_manifest_degrades_to_empty_cache() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture.mock_json("GET", "/user", 200, "{}", 1).await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("manifest.json"), b"{not json").unwrap();

    let config = fixture.config().with_cache(persistent_cache(dir.path()));
    let dispatcher = Dispatcher::new(config).await.unwrap();
    assert!(dispatcher.cache().is_empty());
    assert!(dispatcher.metrics().cache.io_errors >= 1);

    dispatcher.get("/user").await.unwrap();
    mock.assert_async().await;
    dispatcher.shutdown().await;
}
