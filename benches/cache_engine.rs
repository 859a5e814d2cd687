//! Benchmarks for the response cache
//!
//! This benchmark measures:
//! - Hit latency on a warm cache
//! - Insert cost when every set forces an LRU eviction
//! - Request key derivation

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use voicegate::cache::{CacheConfig, CacheEngine, CacheKeyGenerator, SetOptions};
use voicegate::events::EventBus;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn open(rt: &tokio::runtime::Runtime, max_size_bytes: u64) -> CacheEngine {
    rt.block_on(CacheEngine::open(
        CacheConfig::new().with_max_size_bytes(max_size_bytes),
        EventBus::new(),
    ))
    .unwrap()
}

fn bench_get(c: &mut Criterion) {
    let rt = runtime();
    let cache = open(&rt, 64 * 1024 * 1024);
    let payload = Bytes::from(vec![7u8; 4096]);
    let keys: Vec<String> = (0..1024).map(|i| format!("voice-{}", i)).collect();
    for k in &keys {
        cache.set(k, payload.clone(), SetOptions::new());
    }

    let mut group = c.benchmark_group("cache_get");
    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        let mut i = 0usize;
        b.to_async(&rt).iter(|| {
            i = (i + 1) % keys.len();
            let key = &keys[i];
            let cache = &cache;
            async move { black_box(cache.get(key).await) }
        })
    });
    group.bench_function("miss", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(cache.get("absent").await) })
    });
    group.finish();
}

fn bench_set_with_eviction(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("cache_set_evicting");
    for size in [256usize, 4096, 65536] {
        // Room for exactly 128 entries, so every insert past warm-up evicts one.
        let cache = open(&rt, (size * 128) as u64);
        let payload = Bytes::from(vec![1u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                black_box(cache.set(&format!("k{}", i), payload.clone(), SetOptions::new()))
            })
        });
    }
    group.finish();
}

fn bench_key_generation(c: &mut Criterion) {
    let generator = CacheKeyGenerator::new();
    let mut query = BTreeMap::new();
    query.insert("page_size".to_string(), "100".to_string());
    query.insert("category".to_string(), "premade".to_string());
    let body = serde_json::json!({"text": "The quick brown fox", "model_id": "m1"});

    c.bench_function("cache_key_generate", |b| {
        b.iter(|| {
            generator.generate(
                black_box("POST"),
                black_box("https://api.example.com/v1/text-to-speech/voice1"),
                &query,
                Some(&body),
            )
        })
    });
}

criterion_group!(benches, bench_get, bench_set_with_eviction, bench_key_generation);
criterion_main!(benches);
