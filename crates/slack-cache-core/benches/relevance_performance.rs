//! Benchmarks for relevance scoring and cache throughput

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};
use slack_cache_core::{
    BoundedCache, BoundedCacheConfig, CacheWrite, RelevanceConfig, RelevanceScorer, SearchCache,
    SearchCacheConfig, SetOptions, SlackQueryParser, json_size,
};
use std::sync::Arc;

// Channel-like traffic with a mix of engagement signals
fn create_messages(count: usize) -> Vec<Value> {
    let bodies = [
        "deploy to prod finished, rollback plan in the runbook",
        "urgent: database failover triggered <!here>",
        "lunch options for friday?",
        "<@U024BE7LH> can you review the cache eviction PR",
        "incident retro notes are in the doc",
    ];
    (0..count)
        .map(|i| {
            json!({
                "user": format!("U{:04}", i % 17),
                "text": format!("{} #{i}", bodies[i % bodies.len()]),
                "ts": format!("{}.{:06}", 1_700_000_000 + i * 60, i),
                "reactions": [{"name": "eyes", "count": i % 6}],
                "reply_count": i % 4,
            })
        })
        .collect()
}

fn bench_relevance(c: &mut Criterion) {
    let scorer = RelevanceScorer::new(RelevanceConfig::default()).expect("scorer");
    let mut group = c.benchmark_group("relevance");

    for size in [10, 100] {
        let messages = create_messages(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("calculate", size), &messages, |b, msgs| {
            b.iter(|| {
                scorer
                    .calculate_relevance(black_box(msgs), black_box("deploy rollback"))
                    .expect("relevance")
            });
        });
    }

    group.finish();
}

fn bench_bounded_cache(c: &mut Criterion) {
    let cache: BoundedCache<String, Value> = BoundedCache::builder(BoundedCacheConfig {
        max: 1000,
        max_size: Some(4 * 1024 * 1024),
        ..BoundedCacheConfig::default()
    })
    .size_calculator(|value: &Value, _key: &String| json_size(value))
    .build()
    .expect("cache");
    let messages = create_messages(2000);

    c.bench_function("bounded_cache_set_with_eviction", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let msg = &messages[i % messages.len()];
            cache.set(format!("C{i}"), msg.clone(), SetOptions::default());
            i += 1;
        });
    });

    c.bench_function("bounded_cache_get_hit", |b| {
        cache.set("hot".into(), json!({"name": "general"}), SetOptions::default());
        let key = "hot".to_string();
        b.iter(|| black_box(cache.get(black_box(&key))));
    });
}

fn bench_search_cache(c: &mut Criterion) {
    let cache = SearchCache::new(SearchCacheConfig::default(), Arc::new(SlackQueryParser::new()))
        .expect("search cache");
    cache.set(CacheWrite::new(
        "deploy in:#ops from:@alice after:2024-01-01",
        create_messages(20),
    ));

    let mut group = c.benchmark_group("search_cache");
    for query in [
        "deploy in:#ops from:@alice after:2024-01-01",
        "after:2024-01-01   FROM:@alice in:#ops Deploy",
        "missing query",
    ] {
        group.bench_with_input(BenchmarkId::new("get", query), &query, |b, q| {
            b.iter(|| black_box(cache.get(black_box(q), None)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_relevance, bench_bounded_cache, bench_search_cache);
criterion_main!(benches);
