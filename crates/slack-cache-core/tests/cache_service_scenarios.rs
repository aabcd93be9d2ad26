#![allow(clippy::unwrap_used, clippy::panic)]

use serde_json::json;
use slack_cache_core::{
    BoundedCache, BoundedCacheConfig, CacheServiceConfig, CacheServiceDependencies,
    CacheServiceFactory, CacheWrite, DisposeReason, DomainCacheConfig, InstanceMetrics,
    SearchCache, SearchCacheConfig, SetOptions, SlackQueryParser,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_channel_ceiling_evicts_exactly_once() {
    let config = CacheServiceConfig {
        channels: DomainCacheConfig::new(3, 60_000),
        ..CacheServiceConfig::default()
    };
    let service = CacheServiceFactory::create(config, CacheServiceDependencies::default()).unwrap();

    for id in ["C1", "C2", "C3", "C4"] {
        service
            .get_channel_cache()
            .set(id.to_string(), json!({ "id": id }), SetOptions::default());
    }

    let channels = service
        .get_cache_instances()
        .into_iter()
        .find(|info| info.name == "channels")
        .unwrap();
    assert_eq!(channels.size, 3);
    match channels.metrics {
        InstanceMetrics::Lru(metrics) => {
            assert_eq!(metrics.evictions, 1);
            assert_eq!(metrics.size, 3);
        },
        InstanceMetrics::Search(_) => panic!("channels is an lru cache"),
    }
    assert!(!service.get_channel_cache().has(&"C1".to_string()));
}

#[test]
fn test_case_and_spacing_variants_share_an_entry() {
    let cache = SearchCache::new(
        SearchCacheConfig {
            adaptive_ttl: false,
            result_ttl_ms: 1000,
            ..SearchCacheConfig::default()
        },
        Arc::new(SlackQueryParser::new()),
    )
    .unwrap();

    cache.set(CacheWrite::new("hello world", vec![json!({"id": "1"})]).total_count(1));
    let hit = cache.get("HELLO   WORLD", None).unwrap();
    assert_eq!(hit.results, vec![json!({"id": "1"})]);
    assert_eq!(cache.get_metrics().result_hits, 1);
}

#[test]
fn test_search_entries_expire_with_result_ttl() {
    let cache = SearchCache::new(
        SearchCacheConfig {
            adaptive_ttl: false,
            result_ttl_ms: 50,
            ..SearchCacheConfig::default()
        },
        Arc::new(SlackQueryParser::new()),
    )
    .unwrap();

    cache.set(CacheWrite::new("standup", vec![json!({})]));
    assert!(cache.get("standup", None).is_some());
    std::thread::sleep(Duration::from_millis(100));
    assert!(cache.get("standup", None).is_none());
}

#[test]
fn test_dispose_sees_every_departure() {
    let seen: Arc<Mutex<Vec<(String, DisposeReason)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let cache: BoundedCache<String, u32> = BoundedCache::builder(BoundedCacheConfig {
        max: 2,
        ..BoundedCacheConfig::default()
    })
    .on_dispose(move |_value: &u32, key: &String, reason| {
        sink.lock().unwrap().push((key.clone(), reason));
    })
    .build()
    .unwrap();

    cache.set("a".into(), 1, SetOptions::default());
    cache.set("a".into(), 2, SetOptions::default());
    cache.set("b".into(), 3, SetOptions::default());
    cache.set("c".into(), 4, SetOptions::default());
    cache.delete(&"b".to_string());

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            ("a".to_string(), DisposeReason::Set),
            ("a".to_string(), DisposeReason::Evict),
            ("b".to_string(), DisposeReason::Delete),
        ]
    );
}

#[tokio::test]
async fn test_maintenance_keeps_live_entries() {
    let config = CacheServiceConfig {
        users: DomainCacheConfig::new(10, 30),
        ..CacheServiceConfig::default()
    };
    let service = CacheServiceFactory::create(config, CacheServiceDependencies::default()).unwrap();
    service.initialize().await.unwrap();

    service
        .get_user_cache()
        .set("U1".into(), json!({}), SetOptions::default());
    service.get_channel_cache().set(
        "C1".into(),
        json!({}),
        SetOptions::with_ttl(Duration::ZERO),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;

    service.perform_maintenance().await.unwrap();
    assert!(service.get_user_cache().is_empty());
    assert_eq!(service.get_channel_cache().len(), 1);
    assert_eq!(service.get_user_cache().get_metrics().expirations, 1);

    service.shutdown().await.unwrap();
    assert!(service.get_cache_instances().iter().all(|i| i.size == 0));
}
