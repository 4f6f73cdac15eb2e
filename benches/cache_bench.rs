//! Benchmarks for the cache and the fetch coordinator.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use asset_fetch_cache::cache::{CacheKey, CostCache, UnitWeigher};
use asset_fetch_cache::fetch::FetchCoordinator;

fn keys(n: usize) -> Vec<CacheKey> {
    (0..n)
        .map(|i| CacheKey::new(format!("https://cdn.example.com/img/{i}.png")))
        .collect()
}

fn bench_put_with_eviction(c: &mut Criterion) {
    let keys = keys(20_000);

    c.bench_function("put_20k_into_10k_lru", |b| {
        b.iter(|| {
            let mut cache = CostCache::new(10_000, u64::MAX);
            for key in &keys {
                black_box(cache.put(key.clone(), (), 1));
            }
        })
    });
}

fn bench_get_hits(c: &mut Criterion) {
    let keys = keys(10_000);
    let mut cache = CostCache::new(10_000, u64::MAX);
    for key in &keys {
        cache.put(key.clone(), 0u64, 1);
    }

    c.bench_function("get_hit_10k", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(cache.get(key));
            }
        })
    });
}

fn bench_coordinator_hits(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let keys = keys(1_000);
    let coordinator = FetchCoordinator::new(CostCache::new(1_000, u64::MAX), UnitWeigher);
    for key in &keys {
        coordinator.insert(key.clone(), 7u64);
    }

    c.bench_function("coordinator_request_hit_1k", |b| {
        b.iter(|| {
            runtime.block_on(async {
                for key in &keys {
                    let lookup = coordinator.request(key.clone(), |_| async { Ok(0u64) });
                    black_box(lookup.is_cached());
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_put_with_eviction,
    bench_get_hits,
    bench_coordinator_hits,
);
criterion_main!(benches);
