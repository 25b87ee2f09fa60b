use beacon_cache::{Beacon, BeaconCache, CacheConfig, MemoryCodec, MemoryStore};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;

fn filled_cache(size: usize) -> BeaconCache {
    let cache = BeaconCache::new(Arc::new(MemoryStore::new()), CacheConfig::default());
    for i in 0..size {
        cache.insert(
            Beacon::new(format!("b{i}"), "post", format!("author{}", i % 10))
                .with_primes(&[2, 3, 5, 7, 11, 13][i % 3..i % 3 + 3]),
        );
    }
    cache
}

fn benchmark_author_lookup(c: &mut Criterion) {
    let cache = filled_cache(100);

    c.bench_function("author lookup", |b| {
        b.iter(|| cache.get_by_author("author5", Some("post")));
    });
}

fn benchmark_insertion(c: &mut Criterion) {
    let cache = BeaconCache::new(Arc::new(MemoryStore::new()), CacheConfig::default());
    let mut i = 0;

    c.bench_function("beacon insertion", |b| {
        b.iter(|| {
            cache.add_beacon(&json!({
                "beacon_id": format!("b{i}"),
                "author_id": "alice",
                "fingerprint": [1, 2, 3]
            }));
            i += 1;
        });
    });
}

fn benchmark_related_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_related");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let cache = filled_cache(size);
            b.iter(|| cache.find_related("b1"));
        });
    }
    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let codec = MemoryCodec::default();
    let mut beacon = codec
        .encoder()
        .encode_beacon("benchmark text for the decode chain", "alice", "post")
        .unwrap();
    let structural = beacon.to_value();
    beacon.metadata = None;
    beacon.signature = vec![0, 0, 0, 0];
    let numeric = beacon.to_value();

    c.bench_function("structural decode", |b| b.iter(|| codec.decode(&structural)));
    c.bench_function("prime decode", |b| b.iter(|| codec.decode(&numeric)));
}

criterion_group!(
    benches,
    benchmark_author_lookup,
    benchmark_insertion,
    benchmark_related_sizes,
    benchmark_decode
);
criterion_main!(benches);
