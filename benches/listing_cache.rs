use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use synctools_core::core::ListingCache;
use synctools_core::model::{AttributedList, Path, PathType, SessionId};
use tokio::runtime::Runtime;

fn directory(i: usize) -> Path {
    Path::from_absolute(&format!("/bench/dir_{i:05}"), PathType::Directory)
}

fn listing(parent: &Path, n_files: usize) -> AttributedList {
    AttributedList::new(
        (0..n_files)
            .map(|i| Path::child(parent, &format!("file_{i:04}.dat"), PathType::File))
            .collect(),
    )
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_hit");

    for size in [10, 100, 1000] {
        let cache = ListingCache::new(SessionId::new(), size);
        let references: Vec<_> = (0..size)
            .map(|i| {
                let dir = directory(i);
                let reference = cache.reference(&dir);
                cache.put(reference.clone(), listing(&dir, 20));
                reference
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for reference in &references {
                    black_box(cache.get(reference));
                }
            });
        });
    }
    group.finish();
}

fn bench_eviction_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_eviction_churn");

    // 写入量是容量的 4 倍，每次写入都会淘汰
    for capacity in [16, 256] {
        let dirs: Vec<_> = (0..capacity * 4).map(directory).collect();
        group.throughput(Throughput::Elements(dirs.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let cache = ListingCache::new(SessionId::new(), capacity);
                for dir in &dirs {
                    cache.put(cache.reference(dir), listing(dir, 4));
                }
                black_box(cache.len())
            });
        });
    }
    group.finish();
}

fn bench_get_or_fetch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache_get_or_fetch");

    let cache = ListingCache::new(SessionId::new(), 100);
    let dir = directory(0);
    let reference = cache.reference(&dir);
    cache.put(reference.clone(), listing(&dir, 100));
    let (cache, reference, dir) = (&cache, &reference, &dir);

    group.bench_function("hit", |b| {
        b.to_async(&rt).iter(|| async move {
            let list = cache
                .get_or_fetch(reference, || async { Ok(AttributedList::default()) })
                .await
                .unwrap();
            black_box(list)
        });
    });

    group.bench_function("miss", |b| {
        b.to_async(&rt).iter(|| async move {
            cache.invalidate(reference);
            let list = cache
                .get_or_fetch(reference, || async move { Ok(listing(dir, 100)) })
                .await
                .unwrap();
            black_box(list)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_eviction_churn,
    bench_get_or_fetch
);
criterion_main!(benches);
