use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memo_cache::{
    CacheRegistry, Expires, KeyView, Lifetime, OperationKey, RegistryConfig, TimeUnit,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::thread;

const KEYS: u64 = 1000;

fn make_registry() -> CacheRegistry {
    CacheRegistry::init(RegistryConfig {
        workers: 2,
        ..RegistryConfig::default()
    })
}

fn op(name: &str) -> OperationKey {
    OperationKey::new("Bench", name, ["u64"])
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("View Operations");
    let registry = make_registry();

    // Hit path under each expiration mode
    for (name, lifetime) in [
        ("never", Lifetime::new().expires(Expires::Never)),
        (
            "fixed",
            Lifetime::new().expires(Expires::Fixed).interval(1, TimeUnit::Hours),
        ),
        (
            "accessed",
            Lifetime::new().expires(Expires::Accessed).interval(1, TimeUnit::Hours),
        ),
    ] {
        let view = registry
            .long_view(op(name), |k: &u64| Ok::<_, Infallible>(*k as i64), lifetime)
            .unwrap();
        for k in 0..KEYS {
            view.value(&k).unwrap();
        }

        group.bench_function(format!("value hit ({name})"), |b| {
            b.iter(|| {
                for k in 0..KEYS {
                    black_box(view.value(black_box(&k)).unwrap());
                }
            });
        });
    }

    let objects = registry
        .object_view(
            op("objects"),
            |k: &u64| Ok::<_, Infallible>(Arc::new(format!("value-{k}"))),
            Lifetime::new(),
        )
        .unwrap();
    for k in 0..KEYS {
        objects.value(&k).unwrap();
    }
    group.bench_function("value hit (object)", |b| {
        b.iter(|| {
            for k in 0..KEYS {
                black_box(objects.value(black_box(&k)).unwrap());
            }
        });
    });

    // Miss path: every iteration regenerates
    let misses = registry
        .int_view(op("misses"), |k: &u64| Ok::<_, Infallible>(*k as i32), Lifetime::new())
        .unwrap();
    group.bench_function("value miss", |b| {
        b.iter(|| {
            for k in 0..KEYS {
                misses.dirty(&k);
                black_box(misses.value(black_box(&k)).unwrap());
            }
        });
    });

    let puts = registry
        .int_view(op("puts"), |_: &u64| Ok::<_, Infallible>(0), Lifetime::new())
        .unwrap();
    group.bench_function("put", |b| {
        b.iter(|| {
            for k in 0..KEYS {
                puts.put(black_box(&k), k as i32);
            }
        });
    });

    group.finish();
}

pub fn contention_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Contention");
    let registry = make_registry();
    let view = registry
        .long_view(op("contended"), |k: &u64| Ok::<_, Infallible>(*k as i64), Lifetime::new())
        .unwrap();
    for k in 0..KEYS {
        view.value(&k).unwrap();
    }

    for threads in [2, 4, 8] {
        group.bench_function(format!("value hit ({threads} threads)"), |b| {
            b.iter(|| {
                thread::scope(|scope| {
                    for t in 0..threads {
                        let view = &view;
                        scope.spawn(move || {
                            for k in 0..KEYS {
                                black_box(view.value(&((k + t) % KEYS)).unwrap());
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark, contention_benchmark);
criterion_main!(benches);
