use criterion::{criterion_group, criterion_main, Criterion};
use folio_reactive::{Computed, Concurrency, Effect, LiveData, RetryPolicy, Scope};
use std::hint::black_box;

fn bench_live_data_set_10_subscribers(c: &mut Criterion) {
    let data = LiveData::new(0u64);
    let subs: Vec<_> = (0..10).map(|_| data.subscribe(|v| {
        black_box(*v);
    })).collect();

    let mut n = 0u64;
    c.bench_function("live_data_set_10_subscribers", |b| {
        b.iter(|| {
            n += 1;
            black_box(data.set(n));
        })
    });
    drop(subs);
}

fn bench_live_data_equal_set(c: &mut Criterion) {
    let data = LiveData::new(vec![1u32; 64]);
    let same = vec![1u32; 64];

    c.bench_function("live_data_equal_set_64", |b| {
        b.iter(|| black_box(data.set(black_box(same.clone()))))
    });
}

fn bench_computed_merge(c: &mut Criterion) {
    let left = LiveData::new(vec![0u32; 5]);
    let right = LiveData::new(vec![0u32; 20]);
    let merged = Computed::from2(&left, &right, |l: &Vec<u32>, r: &Vec<u32>| {
        l.iter().chain(r.iter()).take(10).copied().collect::<Vec<_>>()
    });

    let mut n = 0u32;
    c.bench_function("computed_recompute_capped_10", |b| {
        b.iter(|| {
            n += 1;
            left.set(vec![n; 5]);
            black_box(merged.get());
        })
    });
}

fn bench_effect_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let scope = Scope::new("bench");

    c.bench_function("effect_merge_dispatch_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let effect = Effect::new(
                    "bench.noop",
                    Concurrency::Merge,
                    &scope,
                    RetryPolicy::none(),
                    |n: u32, _ctx| async move {
                        black_box(n);
                    },
                );
                for n in 0..100 {
                    effect.invoke(n);
                }
                effect.settled().await;
            });
        })
    });
}

criterion_group!(
    benches,
    bench_live_data_set_10_subscribers,
    bench_live_data_equal_set,
    bench_computed_merge,
    bench_effect_dispatch,
);
criterion_main!(benches);
