use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use refcnt_audit::{hash::HASH_NAME, Config, DebugFlags, HolderTag, RefCount};
use std::time::Duration;

const TAG: HolderTag = HolderTag::Site("bench");

fn modes() -> [(&'static str, Config); 4] {
    [
        ("untracked", Config::untracked()),
        ("audit", Config::new(DebugFlags::AUDIT)),
        ("logging", Config::new(DebugFlags::LOGGING)),
        ("audit+logging", Config::new(DebugFlags::ALL)),
    ]
}

fn bench_hold_release_pair(c: &mut Criterion) {
    for (name, cfg) in modes() {
        c.bench_function(&format!("refcount::hold_release_pair/{}", name), |b| {
            let rc = RefCount::with_config(cfg.stack_depth(8));
            b.iter(|| {
                let t = rc.hold(black_box(TAG)).unwrap();
                black_box(rc.release(t))
            })
        });
    }
}

fn bench_hold_10k_then_release(c: &mut Criterion) {
    for (name, cfg) in modes() {
        c.bench_function(&format!("refcount::hold_10k_then_release/{}/{}", name, HASH_NAME), |b| {
            b.iter_batched(
                || RefCount::with_config(cfg.stack_depth(8)),
                |rc| {
                    let mut toks = Vec::with_capacity(10_000);
                    for _ in 0..10_000 {
                        toks.push(rc.hold(TAG).unwrap());
                    }
                    // Release in reverse so the holder index shrinks from the newest id.
                    while let Some(t) = toks.pop() {
                        let _ = rc.release(t);
                    }
                    black_box(rc)
                },
                BatchSize::SmallInput,
            )
        });
    }
}

fn bench_transfer_1k(c: &mut Criterion) {
    c.bench_function("refcount::transfer_1k_audited", |b| {
        b.iter_batched(
            || {
                let dst = RefCount::with_config(Config::new(DebugFlags::ALL).stack_depth(4));
                let src = RefCount::with_config(Config::new(DebugFlags::ALL).stack_depth(4));
                let toks: Vec<_> = (0..1_000).map(|_| src.hold(TAG).unwrap()).collect();
                (dst, src, toks)
            },
            |(dst, src, toks)| {
                RefCount::transfer(&dst, &src);
                for t in toks {
                    let _ = dst.release(t);
                }
                black_box((dst, src))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(20)
        .measurement_time(Duration::from_secs(4))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches_hot;
    config = bench_config();
    targets = bench_hold_release_pair
}
criterion_group! {
    name = benches_bulk;
    config = bench_config();
    targets = bench_hold_10k_then_release, bench_transfer_1k
}
criterion_main!(benches_hot, benches_bulk);
