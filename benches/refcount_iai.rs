#[cfg(target_os = "linux")]
mod bench {
    use iai::black_box;
    use refcnt_audit::{Config, DebugFlags, HolderTag, RefCount};

    const TAG: HolderTag = HolderTag::Site("iai");

    fn churn(cfg: Config) {
        let rc = RefCount::with_config(cfg);
        for _ in 0..10_000 {
            let t = rc.hold(TAG).unwrap();
            black_box(rc.release(t));
        }
    }

    // Atomic-only path.
    pub fn refcount_untracked_10k() {
        churn(Config::untracked());
    }

    // Holder index plus stack capture.
    pub fn refcount_audit_10k() {
        churn(Config::new(DebugFlags::AUDIT).stack_depth(8));
    }

    // Everything on, small ring so eviction runs constantly.
    pub fn refcount_all_small_ring_10k() {
        churn(Config::new(DebugFlags::ALL).stack_depth(8).history_capacity(16));
    }
}

#[cfg(target_os = "linux")]
use bench::{refcount_all_small_ring_10k, refcount_audit_10k, refcount_untracked_10k};

#[cfg(target_os = "linux")]
iai::main!(
    refcount_untracked_10k,
    refcount_audit_10k,
    refcount_all_small_ring_10k
);

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("Skipping: iai benches require Linux/valgrind.");
}
