//! Hashing for the live-holder index.
//!
//! Keys are sequential token ids. Every index draws its own seed from a
//! process-wide sequence that starts at a random point, so counters created
//! back to back never share a bucket layout. Exactly one hasher feature must
//! be enabled: `wyhash-hash` (default), `xxh3-hash` or `random-state-hash`.

#[cfg(any(
    all(feature = "wyhash-hash", feature = "xxh3-hash"),
    all(
        feature = "random-state-hash",
        any(feature = "wyhash-hash", feature = "xxh3-hash")
    ),
))]
compile_error!("refcnt-audit: more than one holder-index hasher feature is enabled");

#[cfg(not(any(
    feature = "wyhash-hash",
    feature = "xxh3-hash",
    feature = "random-state-hash"
)))]
compile_error!(
    "refcnt-audit: enable one of 'wyhash-hash', 'xxh3-hash' or 'random-state-hash'"
);

/// Map from live token id to its holder record.
pub type HolderIndex<K, V> = std::collections::HashMap<K, V, IndexHashBuilder>;

#[cfg(feature = "random-state-hash")]
pub type IndexHashBuilder = std::collections::hash_map::RandomState;

#[cfg(not(feature = "random-state-hash"))]
pub type IndexHashBuilder = SeededIndexState;

/// Hasher behind [`HolderIndex`], for bench labels and diagnostics.
pub const HASH_NAME: &str = if cfg!(feature = "xxh3-hash") {
    "xxh3-hash"
} else if cfg!(feature = "random-state-hash") {
    "random-state-hash"
} else {
    "wyhash-hash"
};

#[cfg(not(feature = "random-state-hash"))]
pub use seeded::SeededIndexState;

#[cfg(not(feature = "random-state-hash"))]
mod seeded {
    use core::hash::BuildHasher;
    use core::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Per-index hash state seeded from [`next_seed`].
    #[derive(Clone)]
    pub struct SeededIndexState {
        #[cfg(feature = "wyhash-hash")]
        inner: wyhash::v1::WyHasherBuilder,
        #[cfg(feature = "xxh3-hash")]
        inner: xxhash_rust::xxh3::Xxh3Builder,
    }

    impl Default for SeededIndexState {
        fn default() -> Self {
            let seed = next_seed();
            Self {
                #[cfg(feature = "wyhash-hash")]
                inner: wyhash::v1::WyHasherBuilder::new(seed),
                #[cfg(feature = "xxh3-hash")]
                inner: xxhash_rust::xxh3::Xxh3Builder::new().with_seed(seed),
            }
        }
    }

    impl BuildHasher for SeededIndexState {
        #[cfg(feature = "wyhash-hash")]
        type Hasher = <wyhash::v1::WyHasherBuilder as BuildHasher>::Hasher;
        #[cfg(feature = "xxh3-hash")]
        type Hasher = <xxhash_rust::xxh3::Xxh3Builder as BuildHasher>::Hasher;

        #[inline]
        fn build_hasher(&self) -> Self::Hasher {
            self.inner.build_hasher()
        }
    }

    static BASE: spin::Once<u64> = spin::Once::new();
    static ISSUED: AtomicU64 = AtomicU64::new(0);

    pub(crate) fn next_seed() -> u64 {
        let base = *BASE.call_once(entropy);
        splitmix(base ^ ISSUED.fetch_add(1, Ordering::Relaxed))
    }

    fn entropy() -> u64 {
        let mut buf = [0u8; 8];
        match getrandom::getrandom(&mut buf) {
            Ok(()) => u64::from_le_bytes(buf),
            Err(e) => {
                log::warn!("holder-index seeds fall back to the clock: {}", e);
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_nanos() as u64);
                nanos ^ (u64::from(std::process::id()) << 32)
            }
        }
    }

    fn splitmix(mut z: u64) -> u64 {
        z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_accepts_sequential_keys() {
        let mut idx: HolderIndex<u64, u64> = HolderIndex::default();
        for k in 1..=1_000u64 {
            idx.insert(k, k * 2);
        }
        assert_eq!(idx.len(), 1_000);
        assert_eq!(idx.get(&500), Some(&1_000));
        assert!(HASH_NAME.ends_with("-hash"));
    }

    #[cfg(not(feature = "random-state-hash"))]
    #[test]
    fn each_index_gets_a_fresh_seed() {
        let seeds: std::collections::HashSet<u64> = (0..64).map(|_| seeded::next_seed()).collect();
        assert_eq!(seeds.len(), 64);
    }
}
