//! URL deduplication
//!
//! The seen-set only grows. Exact mode keeps every normalized URL in a
//! sharded concurrent set; probabilistic mode trades a bounded false
//! positive rate (some new URLs are wrongly skipped) for fixed memory.

use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

use crate::utils::{DEFAULT_BLOOM_EXPECTED_ITEMS, DEFAULT_BLOOM_FALSE_POSITIVE_RATE, NormalizedUrl};

/// Shards of the probabilistic filter
const BLOOM_SHARDS: usize = 16;

/// How the seen-set stores URLs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DedupMode {
    /// No false positives, memory grows with the URL count
    Exact,
    /// Sharded Bloom filter sized for `expected_items` at `false_positive_rate`
    Probabilistic {
        expected_items: usize,
        false_positive_rate: f64,
    },
}

impl Default for DedupMode {
    fn default() -> Self {
        Self::Exact
    }
}

impl DedupMode {
    #[must_use]
    pub fn probabilistic_default() -> Self {
        Self::Probabilistic {
            expected_items: DEFAULT_BLOOM_EXPECTED_ITEMS,
            false_positive_rate: DEFAULT_BLOOM_FALSE_POSITIVE_RATE,
        }
    }
}

/// One Bloom filter shard
#[derive(Debug)]
struct BloomShard {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomShard {
    /// m = -n ln(p) / ln(2)^2, k = m/n ln(2)
    fn new(num_items: usize, false_positive_rate: f64) -> Self {
        let n = num_items.max(1) as f64;
        let m = (-n * false_positive_rate.ln() / 2.0_f64.ln().powi(2)).ceil() as u64;
        let num_bits = m.max(64);
        let k = ((num_bits as f64 / n) * 2.0_f64.ln()).round() as u32;
        Self {
            bits: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes: k.clamp(1, 16),
        }
    }

    /// Set all bits for `item`; true when at least one was unset
    fn test_and_set(&mut self, item: &[u8]) -> bool {
        let mut newly_set = false;
        for seed in 0..self.num_hashes {
            let bit = xxh3_64_with_seed(item, u64::from(seed)) % self.num_bits;
            let word = &mut self.bits[(bit / 64) as usize];
            let mask = 1u64 << (bit % 64);
            if *word & mask == 0 {
                *word |= mask;
                newly_set = true;
            }
        }
        newly_set
    }
}

enum SeenStore {
    Exact(DashSet<String>),
    Probabilistic(Vec<Mutex<BloomShard>>),
}

/// Monotonic set of normalized URLs already admitted to the queue
pub struct SeenSet {
    store: SeenStore,
    admitted: AtomicU64,
}

impl SeenSet {
    #[must_use]
    pub fn new(mode: DedupMode) -> Self {
        let store = match mode {
            DedupMode::Exact => SeenStore::Exact(DashSet::new()),
            DedupMode::Probabilistic {
                expected_items,
                false_positive_rate,
            } => {
                let per_shard = expected_items.div_ceil(BLOOM_SHARDS);
                SeenStore::Probabilistic(
                    (0..BLOOM_SHARDS)
                        .map(|_| Mutex::new(BloomShard::new(per_shard, false_positive_rate)))
                        .collect(),
                )
            }
        };
        Self {
            store,
            admitted: AtomicU64::new(0),
        }
    }

    /// Atomic test-and-set: true exactly once per distinct URL
    ///
    /// In probabilistic mode a never-seen URL may be reported as seen with
    /// the configured false positive rate.
    pub fn should_ingest(&self, url: &NormalizedUrl) -> bool {
        let fresh = match &self.store {
            SeenStore::Exact(set) => set.insert(url.as_str().to_string()),
            SeenStore::Probabilistic(shards) => {
                let key = url.as_str().as_bytes();
                let shard = (xxh3_64(key) % shards.len() as u64) as usize;
                shards[shard].lock().test_and_set(key)
            }
        };
        if fresh {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Number of URLs admitted so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::UrlNormalizer;
    use std::sync::Arc;

    fn url(raw: &str) -> NormalizedUrl {
        UrlNormalizer::default().normalize(raw).expect("valid URL")
    }

    #[test]
    fn test_exact_admits_once() {
        let seen = SeenSet::new(DedupMode::Exact);
        assert!(seen.should_ingest(&url("http://a.com/1")));
        assert!(!seen.should_ingest(&url("http://a.com/1")));
        assert!(!seen.should_ingest(&url("HTTP://A.com/1#frag")));
        assert!(seen.should_ingest(&url("http://b.com/2")));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_probabilistic_admits_once() {
        let seen = SeenSet::new(DedupMode::Probabilistic {
            expected_items: 10_000,
            false_positive_rate: 0.001,
        });
        assert!(seen.should_ingest(&url("http://a.com/1")));
        assert!(!seen.should_ingest(&url("http://a.com/1")));
    }

    #[test]
    fn test_probabilistic_false_positive_rate_is_bounded() {
        let seen = SeenSet::new(DedupMode::Probabilistic {
            expected_items: 10_000,
            false_positive_rate: 0.01,
        });
        let mut rejected = 0;
        for i in 0..10_000 {
            if !seen.should_ingest(&url(&format!("http://site{i}.com/page/{i}"))) {
                rejected += 1;
            }
        }
        // generous bound over the configured 1%
        assert!(rejected < 300, "rejected {rejected} new URLs");
    }

    #[test]
    fn test_concurrent_test_and_set_admits_exactly_once() {
        let seen = Arc::new(SeenSet::new(DedupMode::Exact));
        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let seen = Arc::clone(&seen);
                    scope.spawn(move || {
                        (0..100)
                            .filter(|i| seen.should_ingest(&url(&format!("http://a.com/{i}"))))
                            .count()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread completes"))
                .sum()
        });
        assert_eq!(admitted, 100);
    }
}
