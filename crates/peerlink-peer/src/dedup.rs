//! Recently-seen message suppression.
//!
//! A bloom filter sized for a fixed number of items. Once that many items
//! have been recorded, the whole filter is swapped for an empty one, so memory
//! stays bounded and the false-positive rate never drifts above target.

use std::f64::consts::LN_2;
use std::hash::Hasher;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fnv::FnvHasher;
use tracing::debug;

/// Offset basis for the second hash; any odd constant distinct from FNV's own.
const SECOND_HASH_KEY: u64 = 0x9e37_79b9_7f4a_7c15;

/// Fixed-size bloom filter over byte strings.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Size a filter for `items` entries at `false_positive_rate`.
    pub fn with_estimates(items: usize, false_positive_rate: f64) -> Self {
        let items = items.max(1) as f64;
        let rate = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);

        let num_bits = (-(items * rate.ln()) / (LN_2 * LN_2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / items) * LN_2).round().max(1.0) as u32;

        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    pub fn insert(&mut self, item: &[u8]) {
        for bit in self.positions(item) {
            self.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// False positives possible, false negatives not.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item)
            .all(|bit| self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    // Kirsch-Mitzenmacher double hashing.
    fn positions(&self, item: &[u8]) -> impl Iterator<Item = u64> {
        let mut first = FnvHasher::default();
        first.write(item);
        let h1 = first.finish();

        let mut second = FnvHasher::with_key(SECOND_HASH_KEY);
        second.write(item);
        let h2 = second.finish() | 1;

        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}

struct DedupState {
    filter: BloomFilter,
    count: usize,
}

/// Thread-safe "have I seen this content recently" set.
pub struct DedupFilter {
    state: Mutex<DedupState>,
    capacity: usize,
    false_positive_rate: f64,
}

impl DedupFilter {
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        Self {
            state: Mutex::new(DedupState {
                filter: BloomFilter::with_estimates(capacity, false_positive_rate),
                count: 0,
            }),
            capacity: capacity.max(1),
            false_positive_rate,
        }
    }

    /// Remember `content`. Resets the filter first if it is full.
    pub fn record(&self, content: &[u8]) {
        let mut state = self.lock();
        if state.count >= self.capacity {
            debug!(capacity = self.capacity, "dedup filter full, resetting");
            state.filter = BloomFilter::with_estimates(self.capacity, self.false_positive_rate);
            state.count = 0;
        }
        state.filter.insert(content);
        state.count += 1;
    }

    pub fn might_contain(&self, content: &[u8]) -> bool {
        self.lock().filter.contains(content)
    }

    /// Items recorded since the last reset.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_matches_estimates() {
        let filter = BloomFilter::with_estimates(100_000, 0.001);
        // m = -n ln p / (ln 2)^2, k = m/n ln 2
        assert!((1_437_000..1_439_000).contains(&filter.num_bits()));
        assert_eq!(filter.num_hashes(), 10);
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::with_estimates(1_000, 0.01);
        for i in 0..1_000u32 {
            filter.insert(&i.to_be_bytes());
        }
        for i in 0..1_000u32 {
            assert!(filter.contains(&i.to_be_bytes()));
        }
    }

    #[test]
    fn false_positive_rate_near_target() {
        let mut filter = BloomFilter::with_estimates(10_000, 0.001);
        for i in 0..10_000u64 {
            filter.insert(format!("seen-{i}").as_bytes());
        }
        let false_positives = (0..10_000u64)
            .filter(|i| filter.contains(format!("fresh-{i}").as_bytes()))
            .count();
        assert!(false_positives < 50, "{false_positives} false positives");
    }

    #[test]
    fn record_then_contains() {
        let dedup = DedupFilter::new(16, 0.001);
        assert!(dedup.is_empty());
        assert!(!dedup.might_contain(b"tx-1"));

        dedup.record(b"tx-1");

        assert!(dedup.might_contain(b"tx-1"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn resets_when_full() {
        let dedup = DedupFilter::new(4, 0.001);
        for item in [&b"a"[..], b"b", b"c", b"d"] {
            dedup.record(item);
        }
        assert_eq!(dedup.len(), 4);

        dedup.record(b"e");

        assert_eq!(dedup.len(), 1);
        assert!(dedup.might_contain(b"e"));
    }

    #[test]
    fn concurrent_records() {
        let dedup = std::sync::Arc::new(DedupFilter::new(10_000, 0.001));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let dedup = std::sync::Arc::clone(&dedup);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        dedup.record(&(t * 1_000 + i).to_be_bytes());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dedup.len(), 2_000);
        assert!(dedup.might_contain(&3_499u32.to_be_bytes()));
    }
}
