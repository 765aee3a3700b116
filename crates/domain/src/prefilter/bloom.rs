//! Negative-lookup Bloom filter.
//!
//! Answers `definitely absent` / `possibly present` for packet
//! signatures; the absent verdict is authoritative and the present one is
//! advisory. Insertion is an atomic OR into a word-addressed bit array, so
//! the data plane can query while the control plane inserts; removal is
//! unsupported, and the owning facade rebuilds the filter when enough
//! removals accumulate or selectivity degrades.

use std::sync::atomic::{AtomicU64, Ordering};

const LN2: f64 = std::f64::consts::LN_2;

/// Minimum bit-array size, so degenerate parameters still hash somewhere.
const MIN_BITS: u64 = 64;

#[derive(Debug)]
pub struct BloomFilter {
    words: Box<[AtomicU64]>,
    /// Bit-array size `m`.
    bits: u64,
    /// Hash count `k`.
    hashes: u32,
    /// Distinct-ish insertion count (callers may insert duplicates; this
    /// only feeds the load estimate, not correctness).
    insertions: AtomicU64,
    /// False-positive rate the parameters were derived for.
    target_fp_rate: f64,
}

impl BloomFilter {
    /// Size the filter for `expected_items` insertions at
    /// `target_fp_rate` using the standard optima
    /// `m = ceil(-n ln p / (ln 2)^2)` and `k = ceil((m / n) ln 2)`.
    pub fn with_rate(expected_items: u32, target_fp_rate: f64) -> Self {
        let n = f64::from(expected_items.max(1));
        let p = target_fp_rate.clamp(1e-9, 0.5);
        let m = (-(n * p.ln()) / (LN2 * LN2)).ceil() as u64;
        let k = ((m as f64 / n) * LN2).ceil() as u32;
        Self::with_params(m, k, p)
    }

    /// Construct with explicit bit and hash counts.
    pub fn with_params(bits: u64, hashes: u32, target_fp_rate: f64) -> Self {
        let bits = bits.max(MIN_BITS);
        let words = (bits.div_ceil(64)) as usize;
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
            bits,
            hashes: hashes.max(1),
            insertions: AtomicU64::new(0),
            target_fp_rate,
        }
    }

    /// An empty filter with the same parameters, for rebuilds.
    pub fn fresh_like(&self) -> Self {
        Self::with_params(self.bits, self.hashes, self.target_fp_rate)
    }

    /// An empty filter with doubled capacity, for saturation recovery.
    pub fn grown(&self) -> Self {
        Self::with_params(self.bits.saturating_mul(2), self.hashes, self.target_fp_rate)
    }

    pub fn bit_len(&self) -> u64 {
        self.bits
    }

    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    pub fn target_fp_rate(&self) -> f64 {
        self.target_fp_rate
    }

    /// Set the `k` bits for `item`. Idempotent; safe under concurrent
    /// readers (release-ordered OR).
    pub fn insert(&self, item: &[u8]) {
        for bit in self.bit_positions(item) {
            let (word, mask) = Self::address(bit);
            self.words[word].fetch_or(mask, Ordering::Release);
        }
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    /// `false` means definitely absent; `true` means possibly present.
    pub fn possibly_contains(&self, item: &[u8]) -> bool {
        self.bit_positions(item).all(|bit| {
            let (word, mask) = Self::address(bit);
            self.words[word].load(Ordering::Relaxed) & mask != 0
        })
    }

    // ── Introspection feeding the rebuild policy ───────────────────

    /// Number of set bits.
    pub fn set_bits(&self) -> u64 {
        self.words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum()
    }

    /// Every bit set: every query answers possibly-present.
    pub fn is_saturated(&self) -> bool {
        // Tail bits beyond `bits` are never set, so compare against `bits`.
        self.set_bits() >= self.bits
    }

    /// Current false-positive probability estimate `(set / m)^k`.
    pub fn estimated_fp_rate(&self) -> f64 {
        let load = self.set_bits() as f64 / self.bits as f64;
        load.powi(self.hashes as i32)
    }

    /// Standard cardinality estimate `-(m / k) ln(1 - set / m)`.
    pub fn approximate_len(&self) -> u64 {
        let m = self.bits as f64;
        let set = self.set_bits() as f64;
        if set >= m {
            return self.insertions.load(Ordering::Relaxed);
        }
        (-(m / f64::from(self.hashes)) * (1.0 - set / m).ln()).round() as u64
    }

    pub fn insertions(&self) -> u64 {
        self.insertions.load(Ordering::Relaxed)
    }

    // ── Private helpers ────────────────────────────────────────────

    fn address(bit: u64) -> (usize, u64) {
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }

    /// Derive the `k` probe positions from two base hashes:
    /// `h_i(x) = h1(x) + i * (h2(x) + i + 1) mod m`. Two real hash
    /// evaluations regardless of `k`.
    fn bit_positions(&self, item: &[u8]) -> impl Iterator<Item = u64> {
        let h1 = fnv1a(item);
        let h2 = splitmix(item);
        let bits = self.bits;
        (0..u64::from(self.hashes)).map(move |i| {
            h1.wrapping_add(i.wrapping_mul(h2.wrapping_add(i + 1))) % bits
        })
    }
}

impl Clone for BloomFilter {
    fn clone(&self) -> Self {
        Self {
            words: self
                .words
                .iter()
                .map(|w| AtomicU64::new(w.load(Ordering::Relaxed)))
                .collect(),
            bits: self.bits,
            hashes: self.hashes,
            insertions: AtomicU64::new(self.insertions.load(Ordering::Relaxed)),
            target_fp_rate: self.target_fp_rate,
        }
    }
}

/// FNV-1a, the first base hash.
fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// Byte-folding hash run through the splitmix64 finalizer, the second
/// base hash. Deliberately unrelated to FNV so the double-hash probe
/// sequence behaves like independent functions.
fn splitmix(data: &[u8]) -> u64 {
    let mut acc = 0x9E37_79B9_7F4A_7C15u64;
    for &byte in data {
        acc = acc.wrapping_add(u64::from(byte)).rotate_left(7) ^ 0x2545_F491_4F6C_DD1D;
    }
    let mut z = acc;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
