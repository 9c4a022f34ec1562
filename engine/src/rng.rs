//! Tagged deterministic draw streams.
//!
//! Each match derives one stream per tag (`"spawn"`, `"pellets"`,
//! `"shrink"`) and keeps it for the full match lifetime, so the order of
//! consumption within a tag is fully reproducible from the revealed seed.
//!
//! The generator is the classic Numerical Recipes LCG over 32-bit state:
//!
//! ```text
//! state ← (state × 1664525 + 1013904223) mod 2^32
//! ```
//!
//! seeded from the first four big-endian bytes of
//! `SHA-256(seed_hex || ":" || tag)`. Seeding goes through SHA-256 (never a
//! string hash) so independent implementations agree byte-for-byte.

use sha2::{Digest, Sha256};

use petri_types::SEED_LEN;

const LCG_MUL: u32 = 1_664_525;
const LCG_ADD: u32 = 1_013_904_223;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// A lazy infinite sequence of uniform reals in `[0, 1)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawStream {
    state: u32,
}

impl DrawStream {
    /// Derive the stream for `tag` from raw seed bytes.
    pub fn new(seed: &[u8; SEED_LEN], tag: &str) -> Self {
        Self::from_seed_hex(&hex::encode(seed), tag)
    }

    /// Derive the stream for `tag` from the published hex form of the seed.
    pub fn from_seed_hex(seed_hex: &str, tag: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed_hex.as_bytes());
        hasher.update(b":");
        hasher.update(tag.as_bytes());
        let digest = hasher.finalize();
        let state = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self { state }
    }

    #[cfg(test)]
    fn with_state(state: u32) -> Self {
        Self { state }
    }

    /// Next uniform real in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(LCG_MUL).wrapping_add(LCG_ADD);
        f64::from(self.state) / TWO_POW_32
    }

    /// Uniform integer in `[lo, hi)`. `lo < hi` is a caller invariant.
    pub fn next_range(&mut self, lo: i64, hi: i64) -> i64 {
        debug_assert!(lo < hi);
        let span = (hi - lo) as f64;
        lo + (self.next_unit() * span) as i64
    }

    /// Uniform point in a disk of the given radius, centered at the origin.
    /// Consumes exactly two uniforms: angle first, then radius.
    pub fn next_in_disk(&mut self, radius: f64) -> (f64, f64) {
        let theta = 2.0 * std::f64::consts::PI * self.next_unit();
        let r = radius * self.next_unit().sqrt();
        (r * theta.cos(), r * theta.sin())
    }

    /// Bernoulli draw with probability `p`. Consumes exactly one uniform.
    pub fn next_bool(&mut self, p: f64) -> bool {
        self.next_unit() < p
    }
}
