//! Deterministic seed derivation for bandit draws.
//!
//! Not cryptographic; meant for reproducible per-candidate sampling streams.

/// Stable (non-crypto) hash of `s` mixed with `seed`.
///
/// FNV-1a over the bytes, then a SplitMix64 finalizer for bit diffusion.
#[must_use]
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(seed ^ h)
}

/// Derive the `n`-th seed of a sequence rooted at `seed`.
#[must_use]
pub fn derive_seed(seed: u64, n: u64) -> u64 {
    splitmix64(seed.wrapping_add(n.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
