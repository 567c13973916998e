//! FNV-1a key hashing with the post-mix used throughout the store.
//!
//! The map backing [`crate::store::TransientStore`] hashes raw key bytes
//! rather than relying on the standard library's `SipHash`-based default,
//! so that the hash of a given key is reproducible across processes (useful
//! if persistence or cross-process sharing is ever added on top of this
//! crate). The algorithm is plain FNV-1a followed by a fixed xor-shift mix,
//! applied once after the byte loop completes.
use std::hash::{BuildHasherDefault, Hasher};

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes `bytes` with FNV-1a and the fixed post-mix.
pub fn fnv1a_mix(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    mix(hash)
}

fn mix(mut hash: u32) -> u32 {
    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);
    hash
}

/// `Hasher` wrapper around [`fnv1a_mix`] for use as a map `BuildHasher`.
///
/// Unlike the one-shot `fnv1a_mix` function, a `Hasher` may see `write`
/// called more than once per key; each call folds its bytes into the
/// running FNV-1a state, and the post-mix is applied once in `finish`.
#[derive(Default)]
pub struct FnvMixHasher {
    state: u32,
}

impl Hasher for FnvMixHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut hash = if self.state == 0 { FNV_OFFSET_BASIS } else { self.state };
        for &b in bytes {
            hash ^= b as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        self.state = hash;
    }

    fn finish(&self) -> u64 {
        mix(self.state) as u64
    }
}

/// `BuildHasher` for [`FnvMixHasher`], usable as a `DashMap`/`HashMap` hasher.
pub type FnvMixBuildHasher = BuildHasherDefault<FnvMixHasher>;
