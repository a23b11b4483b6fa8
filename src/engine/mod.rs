//! The in-memory data engine: hash map, order-statistic tree, sorted set,
//! TTL heap, and the top-level entry/database composition, all addressed
//! through the stable-index arena in [`slab`].

mod avl;
mod entry;
mod hashmap;
mod heap;
mod zset;

pub(crate) use entry::Database;

use std::hash::Hasher;

use ahash::AHasher;

/// Fast non-cryptographic hash used by both the key index and zset name
/// index. Not a security boundary — this is a single-tenant, unauthenticated
/// in-memory cache, and the hash never crosses the wire.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = AHasher::default();
    hasher.write(bytes);
    hasher.finish()
}
