//! Top-level entry and database, grounded on `main.cpp`'s `Entry`/`g_data`.

use crate::errors::DispatchError;

use super::hash_bytes;
use super::hashmap::{HashChain, HashIndex};
use super::heap::{HeapRef, TtlHeap};
use crate::slab::Slab;
use super::zset::ZSet;

const IDLE_EVICTION_CAP: usize = 2000;

#[derive(Debug)]
enum EntryKind {
    Str(Vec<u8>),
    Zset(ZSet),
}

#[derive(Debug)]
struct Entry {
    key: Vec<u8>,
    hcode: u64,
    chain_next: Option<usize>,
    heap_slot: Option<usize>,
    kind: EntryKind,
}

impl HashChain for Entry {
    fn hcode(&self) -> u64 {
        self.hcode
    }
    fn chain_next(&self) -> Option<usize> {
        self.chain_next
    }
    fn set_chain_next(&mut self, next: Option<usize>) {
        self.chain_next = next;
    }
}

impl HeapRef for Entry {
    fn heap_slot(&self) -> Option<usize> {
        self.heap_slot
    }
    fn set_heap_slot(&mut self, slot: Option<usize>) {
        self.heap_slot = slot;
    }
}

/// The process-wide key/value store: one hash-indexed slab of entries plus
/// the TTL heap referencing into it.
pub(crate) struct Database {
    entries: Slab<Entry>,
    index: HashIndex,
    heap: TtlHeap,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            index: HashIndex::new(),
            heap: TtlHeap::new(),
        }
    }

    fn find(&mut self, key: &[u8]) -> Option<usize> {
        let hcode = hash_bytes(key);
        self.index.lookup(&mut self.entries, hcode, |e| e.key == key)
    }

    fn destroy(&mut self, idx: usize) {
        self.heap.remove(&mut self.entries, idx);
        let hcode = self.entries.get(idx).hcode;
        let key = self.entries.get(idx).key.clone();
        self.index.pop(&mut self.entries, hcode, |e| e.key == key);
        self.entries.remove(idx);
    }

    pub(crate) fn get(&mut self, key: &[u8]) -> Result<Option<&[u8]>, DispatchError> {
        let Some(idx) = self.find(key) else {
            return Ok(None);
        };
        match &self.entries.get(idx).kind {
            EntryKind::Str(value) => Ok(Some(value.as_slice())),
            EntryKind::Zset(_) => Err(DispatchError::Type),
        }
    }

    pub(crate) fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), DispatchError> {
        if let Some(idx) = self.find(key) {
            match &mut self.entries.get_mut(idx).kind {
                EntryKind::Str(existing) => {
                    existing.clear();
                    existing.extend_from_slice(value);
                    return Ok(());
                }
                EntryKind::Zset(_) => return Err(DispatchError::Type),
            }
        }
        let hcode = hash_bytes(key);
        let idx = self.entries.insert(Entry {
            key: key.to_vec(),
            hcode,
            chain_next: None,
            heap_slot: None,
            kind: EntryKind::Str(value.to_vec()),
        });
        self.index.insert(&mut self.entries, idx);
        Ok(())
    }

    pub(crate) fn del(&mut self, key: &[u8]) -> bool {
        let Some(idx) = self.find(key) else {
            return false;
        };
        self.destroy(idx);
        true
    }

    /// Sets (ttl_ms >= 0) or clears (ttl_ms < 0) a key's expiration. Returns
    /// `false` if the key does not exist.
    pub(crate) fn pexpire(&mut self, key: &[u8], ttl_ms: i64, now_micros: u64) -> bool {
        let Some(idx) = self.find(key) else {
            return false;
        };
        if ttl_ms < 0 {
            self.heap.remove(&mut self.entries, idx);
        } else {
            let deadline = now_micros.saturating_add(ttl_ms as u64 * 1000);
            self.heap.set_deadline(&mut self.entries, idx, deadline);
        }
        true
    }

    /// Remaining time to live in milliseconds: -2 if the key is absent, -1
    /// if present with no TTL, 0 if already past its deadline.
    pub(crate) fn pttl(&mut self, key: &[u8], now_micros: u64) -> i64 {
        let Some(idx) = self.find(key) else {
            return -2;
        };
        match self.entries.get(idx).heap_slot {
            None => -1,
            Some(_) => {
                let deadline = self
                    .heap
                    .deadline_of(&self.entries, idx)
                    .expect("heap_slot is Some, so the heap must hold a deadline for it");
                if deadline <= now_micros {
                    0
                } else {
                    ((deadline - now_micros) / 1000) as i64
                }
            }
        }
    }

    fn zset_mut(&mut self, key: &[u8]) -> Result<Option<&mut ZSet>, DispatchError> {
        let Some(idx) = self.find(key) else {
            return Ok(None);
        };
        match &mut self.entries.get_mut(idx).kind {
            EntryKind::Zset(z) => Ok(Some(z)),
            EntryKind::Str(_) => Err(DispatchError::Type),
        }
    }

    pub(crate) fn zadd(&mut self, key: &[u8], score: f64, name: &[u8]) -> Result<bool, DispatchError> {
        if !score.is_finite() {
            return Err(DispatchError::Arg);
        }
        if self.find(key).is_none() {
            let hcode = hash_bytes(key);
            let idx = self.entries.insert(Entry {
                key: key.to_vec(),
                hcode,
                chain_next: None,
                heap_slot: None,
                kind: EntryKind::Zset(ZSet::new()),
            });
            self.index.insert(&mut self.entries, idx);
        }
        let zset = self.zset_mut(key)?.expect("just inserted or already present");
        Ok(zset.add(name, score))
    }

    pub(crate) fn zrem(&mut self, key: &[u8], name: &[u8]) -> Result<Option<bool>, DispatchError> {
        let Some(zset) = self.zset_mut(key)? else {
            return Ok(None);
        };
        Ok(Some(zset.remove(name)))
    }

    pub(crate) fn zscore(&mut self, key: &[u8], name: &[u8]) -> Result<Option<f64>, DispatchError> {
        let Some(zset) = self.zset_mut(key)? else {
            return Ok(None);
        };
        Ok(zset.score(name))
    }

    pub(crate) fn zquery(
        &mut self,
        key: &[u8],
        score: f64,
        name: &[u8],
        offset: i64,
        limit: i64,
    ) -> Result<Vec<(Vec<u8>, f64)>, DispatchError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let Some(zset) = self.zset_mut(key)? else {
            return Ok(Vec::new());
        };
        Ok(zset.query(score, name, offset, limit as usize))
    }

    /// All entries as `(key, value)` pairs; ZSET entries contribute an
    /// empty value.
    pub(crate) fn keys(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(_, e)| {
                let value = match &e.kind {
                    EntryKind::Str(v) => v.clone(),
                    EntryKind::Zset(_) => Vec::new(),
                };
                (e.key.clone(), value)
            })
            .collect()
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.heap.peek_deadline()
    }

    /// Evicts at most [`IDLE_EVICTION_CAP`] entries whose TTL has passed.
    /// Returns the number evicted.
    pub(crate) fn sweep_expired(&mut self, now_micros: u64) -> usize {
        let expired = self.heap.pop_expired(&mut self.entries, now_micros, IDLE_EVICTION_CAP);
        let count = expired.len();
        for idx in expired {
            let hcode = self.entries.get(idx).hcode;
            let key = self.entries.get(idx).key.clone();
            self.index.pop(&mut self.entries, hcode, |e| e.key == key);
            self.entries.remove(idx);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_del_round_trip() {
        let mut db = Database::new();
        assert_eq!(db.get(b"foo").unwrap(), None);
        db.set(b"foo", b"bar").unwrap();
        assert_eq!(db.get(b"foo").unwrap(), Some(b"bar".as_slice()));
        assert!(db.del(b"foo"));
        assert!(!db.del(b"foo"));
        assert_eq!(db.get(b"foo").unwrap(), None);
    }

    #[test]
    fn set_over_zset_is_type_error() {
        let mut db = Database::new();
        db.zadd(b"s", 1.0, b"a").unwrap();
        assert_eq!(db.set(b"s", b"x"), Err(DispatchError::Type));
        assert_eq!(db.get(b"s"), Err(DispatchError::Type));
    }

    #[test]
    fn zadd_rejects_non_finite_score() {
        let mut db = Database::new();
        assert_eq!(db.zadd(b"s", f64::NAN, b"a"), Err(DispatchError::Arg));
        assert_eq!(db.zadd(b"s", f64::INFINITY, b"a"), Err(DispatchError::Arg));
    }

    #[test]
    fn zset_ops_on_string_key_are_type_errors() {
        let mut db = Database::new();
        db.set(b"k", b"v").unwrap();
        assert_eq!(db.zadd(b"k", 1.0, b"a"), Err(DispatchError::Type));
        assert_eq!(db.zrem(b"k", b"a"), Err(DispatchError::Type));
        assert_eq!(db.zscore(b"k", b"a"), Err(DispatchError::Type));
    }

    #[test]
    fn pexpire_and_pttl() {
        let mut db = Database::new();
        assert_eq!(db.pttl(b"missing", 0), -2);
        db.set(b"k", b"v").unwrap();
        assert_eq!(db.pttl(b"k", 0), -1);
        assert!(db.pexpire(b"k", 50, 1_000_000));
        assert_eq!(db.pttl(b"k", 1_000_000), 50);
        assert_eq!(db.pttl(b"k", 1_049_000), 1);
        assert_eq!(db.pttl(b"k", 1_051_000), 0);
        assert!(db.pexpire(b"k", -1, 1_000_000));
        assert_eq!(db.pttl(b"k", 1_000_000), -1);
    }

    #[test]
    fn sweep_expired_removes_only_due_entries() {
        let mut db = Database::new();
        db.set(b"a", b"1").unwrap();
        db.set(b"b", b"2").unwrap();
        db.pexpire(b"a", 10, 0);
        db.pexpire(b"b", 1_000_000, 0);
        assert_eq!(db.sweep_expired(20_000), 1);
        assert_eq!(db.get(b"a").unwrap(), None);
        assert_eq!(db.get(b"b").unwrap(), Some(b"2".as_slice()));
    }

    #[test]
    fn keys_lists_both_kinds() {
        let mut db = Database::new();
        db.set(b"str", b"v").unwrap();
        db.zadd(b"zs", 1.0, b"a").unwrap();
        let mut all = db.keys();
        all.sort();
        assert_eq!(
            all,
            vec![(b"str".to_vec(), b"v".to_vec()), (b"zs".to_vec(), Vec::new())]
        );
    }
}
