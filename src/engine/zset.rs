//! Sorted set: an order-statistic tree and a hash index sharing one slab of
//! nodes, grounded on `zset.cpp`/`zset.h`.

use std::cmp::Ordering;

use super::avl::{self, AvlNode};
use super::hashmap::{HashChain, HashIndex};
use crate::slab::Slab;
use super::hash_bytes as hash_name;

/// Total order over (score, name length, name bytes), matching the original
/// `zcmp`/`avl` comparison used throughout the tree.
fn key_cmp(score_a: f64, name_a: &[u8], score_b: f64, name_b: &[u8]) -> Ordering {
    match score_a.total_cmp(&score_b) {
        Ordering::Equal => name_a.len().cmp(&name_b.len()).then_with(|| name_a.cmp(name_b)),
        other => other,
    }
}

#[derive(Debug)]
struct ZNode {
    name: Vec<u8>,
    score: f64,
    hcode: u64,
    chain_next: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
    height: u32,
    count: u32,
}

impl HashChain for ZNode {
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

impl AvlNode for ZNode {
    fn left(&self) -> Option<usize> {
        self.left
    }
    fn set_left(&mut self, v: Option<usize>) {
        self.left = v;
    }
    fn right(&self) -> Option<usize> {
        self.right
    }
    fn set_right(&mut self, v: Option<usize>) {
        self.right = v;
    }
    fn parent(&self) -> Option<usize> {
        self.parent
    }
    fn set_parent(&mut self, v: Option<usize>) {
        self.parent = v;
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn set_height(&mut self, v: u32) {
        self.height = v;
    }
    fn count(&self) -> u32 {
        self.count
    }
    fn set_count(&mut self, v: u32) {
        self.count = v;
    }
    fn precedes(&self, other: &Self) -> bool {
        key_cmp(self.score, &self.name, other.score, &other.name) == Ordering::Less
    }
}

/// A single sorted set, keyed by member name with a `f64` score.
#[derive(Debug)]
pub(crate) struct ZSet {
    nodes: Slab<ZNode>,
    root: Option<usize>,
    index: HashIndex,
}

impl ZSet {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Slab::new(),
            root: None,
            index: HashIndex::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Inserts `name` with `score`, or repositions it if already present.
    /// Returns `true` if this created a new member.
    pub(crate) fn add(&mut self, name: &[u8], score: f64) -> bool {
        let hcode = hash_name(name);
        if let Some(idx) = self.index.lookup(&mut self.nodes, hcode, |n| n.name == name) {
            if self.nodes.get(idx).score != score {
                avl::delete(&mut self.nodes, &mut self.root, idx);
                self.nodes.get_mut(idx).score = score;
                avl::insert(&mut self.nodes, &mut self.root, idx);
            }
            false
        } else {
            let idx = self.nodes.insert(ZNode {
                name: name.to_vec(),
                score,
                hcode,
                chain_next: None,
                left: None,
                right: None,
                parent: None,
                height: 0,
                count: 0,
            });
            avl::insert(&mut self.nodes, &mut self.root, idx);
            self.index.insert(&mut self.nodes, idx);
            true
        }
    }

    pub(crate) fn score(&mut self, name: &[u8]) -> Option<f64> {
        let hcode = hash_name(name);
        let idx = self.index.lookup(&mut self.nodes, hcode, |n| n.name == name)?;
        Some(self.nodes.get(idx).score)
    }

    /// Removes `name`. Returns `true` if it was present.
    pub(crate) fn remove(&mut self, name: &[u8]) -> bool {
        let hcode = hash_name(name);
        let Some(idx) = self.index.pop(&mut self.nodes, hcode, |n| n.name == name) else {
            return false;
        };
        avl::delete(&mut self.nodes, &mut self.root, idx);
        self.nodes.remove(idx);
        true
    }

    fn lower_bound(&self, score: f64, name: &[u8]) -> Option<usize> {
        let mut cur = self.root;
        let mut best = None;
        while let Some(idx) = cur {
            let node = self.nodes.get(idx);
            if key_cmp(node.score, &node.name, score, name) != Ordering::Less {
                best = Some(idx);
                cur = node.left;
            } else {
                cur = node.right;
            }
        }
        best
    }

    /// Returns up to `limit` `(name, score)` pairs starting `offset`
    /// positions after the first member whose key is `>= (score, name)`.
    pub(crate) fn query(
        &self,
        score: f64,
        name: &[u8],
        offset: i64,
        limit: usize,
    ) -> Vec<(Vec<u8>, f64)> {
        let Some(start) = self.lower_bound(score, name) else {
            return Vec::new();
        };
        let Some(mut cur) = avl::offset(&self.nodes, start, offset) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(limit.min(self.nodes.len()));
        loop {
            if out.len() >= limit {
                break;
            }
            let node = self.nodes.get(cur);
            out.push((node.name.clone(), node.score));
            match avl::offset(&self.nodes, cur, 1) {
                Some(next) => cur = next,
                None => break,
            }
        }
        out
    }
}

impl Default for ZSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_lookup_score_remove() {
        let mut z = ZSet::new();
        assert!(z.add(b"alice", 1.0));
        assert!(z.add(b"bob", 2.0));
        assert!(!z.add(b"alice", 5.0), "re-adding an existing member is not a new insert");
        assert_eq!(z.score(b"alice"), Some(5.0));
        assert_eq!(z.len(), 2);
        assert!(z.remove(b"bob"));
        assert!(!z.remove(b"bob"));
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn query_walks_in_score_order() {
        let mut z = ZSet::new();
        for (name, score) in [("a", 1.0), ("b", 2.0), ("c", 2.0), ("d", 3.0), ("e", 4.0)] {
            z.add(name.as_bytes(), score);
        }
        let all = z.query(f64::MIN, b"", 0, 100);
        let names: Vec<_> = all.iter().map(|(n, _)| String::from_utf8(n.clone()).unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);

        let from_b = z.query(2.0, b"b", 0, 2);
        let names: Vec<_> = from_b.iter().map(|(n, _)| String::from_utf8(n.clone()).unwrap()).collect();
        assert_eq!(names, vec!["b", "c"]);

        let skip_two = z.query(2.0, b"b", 2, 10);
        let names: Vec<_> = skip_two.iter().map(|(n, _)| String::from_utf8(n.clone()).unwrap()).collect();
        assert_eq!(names, vec!["d", "e"]);
    }

    #[test]
    fn query_past_end_is_empty() {
        let mut z = ZSet::new();
        z.add(b"only", 1.0);
        assert!(z.query(1.0, b"only", 5, 10).is_empty());
    }
}
