//! Order-statistic AVL tree, grounded on `avl.cpp`/`avl.h`.
//!
//! Nodes live in a caller-owned [`super::slab::Slab`] and are addressed by
//! index; this module only manipulates `left`/`right`/`parent`/`height`/
//! `count` fields through the [`AvlNode`] trait, the same way
//! `engine::hashmap` stays generic over the chained payload. `count` is the
//! subtree size and is what makes `offset` (rank-based navigation) possible
//! without scanning.
//!
//! The two-children delete case differs from the original on purpose: the
//! original overwrites the deleted node's score/len/name with its in-order
//! successor's and then deletes the successor, which silently desyncs any
//! hash index keyed on node identity. This implementation splices the
//! successor node itself into the vacated position instead, so a node's
//! slab index never changes while it's a member of the tree.

use crate::slab::Slab;

pub(crate) trait AvlNode {
    fn left(&self) -> Option<usize>;
    fn set_left(&mut self, v: Option<usize>);
    fn right(&self) -> Option<usize>;
    fn set_right(&mut self, v: Option<usize>);
    fn parent(&self) -> Option<usize>;
    fn set_parent(&mut self, v: Option<usize>);
    fn height(&self) -> u32;
    fn set_height(&mut self, v: u32);
    fn count(&self) -> u32;
    fn set_count(&mut self, v: u32);

    /// Strict total order used to place this node during insertion. Must be
    /// a consistent total order (ties broken deterministically) so that
    /// `offset` and in-order traversal agree.
    fn precedes(&self, other: &Self) -> bool;
}

fn height_of<N: AvlNode>(slab: &Slab<N>, idx: Option<usize>) -> u32 {
    idx.map_or(0, |i| slab.get(i).height())
}

fn count_of<N: AvlNode>(slab: &Slab<N>, idx: Option<usize>) -> u32 {
    idx.map_or(0, |i| slab.get(i).count())
}

fn update<N: AvlNode>(slab: &mut Slab<N>, idx: usize) {
    let l = slab.get(idx).left();
    let r = slab.get(idx).right();
    let height = 1 + height_of(slab, l).max(height_of(slab, r));
    let count = 1 + count_of(slab, l) + count_of(slab, r);
    let node = slab.get_mut(idx);
    node.set_height(height);
    node.set_count(count);
}

/// Repoints whichever of `parent`'s children is `old` to `new` (or the tree
/// root, if `parent` is `None`).
fn replace_child<N: AvlNode>(
    slab: &mut Slab<N>,
    root: &mut Option<usize>,
    parent: Option<usize>,
    old: usize,
    new: Option<usize>,
) {
    match parent {
        Some(p) => {
            if slab.get(p).left() == Some(old) {
                slab.get_mut(p).set_left(new);
            } else {
                debug_assert_eq!(slab.get(p).right(), Some(old));
                slab.get_mut(p).set_right(new);
            }
        }
        None => *root = new,
    }
}

fn rotate_left<N: AvlNode>(slab: &mut Slab<N>, idx: usize) -> usize {
    let r = slab.get(idx).right().expect("rotate_left requires a right child");
    let rl = slab.get(r).left();
    slab.get_mut(idx).set_right(rl);
    if let Some(rl_idx) = rl {
        slab.get_mut(rl_idx).set_parent(Some(idx));
    }
    let parent = slab.get(idx).parent();
    slab.get_mut(r).set_parent(parent);
    slab.get_mut(r).set_left(Some(idx));
    slab.get_mut(idx).set_parent(Some(r));
    update(slab, idx);
    update(slab, r);
    r
}

fn rotate_right<N: AvlNode>(slab: &mut Slab<N>, idx: usize) -> usize {
    let l = slab.get(idx).left().expect("rotate_right requires a left child");
    let lr = slab.get(l).right();
    slab.get_mut(idx).set_left(lr);
    if let Some(lr_idx) = lr {
        slab.get_mut(lr_idx).set_parent(Some(idx));
    }
    let parent = slab.get(idx).parent();
    slab.get_mut(l).set_parent(parent);
    slab.get_mut(l).set_right(Some(idx));
    slab.get_mut(idx).set_parent(Some(l));
    update(slab, idx);
    update(slab, l);
    l
}

fn fix_left<N: AvlNode>(slab: &mut Slab<N>, idx: usize) -> usize {
    let l = slab.get(idx).left().expect("fix_left requires a left child");
    if height_of(slab, slab.get(l).left()) < height_of(slab, slab.get(l).right()) {
        let new_left = rotate_left(slab, l);
        slab.get_mut(idx).set_left(Some(new_left));
        slab.get_mut(new_left).set_parent(Some(idx));
    }
    rotate_right(slab, idx)
}

fn fix_right<N: AvlNode>(slab: &mut Slab<N>, idx: usize) -> usize {
    let r = slab.get(idx).right().expect("fix_right requires a right child");
    if height_of(slab, slab.get(r).right()) < height_of(slab, slab.get(r).left()) {
        let new_right = rotate_right(slab, r);
        slab.get_mut(idx).set_right(Some(new_right));
        slab.get_mut(new_right).set_parent(Some(idx));
    }
    rotate_left(slab, idx)
}

/// Recomputes height/count from `node` up to the root, rebalancing any
/// subtree that has drifted more than one level out of balance.
fn fix<N: AvlNode>(slab: &mut Slab<N>, root: &mut Option<usize>, mut node: usize) {
    loop {
        update(slab, node);
        let lh = height_of(slab, slab.get(node).left());
        let rh = height_of(slab, slab.get(node).right());
        let subtree_root = if lh > rh + 1 {
            fix_left(slab, node)
        } else if rh > lh + 1 {
            fix_right(slab, node)
        } else {
            node
        };
        if subtree_root != node {
            let parent = slab.get(subtree_root).parent();
            replace_child(slab, root, parent, node, Some(subtree_root));
        }
        match slab.get(subtree_root).parent() {
            Some(p) => node = p,
            None => {
                *root = Some(subtree_root);
                return;
            }
        }
    }
}

/// Inserts a node already holding its key fields into the tree. The node
/// must not already be linked into any tree.
pub(crate) fn insert<N: AvlNode>(slab: &mut Slab<N>, root: &mut Option<usize>, idx: usize) {
    {
        let node = slab.get_mut(idx);
        node.set_left(None);
        node.set_right(None);
        node.set_parent(None);
        node.set_height(1);
        node.set_count(1);
    }
    let Some(mut cur) = *root else {
        *root = Some(idx);
        return;
    };
    loop {
        let go_left = {
            let new_node = slab.get(idx);
            let cur_node = slab.get(cur);
            new_node.precedes(cur_node)
        };
        let child = if go_left { slab.get(cur).left() } else { slab.get(cur).right() };
        match child {
            Some(next) => cur = next,
            None => {
                if go_left {
                    slab.get_mut(cur).set_left(Some(idx));
                } else {
                    slab.get_mut(cur).set_right(Some(idx));
                }
                slab.get_mut(idx).set_parent(Some(cur));
                break;
            }
        }
    }
    fix(slab, root, cur);
}

/// Removes `idx` from the tree. The node is left in the slab with stale
/// left/right/parent fields; the caller owns freeing it.
pub(crate) fn delete<N: AvlNode>(slab: &mut Slab<N>, root: &mut Option<usize>, idx: usize) {
    let left = slab.get(idx).left();
    let right = slab.get(idx).right();
    match (left, right) {
        (None, None) => detach_leaf_or_single_child(slab, root, idx, None),
        (Some(l), None) => detach_leaf_or_single_child(slab, root, idx, Some(l)),
        (None, Some(r)) => detach_leaf_or_single_child(slab, root, idx, Some(r)),
        (Some(l), Some(r)) => {
            let mut succ = r;
            while let Some(next) = slab.get(succ).left() {
                succ = next;
            }
            let succ_right = slab.get(succ).right();
            let fix_start = if succ != r {
                let succ_parent = slab.get(succ).parent();
                replace_child(slab, root, succ_parent, succ, succ_right);
                if let Some(sr) = succ_right {
                    slab.get_mut(sr).set_parent(succ_parent);
                }
                slab.get_mut(succ).set_right(Some(r));
                slab.get_mut(r).set_parent(Some(succ));
                succ_parent
            } else {
                None
            };
            slab.get_mut(succ).set_left(Some(l));
            slab.get_mut(l).set_parent(Some(succ));
            let idx_parent = slab.get(idx).parent();
            slab.get_mut(succ).set_parent(idx_parent);
            replace_child(slab, root, idx_parent, idx, Some(succ));
            fix(slab, root, fix_start.unwrap_or(succ));
        }
    }
}

fn detach_leaf_or_single_child<N: AvlNode>(
    slab: &mut Slab<N>,
    root: &mut Option<usize>,
    idx: usize,
    child: Option<usize>,
) {
    let parent = slab.get(idx).parent();
    if let Some(c) = child {
        slab.get_mut(c).set_parent(parent);
    }
    replace_child(slab, root, parent, idx, child);
    match parent {
        Some(p) => fix(slab, root, p),
        None => *root = child,
    }
}

/// Walks `offset` positions in sorted order from `node` (negative moves
/// toward lesser keys), returning `None` if that walks off either end.
pub(crate) fn offset<N: AvlNode>(slab: &Slab<N>, node: usize, target: i64) -> Option<usize> {
    let mut node = node;
    let mut pos: i64 = 0;
    while pos != target {
        let right_cnt = count_of(slab, slab.get(node).right()) as i64;
        let left_cnt = count_of(slab, slab.get(node).left()) as i64;
        if pos < target && pos + right_cnt >= target {
            node = slab.get(node).right()?;
            pos += count_of(slab, slab.get(node).left()) as i64 + 1;
        } else if pos > target && pos - left_cnt <= target {
            node = slab.get(node).left()?;
            pos -= count_of(slab, slab.get(node).right()) as i64 + 1;
        } else {
            let parent = slab.get(node).parent()?;
            if slab.get(parent).right() == Some(node) {
                pos -= count_of(slab, slab.get(node).left()) as i64 + 1;
            } else {
                pos += count_of(slab, slab.get(node).right()) as i64 + 1;
            }
            node = parent;
        }
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Node {
        key: i64,
        left: Option<usize>,
        right: Option<usize>,
        parent: Option<usize>,
        height: u32,
        count: u32,
    }

    impl AvlNode for Node {
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
            self.key < other.key
        }
    }

    fn in_order(slab: &Slab<Node>, root: Option<usize>, out: &mut Vec<i64>) {
        let Some(idx) = root else { return };
        in_order(slab, slab.get(idx).left(), out);
        out.push(slab.get(idx).key);
        in_order(slab, slab.get(idx).right(), out);
    }

    fn assert_balanced(slab: &Slab<Node>, root: Option<usize>) -> (u32, u32) {
        let Some(idx) = root else { return (0, 0) };
        let (lh, lc) = assert_balanced(slab, slab.get(idx).left());
        let (rh, rc) = assert_balanced(slab, slab.get(idx).right());
        assert!(lh.abs_diff(rh) <= 1, "node {idx} unbalanced: {lh} vs {rh}");
        let height = 1 + lh.max(rh);
        let count = 1 + lc + rc;
        assert_eq!(slab.get(idx).height(), height);
        assert_eq!(slab.get(idx).count(), count);
        (height, count)
    }

    // xorshift, deterministic and toolchain-free
    fn next(state: &mut u64) -> u64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    #[test]
    fn randomized_insert_delete_stays_sorted_and_balanced() {
        let mut slab: Slab<Node> = Slab::new();
        let mut root: Option<usize> = None;
        let mut live = Vec::new();
        let mut rng: u64 = 0x2545F4914F6CDD1D;

        for _ in 0..2000 {
            let key = (next(&mut rng) % 500) as i64;
            let idx = slab.insert(Node {
                key,
                ..Default::default()
            });
            insert(&mut slab, &mut root, idx);
            live.push(idx);

            if live.len() > 20 && next(&mut rng) % 3 == 0 {
                let pick = (next(&mut rng) as usize) % live.len();
                let victim = live.swap_remove(pick);
                delete(&mut slab, &mut root, victim);
                slab.remove(victim);
            }

            assert_balanced(&slab, root);
            let mut values = Vec::new();
            in_order(&slab, root, &mut values);
            assert_eq!(values.len(), live.len());
            let mut sorted = values.clone();
            sorted.sort_unstable();
            assert_eq!(values, sorted);
        }
    }

    #[test]
    fn offset_round_trips() {
        let mut slab: Slab<Node> = Slab::new();
        let mut root: Option<usize> = None;
        let mut indices = Vec::new();
        for key in 0..64i64 {
            let idx = slab.insert(Node {
                key,
                ..Default::default()
            });
            insert(&mut slab, &mut root, idx);
            indices.push(idx);
        }

        let mut values = Vec::new();
        in_order(&slab, root, &mut values);
        assert_eq!(values, (0..64).collect::<Vec<_>>());

        let start = root.unwrap();
        for k in -30..30i64 {
            let Some(moved) = offset(&slab, start, k) else {
                continue;
            };
            let back = offset(&slab, moved, -k).expect("reverse offset must land back in tree");
            assert_eq!(back, start, "offset({k}) then offset(-{k}) must round-trip");
        }
    }
}
