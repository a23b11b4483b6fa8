//! TTL min-heap with back-references, grounded on `main.cpp`'s `g_data.heap`
//! (`HeapItem{val, ref_}`, `heap_update`).
//!
//! The original stores a `size_t *ref` pointing back into the owning
//! `Entry::heap_idx` field so that the heap can fix up an entry's notion of
//! its own slot on every swap. Here the back-reference is a slab index
//! (`entry_idx`) resolved through [`HeapRef`] instead of a raw pointer.

use crate::slab::Slab;

pub(crate) trait HeapRef {
    fn heap_slot(&self) -> Option<usize>;
    fn set_heap_slot(&mut self, slot: Option<usize>);
}

struct HeapItem {
    deadline: u64,
    entry_idx: usize,
}

#[derive(Default)]
pub(crate) struct TtlHeap {
    items: Vec<HeapItem>,
}

impl TtlHeap {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn peek_deadline(&self) -> Option<u64> {
        self.items.first().map(|it| it.deadline)
    }

    /// The deadline currently stored for `entry_idx`, if it has a slot.
    pub(crate) fn deadline_of<N: HeapRef>(&self, slab: &Slab<N>, entry_idx: usize) -> Option<u64> {
        let slot = slab.get(entry_idx).heap_slot()?;
        Some(self.items[slot].deadline)
    }

    /// Sets or updates `entry_idx`'s deadline, inserting it if it has no
    /// heap slot yet.
    pub(crate) fn set_deadline<N: HeapRef>(
        &mut self,
        slab: &mut Slab<N>,
        entry_idx: usize,
        deadline: u64,
    ) {
        match slab.get(entry_idx).heap_slot() {
            Some(slot) => {
                self.items[slot].deadline = deadline;
                self.fix(slab, slot);
            }
            None => {
                let slot = self.items.len();
                self.items.push(HeapItem { deadline, entry_idx });
                slab.get_mut(entry_idx).set_heap_slot(Some(slot));
                self.sift_up(slab, slot);
            }
        }
    }

    /// Removes `entry_idx` from the heap, if it has a slot.
    pub(crate) fn remove<N: HeapRef>(&mut self, slab: &mut Slab<N>, entry_idx: usize) {
        let Some(slot) = slab.get(entry_idx).heap_slot() else {
            return;
        };
        slab.get_mut(entry_idx).set_heap_slot(None);
        let last = self.items.len() - 1;
        if slot != last {
            self.items.swap(slot, last);
            let moved = self.items[slot].entry_idx;
            slab.get_mut(moved).set_heap_slot(Some(slot));
        }
        self.items.pop();
        if slot < self.items.len() {
            self.fix(slab, slot);
        }
    }

    /// Pops entries whose deadline is `<= now`, in deadline order, up to
    /// `max` of them.
    pub(crate) fn pop_expired<N: HeapRef>(
        &mut self,
        slab: &mut Slab<N>,
        now: u64,
        max: usize,
    ) -> Vec<usize> {
        let mut expired = Vec::new();
        while expired.len() < max {
            match self.items.first() {
                Some(top) if top.deadline <= now => {
                    let entry_idx = top.entry_idx;
                    self.remove(slab, entry_idx);
                    expired.push(entry_idx);
                }
                _ => break,
            }
        }
        expired
    }

    fn fix<N: HeapRef>(&mut self, slab: &mut Slab<N>, slot: usize) {
        if !self.sift_up(slab, slot) {
            self.sift_down(slab, slot);
        }
    }

    fn sift_up<N: HeapRef>(&mut self, slab: &mut Slab<N>, mut i: usize) -> bool {
        let mut moved = false;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.items[parent].deadline <= self.items[i].deadline {
                break;
            }
            self.swap_items(slab, i, parent);
            i = parent;
            moved = true;
        }
        moved
    }

    fn sift_down<N: HeapRef>(&mut self, slab: &mut Slab<N>, mut i: usize) {
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut smallest = i;
            if l < self.items.len() && self.items[l].deadline < self.items[smallest].deadline {
                smallest = l;
            }
            if r < self.items.len() && self.items[r].deadline < self.items[smallest].deadline {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.swap_items(slab, i, smallest);
            i = smallest;
        }
    }

    fn swap_items<N: HeapRef>(&mut self, slab: &mut Slab<N>, i: usize, j: usize) {
        self.items.swap(i, j);
        let a = self.items[i].entry_idx;
        let b = self.items[j].entry_idx;
        slab.get_mut(a).set_heap_slot(Some(i));
        slab.get_mut(b).set_heap_slot(Some(j));
    }
}
