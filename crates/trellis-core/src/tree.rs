//! Bitwise prefix trie over the identifier space.
//!
//! One trie instance backs each of the peer tables and the ownership index.
//! Leaves sit at depth [`BITS`]; every operation descends bit by bit, where
//! bit `i` of an identifier is `(id[i/8] >> (7 - i%8)) & 1`. The whole trie
//! is guarded by a single mutex.

use parking_lot::Mutex;

use crate::space::{BITS, Id};

#[derive(Debug)]
struct Branch<V> {
    left: Option<Box<Branch<V>>>,
    right: Option<Box<Branch<V>>>,
    value: Option<V>,
}

impl<V> Default for Branch<V> {
    fn default() -> Self {
        Branch {
            left: None,
            right: None,
            value: None,
        }
    }
}

fn bit(id: &Id, idx: usize) -> u8 {
    (id[idx / 8] >> (7 - idx % 8)) & 1
}

fn set_bit(id: &mut Id, idx: usize) {
    id[idx / 8] |= 1 << (7 - idx % 8);
}

fn clear_bit(id: &mut Id, idx: usize) {
    id[idx / 8] &= !(1 << (7 - idx % 8));
}

pub struct Tree<V> {
    root: Mutex<Branch<V>>,
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Tree<V> {
    pub fn new() -> Self {
        Tree {
            root: Mutex::new(Branch::default()),
        }
    }

    /// Overwrite the leaf at `id`, creating any missing ancestors.
    pub fn insert(&self, id: &Id, value: V) {
        let mut guard = self.root.lock();
        let mut node = &mut *guard;
        for idx in 0..BITS {
            let child = if bit(id, idx) == 0 {
                &mut node.left
            } else {
                &mut node.right
            };
            node = child.get_or_insert_with(Box::default);
        }
        node.value = Some(value);
    }

    pub fn contains(&self, id: &Id) -> bool {
        let guard = self.root.lock();
        let mut node = &*guard;
        for idx in 0..BITS {
            node = match if bit(id, idx) == 0 {
                node.left.as_deref()
            } else {
                node.right.as_deref()
            } {
                Some(child) => child,
                None => return false,
            };
        }
        node.value.is_some()
    }

    /// Prune the leaf at `id` and any now-childless ancestors. Returns
    /// whether the trie became empty.
    pub fn remove(&self, id: &Id) -> bool {
        fn prune<V>(node: &mut Branch<V>, id: &Id, idx: usize) -> bool {
            if idx == BITS {
                return true;
            }
            if bit(id, idx) == 0 {
                if let Some(left) = node.left.as_deref_mut() {
                    if prune(left, id, idx + 1) {
                        node.left = None;
                        return node.right.is_none();
                    }
                }
            } else if let Some(right) = node.right.as_deref_mut() {
                if prune(right, id, idx + 1) {
                    node.right = None;
                    return node.left.is_none();
                }
            }
            false
        }
        prune(&mut self.root.lock(), id, 0)
    }

    /// Run `apply` on the leaf at `id`; false when absent.
    pub fn update(&self, id: &Id, apply: impl FnOnce(&mut V)) -> bool {
        let mut guard = self.root.lock();
        let mut node = &mut *guard;
        for idx in 0..BITS {
            node = match if bit(id, idx) == 0 {
                node.left.as_deref_mut()
            } else {
                node.right.as_deref_mut()
            } {
                Some(child) => child,
                None => return false,
            };
        }
        match node.value.as_mut() {
            Some(value) => {
                apply(value);
                true
            }
            None => false,
        }
    }

    /// Run `apply` on the leaf at `id`, seeding it with `default` first when
    /// absent.
    pub fn upsert(&self, id: &Id, default: impl FnOnce() -> V, apply: impl FnOnce(&mut V)) {
        let mut guard = self.root.lock();
        let mut node = &mut *guard;
        for idx in 0..BITS {
            let child = if bit(id, idx) == 0 {
                &mut node.left
            } else {
                &mut node.right
            };
            node = child.get_or_insert_with(Box::default);
        }
        apply(node.value.get_or_insert_with(default));
    }

    /// Drop every leaf.
    pub fn clear(&self) {
        *self.root.lock() = Branch::default();
    }

    /// Visit every leaf left to right (bit order, 0 before 1), handing the
    /// callback the depth, the reconstructed identifier and the value.
    pub fn traverse(&self, mut visit: impl FnMut(usize, &Id, &V)) {
        let guard = self.root.lock();
        let mut id = [0u8; crate::space::ID_LEN];
        walk(&guard, 0, &mut id, &mut visit);
    }

    /// Remove every leaf strictly closer to `branch` than to `owner` under
    /// bitwise XOR distance. Destructive mirror of [`Tree::range`].
    pub fn truncate(&self, owner: &Id, branch: &Id) {
        fn cut<V>(node: &mut Branch<V>, idx: usize, owner: &Id, branch: &Id) {
            if idx == BITS {
                return;
            }
            if bit(owner, idx) != bit(branch, idx) {
                if bit(branch, idx) == 1 {
                    node.right = None;
                } else {
                    node.left = None;
                }
                return;
            }
            if let Some(left) = node.left.as_deref_mut() {
                cut(left, idx + 1, owner, branch);
            }
            if let Some(right) = node.right.as_deref_mut() {
                cut(right, idx + 1, owner, branch);
            }
        }
        cut(&mut self.root.lock(), 0, owner, branch)
    }
}

impl<V: Clone> Tree<V> {
    pub fn get(&self, id: &Id) -> Option<V> {
        let guard = self.root.lock();
        let mut node = &*guard;
        for idx in 0..BITS {
            node = match if bit(id, idx) == 0 {
                node.left.as_deref()
            } else {
                node.right.as_deref()
            } {
                Some(child) => child,
                None => return None,
            };
        }
        node.value.clone()
    }

    /// The deepest leaf reached by a greedy walk: prefer the child matching
    /// the query bit, fall back to the sibling. Minimizes XOR distance to
    /// `id` among stored leaves.
    pub fn nearest(&self, id: &Id) -> Option<V> {
        let guard = self.root.lock();
        descend(&guard, 0, id)
    }

    /// One peer per distance bucket: for each level whose sibling subtree is
    /// populated, write that subtree's nearest leaf into `out[level]`.
    pub fn extract(&self, id: &Id, out: &mut [Option<V>]) {
        fn harvest<V: Clone>(node: &Branch<V>, idx: usize, id: &Id, out: &mut [Option<V>]) {
            if idx == BITS {
                return;
            }
            let b = bit(id, idx);
            if b == 0 {
                if let Some(left) = node.left.as_deref() {
                    harvest(left, idx + 1, id, out);
                }
                if let Some(right) = node.right.as_deref() {
                    out[idx] = descend(right, idx + 1, id);
                }
            } else {
                if let Some(right) = node.right.as_deref() {
                    harvest(right, idx + 1, id, out);
                }
                if let Some(left) = node.left.as_deref() {
                    out[idx] = descend(left, idx + 1, id);
                }
            }
        }
        harvest(&self.root.lock(), 0, id, out)
    }
}

impl<V> Tree<V> {
    /// Visit every leaf strictly closer to `candidate` than to `owner` under
    /// bitwise XOR distance. Both identifiers descend in lockstep; the first
    /// level where they differ selects a subtree wholly on the candidate's
    /// side.
    pub fn range(&self, owner: &Id, candidate: &Id, mut visit: impl FnMut(usize, &Id, &V)) {
        fn split<V>(
            node: &Branch<V>,
            idx: usize,
            owner: &Id,
            candidate: &Id,
            id: &mut Id,
            visit: &mut impl FnMut(usize, &Id, &V),
        ) {
            if idx == BITS {
                return;
            }
            if bit(owner, idx) != bit(candidate, idx) {
                if bit(candidate, idx) == 0 {
                    if let Some(left) = node.left.as_deref() {
                        walk(left, idx + 1, id, visit);
                    }
                } else if let Some(right) = node.right.as_deref() {
                    set_bit(id, idx);
                    walk(right, idx + 1, id, visit);
                    clear_bit(id, idx);
                }
                return;
            }
            if let Some(left) = node.left.as_deref() {
                split(left, idx + 1, owner, candidate, id, visit);
            }
            if let Some(right) = node.right.as_deref() {
                set_bit(id, idx);
                split(right, idx + 1, owner, candidate, id, visit);
                clear_bit(id, idx);
            }
        }
        let guard = self.root.lock();
        let mut id = [0u8; crate::space::ID_LEN];
        split(&guard, 0, owner, candidate, &mut id, &mut visit)
    }
}

fn walk<V>(node: &Branch<V>, idx: usize, id: &mut Id, visit: &mut impl FnMut(usize, &Id, &V)) {
    if let Some(left) = node.left.as_deref() {
        walk(left, idx + 1, id, visit);
    }
    if let Some(right) = node.right.as_deref() {
        set_bit(id, idx);
        walk(right, idx + 1, id, visit);
        clear_bit(id, idx);
    }
    if idx > 0 && node.left.is_none() && node.right.is_none() {
        if let Some(value) = &node.value {
            visit(idx, id, value);
        }
    }
}

fn descend<V: Clone>(node: &Branch<V>, idx: usize, id: &Id) -> Option<V> {
    if idx == BITS {
        return node.value.clone();
    }
    match (node.left.as_deref(), node.right.as_deref()) {
        (Some(left), None) => descend(left, idx + 1, id),
        (None, Some(right)) => descend(right, idx + 1, id),
        (Some(left), Some(right)) => {
            if bit(id, idx) == 0 {
                descend(left, idx + 1, id)
            } else {
                descend(right, idx + 1, id)
            }
        }
        (None, None) => node.value.clone(),
    }
}
