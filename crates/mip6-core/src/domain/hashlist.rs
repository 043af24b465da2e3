//! # Indexed Expiry Table
//!
//! A keyed collection that is hashed by identity and, at the same time,
//! threaded onto a doubly linked list kept in ascending order of an
//! expiry/priority key. Both the binding cache and the binding update list
//! are built on it, as is the option scheduler's pending queue.
//!
//! ## Layout
//!
//! ```text
//! buckets[fold(key) % n] ──► node ──hash_next──► node ──► ...
//!
//! head ◄──► node(order=10) ◄──► node(order=12) ◄──► node(order=40) ◄──► tail
//! ```
//!
//! Nodes live in a [`SlabPool`], so capacity is fixed at construction and the
//! links are slot indices rather than pointers.
//!
//! ## Invariants
//!
//! 1. The sort list is ascending by `order`; equal orders keep insertion order.
//! 2. Every live node is reachable exactly once from its bucket chain and
//!    exactly once from the sort list.
//! 3. Keys are unique among live nodes.

use thiserror::Error;

use super::slab::{SlabPool, SlotId};
use super::value_objects::FoldKey;

/// Errors from table mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashListError {
    #[error("table full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("key already present")]
    DuplicateKey,
}

/// Verdict returned by an [`HashList::iterate`] visitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterAction {
    /// Visit the next entry.
    Continue,
    /// End the pass.
    Stop,
    /// Remove the entry just visited, then continue.
    DeleteCurrent,
}

#[derive(Debug)]
struct Node<K, O, V> {
    key: K,
    order: O,
    value: V,
    hash_next: Option<SlotId>,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Hash-indexed, order-sorted table of bounded capacity.
#[derive(Debug)]
pub struct HashList<K, O, V> {
    pool: SlabPool<Node<K, O, V>>,
    buckets: Vec<Option<SlotId>>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

impl<K, O, V> HashList<K, O, V>
where
    K: FoldKey,
    O: Ord + Copy,
{
    /// Create a table holding at most `capacity` entries spread over
    /// `bucket_count` hash chains (at least one).
    pub fn new(capacity: usize, bucket_count: usize) -> Self {
        Self {
            pool: SlabPool::with_capacity(capacity),
            buckets: vec![None; bucket_count.max(1)],
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pool.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Insert a new entry. Fails on a duplicate key or when the pool is full.
    pub fn add(&mut self, key: K, order: O, value: V) -> Result<(), HashListError> {
        if self.find(&key).is_some() {
            return Err(HashListError::DuplicateKey);
        }
        let bucket = self.bucket_of(&key);
        let node = Node {
            key,
            order,
            value,
            hash_next: self.buckets[bucket],
            prev: None,
            next: None,
        };
        let id = self.pool.allocate(node).map_err(|_| HashListError::Full {
            capacity: self.pool.capacity(),
        })?;
        self.buckets[bucket] = Some(id);
        self.link_sorted(id);
        Ok(())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let id = self.find(key)?;
        self.pool.get(id).map(|n| &n.value)
    }

    /// Mutable access to the value. The order key is not reachable from
    /// here; use [`HashList::reschedule`] to move an entry.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = self.find(key)?;
        self.pool.get_mut(id).map(|n| &mut n.value)
    }

    /// Current order key of an entry.
    pub fn order_of(&self, key: &K) -> Option<O> {
        let id = self.find(key)?;
        self.pool.get(id).map(|n| n.order)
    }

    /// Remove an entry, returning its value.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let id = self.find(key)?;
        self.remove(id).map(|(_, _, value)| value)
    }

    /// Change an entry's order key and re-splice it into the sort list.
    ///
    /// Returns `false` if the key is absent.
    pub fn reschedule(&mut self, key: &K, order: O) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        self.unlink_sorted(id);
        if let Some(node) = self.pool.get_mut(id) {
            node.order = order;
        }
        self.link_sorted(id);
        true
    }

    /// Entry with the smallest order key.
    pub fn first(&self) -> Option<(&K, O, &V)> {
        let node = self.pool.get(self.head?)?;
        Some((&node.key, node.order, &node.value))
    }

    /// Smallest order key, i.e. when the next entry falls due.
    pub fn next_deadline(&self) -> Option<O> {
        self.first().map(|(_, order, _)| order)
    }

    /// Remove and return the entry with the smallest order key.
    pub fn pop_first(&mut self) -> Option<(K, O, V)> {
        let id = self.head?;
        self.remove(id)
    }

    /// Walk the entries in ascending order.
    ///
    /// The visitor may change the order key of the entry it is handed; such
    /// entries are re-spliced only after the pass ends so the traversal never
    /// sees a half-moved list. Returns the number of entries deleted.
    pub fn iterate<F>(&mut self, mut visit: F) -> usize
    where
        F: FnMut(&K, &mut O, &mut V) -> IterAction,
    {
        let mut cursor = self.head;
        let mut changed = Vec::new();
        let mut deleted = 0;

        while let Some(id) = cursor {
            let Some(node) = self.pool.get_mut(id) else {
                break;
            };
            let next = node.next;
            let before = node.order;
            let action = visit(&node.key, &mut node.order, &mut node.value);
            let moved = node.order != before;

            match action {
                IterAction::Continue => {
                    if moved {
                        changed.push(id);
                    }
                    cursor = next;
                }
                IterAction::Stop => {
                    if moved {
                        changed.push(id);
                    }
                    break;
                }
                IterAction::DeleteCurrent => {
                    self.remove(id);
                    deleted += 1;
                    cursor = next;
                }
            }
        }

        // Detach every moved node first so each re-insert walks a sorted list.
        for &id in &changed {
            self.unlink_sorted(id);
        }
        for id in changed {
            self.link_sorted(id);
        }
        deleted
    }

    /// Entries in ascending order.
    pub fn iter(&self) -> Iter<'_, K, O, V> {
        Iter {
            table: self,
            cursor: self.head,
        }
    }

    /// Remove every entry, returning them in ascending order.
    pub fn drain(&mut self) -> Vec<(K, O, V)> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_first() {
            out.push(entry);
        }
        out
    }

    /// Check the structural invariants. Intended for tests and debug
    /// assertions; O(n · chain length).
    pub fn is_consistent(&self) -> bool {
        let mut count = 0;
        let mut prev: Option<SlotId> = None;
        let mut cursor = self.head;
        let mut last_order: Option<O> = None;

        while let Some(id) = cursor {
            let Some(node) = self.pool.get(id) else {
                return false;
            };
            if node.prev != prev {
                return false;
            }
            if last_order.is_some_and(|o| o > node.order) {
                return false;
            }
            // Reachable from its bucket exactly once.
            let bucket = self.bucket_of(&node.key);
            let mut hits = 0;
            let mut chain = self.buckets[bucket];
            while let Some(c) = chain {
                let Some(other) = self.pool.get(c) else {
                    return false;
                };
                if other.key == node.key {
                    hits += 1;
                }
                chain = other.hash_next;
            }
            if hits != 1 {
                return false;
            }
            last_order = Some(node.order);
            prev = Some(id);
            cursor = node.next;
            count += 1;
        }

        prev == self.tail && count == self.pool.len()
    }

    fn bucket_of(&self, key: &K) -> usize {
        key.fold() as usize % self.buckets.len()
    }

    fn find(&self, key: &K) -> Option<SlotId> {
        let mut chain = self.buckets[self.bucket_of(key)];
        while let Some(id) = chain {
            let node = self.pool.get(id)?;
            if node.key == *key {
                return Some(id);
            }
            chain = node.hash_next;
        }
        None
    }

    fn remove(&mut self, id: SlotId) -> Option<(K, O, V)> {
        self.unlink_hash(id);
        self.unlink_sorted(id);
        self.pool.free(id).map(|n| (n.key, n.order, n.value))
    }

    fn unlink_hash(&mut self, id: SlotId) {
        let Some(node) = self.pool.get(id) else {
            return;
        };
        let bucket = self.bucket_of(&node.key);
        let successor = node.hash_next;

        if self.buckets[bucket] == Some(id) {
            self.buckets[bucket] = successor;
            return;
        }
        let mut chain = self.buckets[bucket];
        while let Some(c) = chain {
            let next = self.pool.get(c).and_then(|n| n.hash_next);
            if next == Some(id) {
                if let Some(n) = self.pool.get_mut(c) {
                    n.hash_next = successor;
                }
                return;
            }
            chain = next;
        }
    }

    fn unlink_sorted(&mut self, id: SlotId) {
        let Some(node) = self.pool.get_mut(id) else {
            return;
        };
        let (prev, next) = (node.prev.take(), node.next.take());

        match prev {
            Some(p) => {
                if let Some(n) = self.pool.get_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.pool.get_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    /// Insert a detached node at its sorted position. Checks the tail first
    /// since fresh entries usually expire last.
    fn link_sorted(&mut self, id: SlotId) {
        let Some(order) = self.pool.get(id).map(|n| n.order) else {
            return;
        };

        let Some(tail) = self.tail else {
            self.head = Some(id);
            self.tail = Some(id);
            return;
        };
        if self.pool.get(tail).is_some_and(|t| t.order <= order) {
            self.splice_after(tail, id);
            return;
        }

        let mut cursor = self.head;
        while let Some(c) = cursor {
            let Some(node) = self.pool.get(c) else {
                break;
            };
            if node.order > order {
                self.splice_before(c, id);
                return;
            }
            cursor = node.next;
        }
        // Unreachable with a sorted list; append to stay consistent.
        self.splice_after(tail, id);
    }

    fn splice_after(&mut self, anchor: SlotId, id: SlotId) {
        let after = self.pool.get(anchor).and_then(|n| n.next);
        if let Some(node) = self.pool.get_mut(id) {
            node.prev = Some(anchor);
            node.next = after;
        }
        if let Some(a) = self.pool.get_mut(anchor) {
            a.next = Some(id);
        }
        match after {
            Some(n) => {
                if let Some(node) = self.pool.get_mut(n) {
                    node.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }
    }

    fn splice_before(&mut self, anchor: SlotId, id: SlotId) {
        let before = self.pool.get(anchor).and_then(|n| n.prev);
        if let Some(node) = self.pool.get_mut(id) {
            node.prev = before;
            node.next = Some(anchor);
        }
        if let Some(a) = self.pool.get_mut(anchor) {
            a.prev = Some(id);
        }
        match before {
            Some(p) => {
                if let Some(node) = self.pool.get_mut(p) {
                    node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
    }
}

/// Iterator over a [`HashList`] in ascending order.
pub struct Iter<'a, K, O, V> {
    table: &'a HashList<K, O, V>,
    cursor: Option<SlotId>,
}

impl<'a, K, O, V> Iterator for Iter<'a, K, O, V>
where
    O: Copy,
{
    type Item = (&'a K, O, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.table.pool.get(self.cursor?)?;
        self.cursor = node.next;
        Some((&node.key, node.order, &node.value))
    }
}
