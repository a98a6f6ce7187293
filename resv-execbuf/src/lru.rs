//! LRU registry.
//!
//! The lists are slab-backed: a node lives at a stable index and the buffer
//! object remembers that index in its [`LruLink`]. Nodes hold `Weak` handles,
//! so list membership never keeps an object alive and dropping a node under
//! the LRU lock can never run an object's destructor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::bo::BufferObject;
use crate::driver::Driver;

const UNLINKED: usize = usize::MAX;

/// Slot index of a buffer object in one LRU list.
///
/// Only written with the LRU lock held.
#[derive(Debug)]
pub(crate) struct LruLink(AtomicUsize);

impl LruLink {
    pub(crate) const fn new() -> Self {
        Self(AtomicUsize::new(UNLINKED))
    }

    #[inline]
    pub(crate) fn get(&self) -> Option<usize> {
        match self.0.load(Ordering::Relaxed) {
            UNLINKED => None,
            slot => Some(slot),
        }
    }

    #[inline]
    fn set(&self, slot: Option<usize>) {
        self.0.store(slot.unwrap_or(UNLINKED), Ordering::Relaxed);
    }
}

struct Node<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list over a slab. Head is most recently used.
pub struct LruList<T> {
    nodes: Vec<Node<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> LruList<T> {
    /// An empty list.
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Link `value` at the head and return its slot.
    pub fn push_front(&mut self, value: T) -> usize {
        let node = Node {
            value: Some(value),
            prev: None,
            next: self.head,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };

        match self.head {
            Some(old) => self.nodes[old].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.len += 1;
        slot
    }

    /// Unlink the node at `slot`.
    pub fn remove(&mut self, slot: usize) -> Option<T> {
        let node = self.nodes.get_mut(slot)?;
        let value = node.value.take()?;
        let (prev, next) = (node.prev.take(), node.next.take());

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }

        self.free.push(slot);
        self.len -= 1;
        Some(value)
    }

    /// Walk from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            let node = &self.nodes[cursor?];
            cursor = node.prev;
            node.value.as_ref()
        })
    }

    /// Number of linked nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for LruList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Eviction candidates of one set of globals.
///
/// Every buffer object that is not reserved sits on the main list; swappable
/// ones also sit on the swap list. Each list membership owns one list
/// reference of the object. Only reachable through the LRU lock.
pub struct LruRegistry<D: Driver> {
    lru: LruList<Weak<BufferObject<D>>>,
    swap: LruList<Weak<BufferObject<D>>>,
}

impl<D: Driver> LruRegistry<D> {
    pub(crate) const fn new() -> Self {
        Self {
            lru: LruList::new(),
            swap: LruList::new(),
        }
    }

    /// Link `bo` at the head of every list it belongs on, taking a list
    /// reference for each. Already linked lists are left alone.
    pub fn add(&mut self, bo: &Arc<BufferObject<D>>) {
        debug_assert!(bo.resv().is_reserved(), "adding an unreserved object to the LRU");

        if bo.lru_link.get().is_none() {
            bo.lru_link.set(Some(self.lru.push_front(Arc::downgrade(bo))));
            bo.list_refs().get();
        }
        if bo.is_swappable() && bo.swap_link.get().is_none() {
            bo.swap_link.set(Some(self.swap.push_front(Arc::downgrade(bo))));
            bo.list_refs().get();
        }
    }

    /// Unlink `bo` from every list and return the number of list references
    /// the caller now owes. Drop them after releasing the LRU lock.
    pub fn remove(&mut self, bo: &BufferObject<D>) -> usize {
        debug_assert!(bo.resv().is_reserved(), "removing an unreserved object from the LRU");
        self.unlink(bo)
    }

    pub(crate) fn unlink(&mut self, bo: &BufferObject<D>) -> usize {
        let mut put_count = 0;
        if let Some(slot) = bo.lru_link.get() {
            self.lru.remove(slot);
            bo.lru_link.set(None);
            put_count += 1;
        }
        if let Some(slot) = bo.swap_link.get() {
            self.swap.remove(slot);
            bo.swap_link.set(None);
            put_count += 1;
        }
        put_count
    }

    /// Whether `bo` is on the main list.
    pub fn contains(&self, bo: &BufferObject<D>) -> bool {
        bo.lru_link.get().is_some()
    }

    /// Main list, least recently used first.
    ///
    /// Upgrading a handle under the LRU lock is allowed, but the resulting
    /// `Arc` must not be the last one dropped while the lock is held.
    pub fn iter(&self) -> impl Iterator<Item = &Weak<BufferObject<D>>> + '_ {
        self.lru.iter()
    }

    /// Swap list, least recently used first.
    pub fn iter_swap(&self) -> impl Iterator<Item = &Weak<BufferObject<D>>> + '_ {
        self.swap.iter()
    }

    /// Length of the main list.
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    /// Whether the main list is empty.
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Length of the swap list.
    pub fn swap_len(&self) -> usize {
        self.swap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &LruList<u32>) -> Vec<u32> {
        list.iter().copied().collect()
    }

    #[test]
    fn push_and_iterate_lru_first() {
        let mut list = LruList::new();
        list.push_front(1);
        list.push_front(2);
        list.push_front(3);
        assert_eq!(collect(&list), vec![1, 2, 3]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn remove_middle_head_tail() {
        let mut list = LruList::new();
        let a = list.push_front(1);
        let b = list.push_front(2);
        let c = list.push_front(3);

        assert_eq!(list.remove(b), Some(2));
        assert_eq!(collect(&list), vec![1, 3]);
        assert_eq!(list.remove(b), None);

        assert_eq!(list.remove(c), Some(3));
        assert_eq!(collect(&list), vec![1]);
        assert_eq!(list.remove(a), Some(1));
        assert!(list.is_empty());
        assert_eq!(collect(&list), Vec::<u32>::new());
    }

    #[test]
    fn slots_are_reused() {
        let mut list = LruList::new();
        let a = list.push_front(1);
        list.push_front(2);
        list.remove(a);
        let c = list.push_front(3);
        assert_eq!(a, c);
        assert_eq!(collect(&list), vec![2, 3]);
    }

    #[test]
    fn re_add_moves_to_head() {
        let mut list = LruList::new();
        let a = list.push_front(1);
        list.push_front(2);
        list.remove(a);
        list.push_front(1);
        assert_eq!(collect(&list), vec![2, 1]);
    }
}
