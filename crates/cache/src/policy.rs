//! Eviction policies for the memory cache
//!
//! A policy only tracks key order; sizes and values belong to the cache.
//! Both built-in policies keep their keys in an [`OrderedKeys`] list, which
//! gives O(1) append, pop-front, move-to-back and removal of any key.

use crate::ResourceKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordering bookkeeping consulted by [`MemoryCache`](crate::MemoryCache).
pub trait EvictionPolicy: Send {
    /// A key was inserted (or replaced).
    fn on_insert(&mut self, key: &ResourceKey);

    /// A resident key was read.
    fn on_access(&mut self, key: &ResourceKey);

    /// A key left the cache for a reason other than eviction.
    fn on_remove(&mut self, key: &ResourceKey);

    /// Pick and forget the next key to evict.
    ///
    /// Must return `Some` whenever at least one key is tracked so the cache
    /// always makes progress while restoring its budget.
    fn select_eviction_candidate(&mut self) -> Option<ResourceKey>;

    /// Forget all keys.
    fn clear(&mut self);

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Policy selection as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Lru,
    Fifo,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn EvictionPolicy> {
        match self {
            PolicyKind::Lru => Box::new(LruPolicy::new()),
            PolicyKind::Fifo => Box::new(FifoPolicy::new()),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(PolicyKind::Lru),
            "fifo" => Ok(PolicyKind::Fifo),
            other => Err(other.to_string()),
        }
    }
}

/// Evicts the key touched least recently by a read or a write.
#[derive(Debug, Default)]
pub struct LruPolicy {
    order: OrderedKeys,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for LruPolicy {
    fn on_insert(&mut self, key: &ResourceKey) {
        self.order.push_back_or_move(key);
    }

    fn on_access(&mut self, key: &ResourceKey) {
        self.order.move_to_back(key);
    }

    fn on_remove(&mut self, key: &ResourceKey) {
        self.order.remove(key);
    }

    fn select_eviction_candidate(&mut self) -> Option<ResourceKey> {
        self.order.pop_front()
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Evicts the earliest inserted key still resident; reads do not reorder.
#[derive(Debug, Default)]
pub struct FifoPolicy {
    order: OrderedKeys,
}

impl FifoPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for FifoPolicy {
    fn on_insert(&mut self, key: &ResourceKey) {
        // A replaced value counts as a fresh insertion.
        self.order.push_back_or_move(key);
    }

    fn on_access(&mut self, _key: &ResourceKey) {}

    fn on_remove(&mut self, key: &ResourceKey) {
        self.order.remove(key);
    }

    fn select_eviction_candidate(&mut self) -> Option<ResourceKey> {
        self.order.pop_front()
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    key: ResourceKey,
    prev: usize,
    next: usize,
}

/// Doubly linked key list stored in a slot vector with a key index.
///
/// Freed slots are recycled through a free list, so the vector only grows
/// to the peak number of tracked keys.
#[derive(Debug)]
pub struct OrderedKeys {
    nodes: Vec<Option<Node>>,
    index: HashMap<ResourceKey, usize>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl Default for OrderedKeys {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }
}

impl OrderedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    /// Append `key`, or move it to the back if already present.
    pub fn push_back_or_move(&mut self, key: &ResourceKey) {
        if !self.move_to_back(key) {
            let slot = self.alloc(key.clone());
            self.link_back(slot);
            self.index.insert(key.clone(), slot);
        }
    }

    /// Move an existing key to the back. Returns `false` if absent.
    pub fn move_to_back(&mut self, key: &ResourceKey) -> bool {
        match self.index.get(key).copied() {
            Some(slot) => {
                if slot != self.tail {
                    self.unlink(slot);
                    self.link_back(slot);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &ResourceKey) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.unlink(slot);
                self.nodes[slot] = None;
                self.free.push(slot);
                true
            }
            None => false,
        }
    }

    pub fn pop_front(&mut self) -> Option<ResourceKey> {
        if self.head == NIL {
            return None;
        }
        let slot = self.head;
        self.unlink(slot);
        let node = self.nodes[slot].take()?;
        self.free.push(slot);
        self.index.remove(&node.key);
        Some(node.key)
    }

    pub fn front(&self) -> Option<&ResourceKey> {
        self.node(self.head).map(|n| &n.key)
    }

    /// Keys from front (next to evict) to back.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor)?;
            cursor = node.next;
            Some(&node.key)
        })
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        if slot == NIL {
            return None;
        }
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    fn alloc(&mut self, key: ResourceKey) -> usize {
        let node = Node {
            key,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn link_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.nodes[slot].as_mut() {
            node.prev = old_tail;
            node.next = NIL;
        }
        if old_tail == NIL {
            self.head = slot;
        } else if let Some(prev) = self.nodes[old_tail].as_mut() {
            prev.next = slot;
        }
        self.tail = slot;
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.nodes[slot].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        if prev == NIL {
            self.head = next;
        } else if let Some(node) = self.nodes[prev].as_mut() {
            node.next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else if let Some(node) = self.nodes[next].as_mut() {
            node.prev = prev;
        }
        if let Some(node) = self.nodes[slot].as_mut() {
            node.prev = NIL;
            node.next = NIL;
        }
    }
}
