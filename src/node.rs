//! The node engine: pivot-routed children plus a buffered message map, and
//! the flush/split/query/iteration algorithms that operate on them.

use crate::backing_store::BackingStore;
use crate::message::{apply_message, Key, MessageKey, MessageValue};
use crate::swap_space::{NodePtr, SwapSpace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// A child slot: the handle to route into, plus the cached size (pivot
/// count + message count) observed the last time that child was visited.
/// The cache lets a parent decide whether it's overfull without pinning
/// every child on every write.
pub(crate) struct ChildInfo<B: BackingStore> {
    pub child: NodePtr<B>,
    pub size: u64,
}

pub(crate) struct Node<B: BackingStore> {
    pub(crate) pivots: BTreeMap<Key, ChildInfo<B>>,
    pub(crate) messages: BTreeMap<MessageKey, MessageValue>,
    pub(crate) dirty: bool,
}

/// The on-disk shape of a node: pivots as plain `(key, child_id, child_size)`
/// triples (no live handles, those only exist in memory) followed by the
/// message buffer. Whether the node is a leaf is recovered on load simply
/// by checking whether `pivots` is empty.
#[derive(Serialize, Deserialize)]
pub(crate) struct NodeRepr {
    pub pivots: Vec<(Key, u64, u64)>,
    pub messages: Vec<(MessageKey, MessageValue)>,
}

impl<B: BackingStore> Node<B> {
    pub(crate) fn empty_leaf() -> Self {
        Node {
            pivots: BTreeMap::new(),
            messages: BTreeMap::new(),
            dirty: true,
        }
    }

    pub(crate) fn from_parts(
        pivots: BTreeMap<Key, ChildInfo<B>>,
        messages: BTreeMap<MessageKey, MessageValue>,
    ) -> Self {
        Node {
            pivots,
            messages,
            dirty: false,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.pivots.is_empty()
    }

    pub(crate) fn size(&self) -> usize {
        self.pivots.len() + self.messages.len()
    }

    /// Serializes this node for write-back, consuming its live child
    /// handles as it does: the written form names each child by id only,
    /// so that id now owns the persisted reference. Each child handle is
    /// detached rather than dropped in the ordinary way, since an ordinary
    /// drop would release the child's refcount for a reference that still
    /// lives on disk (this node is about to be freed from memory by the
    /// caller, not deleted).
    pub(crate) fn to_repr(&mut self) -> NodeRepr {
        let pivots = std::mem::take(&mut self.pivots)
            .into_iter()
            .map(|(k, ci)| (k, ci.child.detach(), ci.size))
            .collect();
        NodeRepr {
            pivots,
            messages: self.messages.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    /// The key of the greatest pivot at or below `key`; for an internal
    /// node this is always present, since every node's pivot keys cover
    /// `[first_pivot, +inf)` and messages never precede the first pivot.
    fn routing_pivot_key(&self, key: Key) -> Key {
        self.pivots
            .range(..=key)
            .next_back()
            .map(|(k, _)| *k)
            .unwrap_or_else(|| {
                *self
                    .pivots
                    .keys()
                    .next()
                    .expect("structural violation: routing lookup on a leaf")
            })
    }

    fn next_pivot_after(&self, pivot_key: Key) -> Option<Key> {
        self.pivots
            .range((Excluded(pivot_key), Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    /// Whether this node currently buffers no messages routed to the child
    /// at `pivot_key`, the fast-path precondition for flushing straight
    /// into an already-dirty, resident child without merging buffers.
    fn buffer_slice_empty(&self, pivot_key: Key) -> bool {
        self.buffer_slice_count(pivot_key) == 0
    }

    fn buffer_slice_count(&self, pivot_key: Key) -> usize {
        let lo = MessageKey::min_for(pivot_key);
        match self.next_pivot_after(pivot_key) {
            Some(next) => self.messages.range(lo..MessageKey::min_for(next)).count(),
            None => self.messages.range(lo..).count(),
        }
    }

    fn extract_buffer_slice(&mut self, pivot_key: Key) -> BTreeMap<MessageKey, MessageValue> {
        let lo = MessageKey::min_for(pivot_key);
        let keys: Vec<MessageKey> = match self.next_pivot_after(pivot_key) {
            Some(next) => self
                .messages
                .range(lo..MessageKey::min_for(next))
                .map(|(k, _)| *k)
                .collect(),
            None => self.messages.range(lo..).map(|(k, _)| *k).collect(),
        };
        let mut slice = BTreeMap::new();
        for k in keys {
            let v = self.messages.remove(&k).unwrap();
            slice.insert(k, v);
        }
        slice
    }

    fn apply_one(&mut self, mkey: MessageKey, mval: MessageValue, default_value: u64) {
        apply_message(&mut self.messages, self.is_leaf(), default_value, mkey, mval);
        self.dirty = true;
    }

    /// Folds `incoming` into this node, recursing a flush into children as
    /// needed, and splitting this node if it ends up overfull. Returns
    /// `Some(new_pivots)` when this node was split; the caller is
    /// responsible for installing them in place of this node's old pivot
    /// entry (or, for the root, as the tree's new top-level pivot set).
    pub(crate) fn flush(
        &mut self,
        cfg: &crate::config::TreeConfig,
        ss: &SwapSpace<B>,
        incoming: BTreeMap<MessageKey, MessageValue>,
    ) -> Option<BTreeMap<Key, ChildInfo<B>>> {
        if incoming.is_empty() {
            return None;
        }

        if self.is_leaf() {
            for (mk, mv) in incoming {
                self.apply_one(mk, mv, cfg.default_value);
            }
            if self.size() >= cfg.max_node_size {
                return Some(self.split(cfg, ss));
            }
            return None;
        }

        // A message keyed below this node's current minimum pivot widens
        // the node's covered range; the first pivot is rewritten in place
        // (its child subtree still owns every key from the old minimum
        // upward). Already-buffered messages are not migrated below the
        // new pivot, they keep routing exactly as they did before.
        let old_min = *self.pivots.keys().next().unwrap();
        let incoming_min = incoming.keys().next().unwrap().key;
        if incoming_min < old_min {
            let ci = self.pivots.remove(&old_min).unwrap();
            self.pivots.insert(incoming_min, ci);
        }

        let first_key = incoming.keys().next().unwrap().key;
        let last_key = incoming.keys().next_back().unwrap().key;
        let first_pivot = self.routing_pivot_key(first_key);
        let last_pivot = self.routing_pivot_key(last_key);

        if first_pivot == last_pivot
            && self.buffer_slice_empty(first_pivot)
            && ss.is_dirty(self.pivots[&first_pivot].child.id())
        {
            self.recurse_flush(cfg, ss, first_pivot, incoming);
        } else {
            for (mk, mv) in incoming {
                self.apply_one(mk, mv, cfg.default_value);
            }
            while self.size() >= cfg.max_node_size {
                let Some((pivot_key, count)) = self.largest_buffered_slice() else {
                    break;
                };
                if count <= cfg.min_flush_size / 2 {
                    break;
                }
                let slice = self.extract_buffer_slice(pivot_key);
                self.recurse_flush(cfg, ss, pivot_key, slice);
            }
            if self.size() > cfg.max_node_size {
                return Some(self.split(cfg, ss));
            }
        }
        self.dirty = true;
        None
    }

    fn largest_buffered_slice(&self) -> Option<(Key, usize)> {
        self.pivots
            .keys()
            .map(|&pk| (pk, self.buffer_slice_count(pk)))
            .max_by_key(|(_, count)| *count)
    }

    fn recurse_flush(
        &mut self,
        cfg: &crate::config::TreeConfig,
        ss: &SwapSpace<B>,
        pivot_key: Key,
        slice: BTreeMap<MessageKey, MessageValue>,
    ) {
        let new_children = {
            let mut child = self.pivots[&pivot_key].child.pin_mut();
            child.flush(cfg, ss, slice)
        };
        if let Some(new_children) = new_children {
            self.pivots.remove(&pivot_key);
            self.pivots.extend(new_children);
        } else {
            let size = {
                let child = self.pivots[&pivot_key].child.pin();
                child.size() as u64
            };
            self.pivots.get_mut(&pivot_key).unwrap().size = size;
        }
    }

    /// Divides this overfull node into `ceil(total / leaves)`-sized pieces,
    /// where `leaves = total / (10 * max_node_size / 24)`, walking the
    /// pivots and messages in sorted-key order and assigning each new node
    /// a pivot (if any remain) plus every message up to the next pivot.
    /// Clears this node's own pivots and messages as a side effect; the
    /// caller installs the returned map in their place.
    pub(crate) fn split(
        &mut self,
        cfg: &crate::config::TreeConfig,
        ss: &SwapSpace<B>,
    ) -> BTreeMap<Key, ChildInfo<B>> {
        let total = self.size();
        let denom = ((10 * cfg.max_node_size) / 24).max(1);
        let num_leaves = (total / denom).max(1);
        let per_leaf = (total + num_leaves - 1) / num_leaves;

        let mut pivots = std::mem::take(&mut self.pivots).into_iter().peekable();
        let mut messages = std::mem::take(&mut self.messages).into_iter().peekable();
        let mut result = BTreeMap::new();
        let mut moved = 0usize;

        for i in 0..num_leaves {
            if pivots.peek().is_none() && messages.peek().is_none() {
                break;
            }
            let new_pivot_key = match pivots.peek() {
                Some((k, _)) => *k,
                None => messages.peek().unwrap().0.key,
            };
            let mut new_pivots = BTreeMap::new();
            let mut new_messages = BTreeMap::new();
            let bound = (i + 1) * per_leaf;
            while moved < bound && (pivots.peek().is_some() || messages.peek().is_some()) {
                if pivots.peek().is_some() {
                    let (pk, ci) = pivots.next().unwrap();
                    new_pivots.insert(pk, ci);
                    moved += 1;
                    let next_pivot_key = pivots.peek().map(|(k, _)| *k);
                    loop {
                        let take = match (next_pivot_key, messages.peek()) {
                            (Some(nk), Some((mk, _))) => mk.key < nk,
                            (None, Some(_)) => true,
                            _ => false,
                        };
                        if !take {
                            break;
                        }
                        let (mk, mv) = messages.next().unwrap();
                        new_messages.insert(mk, mv);
                        moved += 1;
                    }
                } else {
                    let (mk, mv) = messages.next().unwrap();
                    new_messages.insert(mk, mv);
                    moved += 1;
                }
            }
            let size = (new_pivots.len() + new_messages.len()) as u64;
            let node = Node {
                pivots: new_pivots,
                messages: new_messages,
                dirty: true,
            };
            let ptr = ss.allocate(node);
            result.insert(new_pivot_key, ChildInfo { child: ptr, size });
        }
        debug_assert!(pivots.peek().is_none());
        debug_assert!(messages.peek().is_none());
        self.dirty = true;
        result
    }

    /// Resolves the effective value for `key`, recursing into children as
    /// needed. `None` means the key has no live value.
    pub(crate) fn query(&self, ss: &SwapSpace<B>, key: Key, default_value: u64) -> Option<u64> {
        if self.is_leaf() {
            let bound = MessageKey::max_for(key);
            return match self.messages.range(..=bound).next_back() {
                Some((mk, mv)) if mk.key == key => match mv {
                    MessageValue::Insert(v) => Some(*v),
                    other => panic!(
                        "structural violation: leaf buffer held a non-INSERT message ({other:?}) for key {key}"
                    ),
                },
                _ => None,
            };
        }

        let mut iter = self
            .messages
            .range(MessageKey::min_for(key)..)
            .take_while(|(mk, _)| mk.key == key)
            .peekable();

        let mut value;
        match iter.peek() {
            None => return self.query_child(ss, key, default_value),
            Some((_, MessageValue::Update(_))) => {
                value = self.query_child(ss, key, default_value).unwrap_or(default_value);
                // Don't advance: the trailing loop below folds in this same
                // boundary UPDATE along with any that follow it.
            }
            Some((_, MessageValue::Delete)) => {
                iter.next();
                if iter.peek().is_none() {
                    return None;
                }
                value = default_value;
            }
            Some((_, MessageValue::Insert(v))) => {
                value = *v;
                iter.next();
            }
        }

        for (_, mv) in iter {
            match mv {
                MessageValue::Update(delta) => value = value.wrapping_add(*delta),
                other => panic!(
                    "structural violation: expected an UPDATE continuation for key {key}, found {other:?}"
                ),
            }
        }
        Some(value)
    }

    fn query_child(&self, ss: &SwapSpace<B>, key: Key, default_value: u64) -> Option<u64> {
        let pivot_key = self.routing_pivot_key(key);
        let pin = self.pivots[&pivot_key].child.pin();
        pin.query(ss, key, default_value)
    }

    /// Returns the raw message with the smallest `MessageKey` strictly
    /// after `cursor` (or the smallest overall, if `cursor` is `None`),
    /// merging this node's own buffer with whatever its children produce.
    pub(crate) fn next_message(
        &self,
        ss: &SwapSpace<B>,
        cursor: Option<MessageKey>,
    ) -> Option<(MessageKey, MessageValue)> {
        let own_next = self.next_own_message(cursor);
        if self.is_leaf() {
            return own_next;
        }
        let child_next = self.next_from_children(ss, cursor);
        match (own_next, child_next) {
            (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn next_own_message(&self, cursor: Option<MessageKey>) -> Option<(MessageKey, MessageValue)> {
        match cursor {
            Some(c) => self
                .messages
                .range((Excluded(c), Unbounded))
                .next()
                .map(|(k, v)| (*k, *v)),
            None => self.messages.iter().next().map(|(k, v)| (*k, *v)),
        }
    }

    fn next_from_children(
        &self,
        ss: &SwapSpace<B>,
        cursor: Option<MessageKey>,
    ) -> Option<(MessageKey, MessageValue)> {
        let first_pivot = *self.pivots.keys().next().unwrap();
        let start_pivot = match cursor {
            Some(c) if c.key < first_pivot => None,
            Some(c) => Some(self.routing_pivot_key(c.key)),
            None => None,
        };
        let keys: Vec<Key> = self.pivots.keys().cloned().collect();
        let start_idx = match start_pivot {
            Some(pk) => keys.iter().position(|k| *k == pk).unwrap(),
            None => 0,
        };
        for pk in &keys[start_idx..] {
            let pin = self.pivots[pk].child.pin();
            if let Some(res) = pin.next_message(ss, cursor) {
                return Some(res);
            }
        }
        None
    }
}
