//! The public façade: a write-optimized ordered key-value index backed by
//! a B^ε-tree, a swap space, and a reader-writer concurrency lock.

use crate::backing_store::BackingStore;
use crate::config::TreeConfig;
use crate::iter::Iter;
use crate::lock::{current_thread_slot, Concurrency};
use crate::message::{MessageKey, MessageValue};
use crate::node::Node;
use crate::swap_space::{NodePtr, SwapSpace};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Tree<B: BackingStore> {
    ss: SwapSpace<B>,
    root: NodePtr<B>,
    config: TreeConfig,
    lock: Concurrency,
    next_timestamp: AtomicU64,
}

impl<B: BackingStore> Tree<B> {
    pub fn new(backing_store: B, config: TreeConfig) -> Self {
        let ss = SwapSpace::new(backing_store, config.cache_size);
        let root = ss.allocate(Node::empty_leaf());
        let num_slots = num_cpus::get().max(1);
        Tree {
            ss,
            root,
            config,
            lock: Concurrency::spin(num_slots),
            next_timestamp: AtomicU64::new(1),
        }
    }

    /// Builds a tree whose concurrency layer blocks on a `parking_lot::RwLock`
    /// instead of spinning, useful when writers hold the lock long enough
    /// that spinning readers would waste more CPU than they save.
    pub fn with_blocking_lock(backing_store: B, config: TreeConfig) -> Self {
        let ss = SwapSpace::new(backing_store, config.cache_size);
        let root = ss.allocate(Node::empty_leaf());
        Tree {
            ss,
            root,
            config,
            lock: Concurrency::blocking(),
            next_timestamp: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn insert(&self, key: u64, value: u64) {
        self.upsert_one(key, MessageValue::Insert(value));
    }

    pub fn update(&self, key: u64, delta: u64) {
        self.upsert_one(key, MessageValue::Update(delta));
    }

    pub fn erase(&self, key: u64) {
        self.upsert_one(key, MessageValue::Delete);
    }

    pub fn query(&self, key: u64) -> Option<u64> {
        let _slot = current_thread_slot(self.lock.num_slots());
        let _guard = self.lock.read();
        let pin = self.root.pin();
        let result = pin.query(&self.ss, key, self.config.default_value);
        log::trace!("query({key}) -> {result:?}");
        result
    }

    /// Amortizes lock acquisition across many inserts, assigning each a
    /// distinct, strictly increasing timestamp while the write lock is
    /// held once for the whole batch.
    pub fn insert_batch(&self, items: impl IntoIterator<Item = (u64, u64)>) {
        self.upsert_batch(items.into_iter().map(|(k, v)| (k, MessageValue::Insert(v))));
    }

    pub fn update_batch(&self, items: impl IntoIterator<Item = (u64, u64)>) {
        self.upsert_batch(items.into_iter().map(|(k, d)| (k, MessageValue::Update(d))));
    }

    pub fn erase_batch(&self, keys: impl IntoIterator<Item = u64>) {
        self.upsert_batch(keys.into_iter().map(|k| (k, MessageValue::Delete)));
    }

    fn upsert_one(&self, key: u64, value: MessageValue) {
        self.upsert_batch(std::iter::once((key, value)));
    }

    fn upsert_batch(&self, items: impl IntoIterator<Item = (u64, MessageValue)>) {
        let _guard = self.lock.write();
        let mut batch = BTreeMap::new();
        for (key, value) in items {
            let ts = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
            batch.insert(MessageKey::new(key, ts), value);
        }
        if batch.is_empty() {
            return;
        }
        self.flush_into_root(batch);
    }

    fn flush_into_root(&self, batch: BTreeMap<MessageKey, MessageValue>) {
        let new_pivots = {
            let mut root = self.root.pin_mut();
            root.flush(&self.config, &self.ss, batch)
        };
        if let Some(new_pivots) = new_pivots {
            let mut root = self.root.pin_mut();
            root.pivots = new_pivots;
            root.messages = BTreeMap::new();
            root.dirty = true;
        }
    }

    pub(crate) fn next_raw_message(
        &self,
        cursor: Option<MessageKey>,
    ) -> Option<(MessageKey, MessageValue)> {
        let pin = self.root.pin();
        pin.next_message(&self.ss, cursor)
    }

    pub fn begin(&self) -> Iter<'_, B> {
        Iter::new(self, None)
    }

    pub fn end(&self) -> Iter<'_, B> {
        Iter::empty(self)
    }

    pub fn lower_bound(&self, key: u64) -> Iter<'_, B> {
        Iter::new(self, Some(MessageKey::min_for(key)))
    }

    pub fn upper_bound(&self, key: u64) -> Iter<'_, B> {
        Iter::new(self, Some(MessageKey::max_for(key)))
    }

    /// Walks every still-buffered raw message in key/timestamp order,
    /// logging each at debug level. Exposed for inspection tooling rather
    /// than for production read paths.
    pub fn dump_messages(&self) -> Vec<(MessageKey, MessageValue)> {
        let mut out = Vec::new();
        let mut cursor = None;
        while let Some((mk, mv)) = self.next_raw_message(cursor) {
            log::debug!("{:?} -> {:?}", mk, mv);
            out.push((mk, mv));
            cursor = Some(mk);
        }
        out
    }

    #[cfg(feature = "internal-api")]
    pub fn cache_stats(&self) -> crate::swap_space::Stats {
        self.ss.stats()
    }

    pub fn set_cache_size(&self, size: usize) {
        self.ss.set_cache_size(size);
    }
}

