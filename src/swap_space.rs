//! The reference-counted, LRU-managed object cache that pages tree nodes
//! to and from a [`BackingStore`].
//!
//! Every node lives behind a [`NodePtr`] (a handle, analogous to the
//! original `swap_space::pointer<Referent>`), which tracks only an object
//! id. Dereferencing a handle ("pinning" it, analogous to `swap_space::pin`)
//! guarantees the node is resident in memory for as long as the returned
//! [`Pin`]/[`PinMut`] guard is alive, refreshes its LRU position, and may
//! trigger eviction of some other, currently-unpinned object to make room.
//!
//! Bookkeeping (the object table, the LRU queue, refcounts and pincounts) is
//! guarded by its own `parking_lot::Mutex`, independent of the tree's
//! reader-writer lock, so that a read-only query can still perform LRU
//! touch-ups and evictions without contending for the tree's write lock.
//! The tree lock is always acquired (by the caller) before this mutex is
//! ever taken, never the other way around, so the two can't deadlock each
//! other.

use crate::backing_store::BackingStore;
use crate::node::{ChildInfo, Node};
use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::{BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Residency and usage bookkeeping for one allocated object. The node's
/// bytes themselves live in `node`, or are absent (`None`) while the object
/// is swapped out.
struct ObjectRecord<B: BackingStore> {
    version: u64,
    node: Option<Arc<Mutex<Node<B>>>>,
    dirty: bool,
    refcount: u64,
    pincount: u64,
    last_access: u64,
    /// Whether the object's most recent write-back found it to be a leaf
    /// (no child handles). Lets a final `release` skip loading a leaf just
    /// to discover it has nothing to cascade-drop.
    is_leaf: bool,
}

/// Counters surfaced for diagnostics; not used by the engine itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub allocations: u64,
    pub accesses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

struct SwapSpaceState<B: BackingStore> {
    objects: HashMap<u64, ObjectRecord<B>>,
    /// (last_access, id) pairs for every currently resident object, used to
    /// find an eviction victim in ascending-recency order.
    lru: BTreeSet<(u64, u64)>,
    next_id: u64,
    next_access_time: u64,
    max_in_memory: usize,
    current_in_memory: usize,
    stats: Stats,
}

struct SwapSpaceInner<B: BackingStore> {
    backing_store: B,
    state: Mutex<SwapSpaceState<B>>,
}

/// A cloneable handle to the shared cache. Cheap to clone (an `Arc` bump);
/// every [`NodePtr`] carries one so it can reach the object table on drop.
pub struct SwapSpace<B: BackingStore> {
    inner: Arc<SwapSpaceInner<B>>,
}

impl<B: BackingStore> Clone for SwapSpace<B> {
    fn clone(&self) -> Self {
        SwapSpace {
            inner: self.inner.clone(),
        }
    }
}

impl<B: BackingStore> SwapSpace<B> {
    pub fn new(backing_store: B, cache_size: usize) -> Self {
        SwapSpace {
            inner: Arc::new(SwapSpaceInner {
                backing_store,
                state: Mutex::new(SwapSpaceState {
                    objects: HashMap::new(),
                    lru: BTreeSet::new(),
                    next_id: 0,
                    next_access_time: 0,
                    max_in_memory: cache_size.max(1),
                    current_in_memory: 0,
                    stats: Stats::default(),
                }),
            }),
        }
    }

    pub fn stats(&self) -> Stats {
        self.inner.state.lock().stats
    }

    /// Changes the resident-object budget, evicting immediately if the new
    /// size is smaller than the current residency.
    pub fn set_cache_size(&self, size: usize) {
        let mut guard = self.inner.state.lock();
        guard.max_in_memory = size.max(1);
        self.maybe_evict_locked(&mut guard);
    }

    /// Wraps `node` in a freshly allocated object record (refcount 1,
    /// unwritten, dirty) and returns a handle to it.
    pub(crate) fn allocate(&self, node: Node<B>) -> NodePtr<B> {
        let mut guard = self.inner.state.lock();
        let id = guard.next_id;
        guard.next_id += 1;
        let access = guard.next_access_time;
        guard.next_access_time += 1;
        let is_leaf = node.is_leaf();
        guard.objects.insert(
            id,
            ObjectRecord {
                version: 0,
                node: Some(Arc::new(Mutex::new(node))),
                dirty: true,
                refcount: 1,
                pincount: 0,
                last_access: access,
                is_leaf,
            },
        );
        guard.lru.insert((access, id));
        guard.current_in_memory += 1;
        guard.stats.allocations += 1;
        self.maybe_evict_locked(&mut guard);
        NodePtr {
            ss: self.clone(),
            id,
        }
    }

    pub(crate) fn is_dirty(&self, id: u64) -> bool {
        self.inner
            .state
            .lock()
            .objects
            .get(&id)
            .map(|r| r.dirty)
            .unwrap_or(false)
    }

    pub(crate) fn pin(&self, id: u64) -> Pin<B> {
        let arc = self.acquire(id, false);
        Pin {
            ss: self.clone(),
            id,
            guard: Some(arc.lock_arc()),
        }
    }

    pub(crate) fn pin_mut(&self, id: u64) -> PinMut<B> {
        let arc = self.acquire(id, true);
        PinMut {
            ss: self.clone(),
            id,
            guard: Some(arc.lock_arc()),
        }
    }

    fn acquire(&self, id: u64, mark_dirty: bool) -> Arc<Mutex<Node<B>>> {
        let mut guard = self.inner.state.lock();
        self.ensure_resident_locked(&mut guard, id);
        self.touch_locked(&mut guard, id, mark_dirty);
        guard.objects.get_mut(&id).unwrap().pincount += 1;
        self.maybe_evict_locked(&mut guard);
        guard.objects.get(&id).unwrap().node.clone().unwrap()
    }

    fn unpin(&self, id: u64) {
        let mut guard = self.inner.state.lock();
        guard
            .objects
            .get_mut(&id)
            .expect("structural violation: unpin of unknown object")
            .pincount -= 1;
        self.maybe_evict_locked(&mut guard);
    }

    /// Mints a fresh in-memory handle for a child named by id in a parent's
    /// on-disk pivot table. The persisted reference and this freshly
    /// materialized handle are the same reference, one on disk, now one in
    /// memory, so the refcount is left untouched (see [`Node::to_repr`]'s
    /// matching detach on write-back).
    fn attach_locked(&self, guard: &SwapSpaceState<B>, id: u64) -> NodePtr<B> {
        guard
            .objects
            .get(&id)
            .expect("structural violation: unknown child object id");
        NodePtr {
            ss: self.clone(),
            id,
        }
    }

    fn touch_locked(&self, guard: &mut SwapSpaceState<B>, id: u64, mark_dirty: bool) {
        let old_access = guard.objects.get(&id).unwrap().last_access;
        guard.lru.remove(&(old_access, id));
        let new_access = guard.next_access_time;
        guard.next_access_time += 1;
        {
            let rec = guard.objects.get_mut(&id).unwrap();
            rec.last_access = new_access;
            rec.dirty |= mark_dirty;
        }
        guard.lru.insert((new_access, id));
        guard.stats.accesses += 1;
    }

    fn ensure_resident_locked(&self, guard: &mut SwapSpaceState<B>, id: u64) {
        if guard.objects.get(&id).unwrap().node.is_some() {
            return;
        }
        let version = guard.objects.get(&id).unwrap().version;
        assert!(
            version > 0,
            "structural violation: object {id} is absent from cache but was never written back"
        );
        let bytes = self
            .inner
            .backing_store
            .get(id, version)
            .unwrap_or_else(|e| panic!("backing store get failed for object {id} v{version}: {e}"));
        let repr: crate::node::NodeRepr = bincode::deserialize(&bytes)
            .unwrap_or_else(|e| panic!("corrupt node bytes for object {id} v{version}: {e}"));
        let pivots = repr
            .pivots
            .into_iter()
            .map(|(k, child_id, size)| {
                (
                    k,
                    ChildInfo {
                        child: self.attach_locked(guard, child_id),
                        size,
                    },
                )
            })
            .collect();
        let node = Node::from_parts(pivots, repr.messages.into_iter().collect());
        let rec = guard.objects.get_mut(&id).unwrap();
        rec.node = Some(Arc::new(Mutex::new(node)));
        guard.current_in_memory += 1;
    }

    fn write_back_locked(&self, guard: &mut SwapSpaceState<B>, id: u64) {
        let (repr, is_leaf, dirty, version) = {
            let rec = guard.objects.get(&id).unwrap();
            let arc = rec
                .node
                .clone()
                .expect("structural violation: write-back of non-resident object");
            let mut node = arc.lock();
            // `to_repr` detaches every live child handle as it serializes
            // them, so this must run before the caller frees this node's
            // in-memory target; otherwise dropping the (still populated)
            // pivot map on eviction would release each child's refcount a
            // second time.
            let repr = node.to_repr();
            let is_leaf = repr.pivots.is_empty();
            (repr, is_leaf, rec.dirty, rec.version)
        };
        if dirty {
            let bytes = bincode::serialize(&repr)
                .unwrap_or_else(|e| panic!("failed to serialize object {id}: {e}"));
            let new_version = version + 1;
            self.inner
                .backing_store
                .allocate(id, new_version)
                .unwrap_or_else(|e| panic!("allocate failed for object {id} v{new_version}: {e}"));
            self.inner
                .backing_store
                .put(id, new_version, &bytes)
                .unwrap_or_else(|e| panic!("put failed for object {id} v{new_version}: {e}"));
            if version > 0 {
                self.inner
                    .backing_store
                    .deallocate(id, version)
                    .unwrap_or_else(|e| panic!("deallocate failed for object {id} v{version}: {e}"));
            }
            let rec = guard.objects.get_mut(&id).unwrap();
            rec.version = new_version;
            rec.dirty = false;
            guard.stats.write_backs += 1;
        }
        guard.objects.get_mut(&id).unwrap().is_leaf = is_leaf;
    }

    /// Evicts unpinned, least-recently-used objects until residency is back
    /// within budget, or until every resident object is pinned.
    fn maybe_evict_locked(&self, guard: &mut SwapSpaceState<B>) {
        while guard.current_in_memory > guard.max_in_memory {
            let victim = guard
                .lru
                .iter()
                .find(|(_, id)| guard.objects[id].pincount == 0)
                .copied();
            let Some((last_access, id)) = victim else {
                break;
            };
            guard.lru.remove(&(last_access, id));
            self.write_back_locked(guard, id);
            guard.objects.get_mut(&id).unwrap().node = None;
            guard.current_in_memory -= 1;
            guard.stats.evictions += 1;
        }
    }

    /// Drops one reference to `id`; once the refcount reaches zero, the
    /// object is loaded (if it isn't resident and isn't known to be a leaf,
    /// so its child handles can be dropped recursively), removed from the
    /// table, and its on-disk version freed.
    fn release(&self, id: u64) {
        let mut guard = self.inner.state.lock();
        let zero = {
            let rec = guard
                .objects
                .get_mut(&id)
                .expect("structural violation: release of unknown object");
            rec.refcount -= 1;
            rec.refcount == 0
        };
        if !zero {
            return;
        }
        let needs_load =
            guard.objects.get(&id).unwrap().node.is_none() && !guard.objects.get(&id).unwrap().is_leaf;
        if needs_load {
            self.ensure_resident_locked(&mut guard, id);
        }
        let rec = guard.objects.remove(&id).unwrap();
        guard.lru.remove(&(rec.last_access, id));
        if rec.node.is_some() {
            guard.current_in_memory -= 1;
        }
        let version = rec.version;
        // Release the table lock before dropping `rec.node`: dropping it
        // recursively drops this object's child `NodePtr`s, each of which
        // calls back into `release` and would otherwise deadlock on this
        // same mutex.
        drop(guard);
        drop(rec.node);
        if version > 0 {
            self.inner
                .backing_store
                .deallocate(id, version)
                .unwrap_or_else(|e| panic!("deallocate failed for object {id} v{version}: {e}"));
        }
    }
}

/// A handle to a swapped node, analogous to `swap_space::pointer<Referent>`.
/// Cloning bumps the object's refcount; dropping the last clone frees it.
pub struct NodePtr<B: BackingStore> {
    ss: SwapSpace<B>,
    id: u64,
}

impl<B: BackingStore> NodePtr<B> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn pin(&self) -> Pin<B> {
        self.ss.pin(self.id)
    }

    pub(crate) fn pin_mut(&self) -> PinMut<B> {
        self.ss.pin_mut(self.id)
    }

    /// Detaches this handle without releasing its reference: the id is
    /// handed to a persisted representation that now owns the reference
    /// this handle used to hold in memory, mirroring the original swap
    /// space's serializer, which zeroes a handle's id once it has been
    /// written out rather than dropping it normally. Used only by
    /// [`crate::node::Node::to_repr`] while writing a node's pivot table
    /// out to its on-disk form.
    pub(crate) fn detach(self) -> u64 {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl<B: BackingStore> Clone for NodePtr<B> {
    fn clone(&self) -> Self {
        let mut guard = self.ss.inner.state.lock();
        guard
            .objects
            .get_mut(&self.id)
            .expect("structural violation: clone of unknown object handle")
            .refcount += 1;
        drop(guard);
        NodePtr {
            ss: self.ss.clone(),
            id: self.id,
        }
    }
}

impl<B: BackingStore> Drop for NodePtr<B> {
    fn drop(&mut self) {
        self.ss.release(self.id);
    }
}

/// A read-only guarantee that the pinned node is resident for as long as
/// this guard lives. Analogous to `swap_space::pin<Referent>`.
pub struct Pin<B: BackingStore> {
    ss: SwapSpace<B>,
    id: u64,
    guard: Option<ArcMutexGuard<RawMutex, Node<B>>>,
}

impl<B: BackingStore> Deref for Pin<B> {
    type Target = Node<B>;
    fn deref(&self) -> &Node<B> {
        self.guard.as_ref().unwrap()
    }
}

impl<B: BackingStore> Drop for Pin<B> {
    fn drop(&mut self) {
        self.guard = None;
        self.ss.unpin(self.id);
    }
}

/// A mutable counterpart to [`Pin`]. Marks the object dirty the moment it's
/// taken, since the caller is assumed to mutate it.
pub struct PinMut<B: BackingStore> {
    ss: SwapSpace<B>,
    id: u64,
    guard: Option<ArcMutexGuard<RawMutex, Node<B>>>,
}

impl<B: BackingStore> Deref for PinMut<B> {
    type Target = Node<B>;
    fn deref(&self) -> &Node<B> {
        self.guard.as_ref().unwrap()
    }
}

impl<B: BackingStore> DerefMut for PinMut<B> {
    fn deref_mut(&mut self) -> &mut Node<B> {
        self.guard.as_mut().unwrap()
    }
}

impl<B: BackingStore> Drop for PinMut<B> {
    fn drop(&mut self) {
        self.guard = None;
        self.ss.unpin(self.id);
    }
}
