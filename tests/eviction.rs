use betree_kv::{MemBackingStore, Tree, TreeConfig};

/// A small `max_node_size` forces a multi-level tree (internal nodes with
/// real children) out of a few thousand inserts; a `cache_size` far smaller
/// than the resulting node count forces the swap space to write back and
/// evict internal nodes -- not just leaves -- while the tree is still being
/// built. Every key must still resolve correctly afterward, and a full
/// forward scan must still observe every key exactly once in order.
#[test]
fn eviction_under_memory_pressure_preserves_correctness() {
    let config = TreeConfig::builder()
        .max_node_size(32)
        .min_flush_size(4)
        .cache_size(4)
        .build();
    let tree = Tree::new(MemBackingStore::new(), config);

    for k in 0..3000u64 {
        tree.insert(k, k * 3);
    }

    for k in 0..3000u64 {
        assert_eq!(tree.query(k), Some(k * 3), "key {k}");
    }
    assert_eq!(tree.query(3000), None);

    let observed: Vec<(u64, u64)> = tree.begin().collect();
    let expected: Vec<(u64, u64)> = (0..3000u64).map(|k| (k, k * 3)).collect();
    assert_eq!(observed, expected);
}

/// Shrinking the cache budget mid-workload, after a tree already has
/// several levels resident, must still page correctly: earlier inserts are
/// evicted out from under later ones without corrupting the tree.
#[test]
fn shrinking_cache_size_mid_workload_preserves_correctness() {
    let config = TreeConfig::builder()
        .max_node_size(32)
        .min_flush_size(4)
        .cache_size(1 << 16)
        .build();
    let tree = Tree::new(MemBackingStore::new(), config);

    for k in 0..1500u64 {
        tree.insert(k, k + 1);
    }
    tree.set_cache_size(4);
    for k in 1500..3000u64 {
        tree.insert(k, k + 1);
    }

    for k in 0..3000u64 {
        assert_eq!(tree.query(k), Some(k + 1), "key {k}");
    }
}

/// Erasing, updating, and re-inserting across a tiny cache budget -- so
/// every operation risks paging a node back in -- must still agree with the
/// plain message algebra.
#[test]
fn tiny_cache_with_mixed_operations() {
    let config = TreeConfig::builder()
        .max_node_size(24)
        .min_flush_size(3)
        .cache_size(3)
        .build();
    let tree = Tree::new(MemBackingStore::new(), config);

    for k in 0..1000u64 {
        tree.insert(k, k);
    }
    for k in (0..1000u64).step_by(2) {
        tree.erase(k);
    }
    for k in (0..1000u64).step_by(3) {
        tree.update(k, 5);
    }

    for k in 0..1000u64 {
        let expected = if k % 2 == 0 {
            None
        } else if k % 3 == 0 {
            Some(k + 5)
        } else {
            Some(k)
        };
        assert_eq!(tree.query(k), expected, "key {k}");
    }
}
