use betree_kv::{MemBackingStore, Tree, TreeConfig};

fn small_tree() -> Tree<MemBackingStore> {
    let config = TreeConfig::builder()
        .max_node_size(32)
        .min_flush_size(4)
        .build();
    Tree::new(MemBackingStore::new(), config)
}

#[test]
fn insert_then_query() {
    let tree = small_tree();
    tree.insert(1, 100);
    assert_eq!(tree.query(1), Some(100));
    assert_eq!(tree.query(2), None);
}

#[test]
fn update_adds_to_existing_value() {
    let tree = small_tree();
    tree.insert(5, 10);
    tree.update(5, 7);
    assert_eq!(tree.query(5), Some(17));
}

#[test]
fn update_with_no_prior_insert_applies_against_default() {
    let config = TreeConfig::builder().default_value(42).build();
    let tree = Tree::new(MemBackingStore::new(), config);
    tree.update(9, 8);
    assert_eq!(tree.query(9), Some(50));
}

#[test]
fn erase_removes_the_key() {
    let tree = small_tree();
    tree.insert(3, 30);
    tree.erase(3);
    assert_eq!(tree.query(3), None);
}

#[test]
fn erase_then_insert_then_update_chain() {
    // insert(5,100); erase(5); insert(5,9); update(5,1); update(5,1) -> 11
    let tree = small_tree();
    tree.insert(5, 100);
    tree.erase(5);
    tree.insert(5, 9);
    tree.update(5, 1);
    tree.update(5, 1);
    assert_eq!(tree.query(5), Some(11));
}

#[test]
fn update_overflow_wraps() {
    let tree = small_tree();
    tree.insert(1, u64::MAX);
    tree.update(1, 2);
    assert_eq!(tree.query(1), Some(1));
}

#[test]
fn iteration_visits_live_keys_in_order() {
    let tree = small_tree();
    for k in [5, 1, 3, 2, 4] {
        tree.insert(k, k * 10);
    }
    tree.erase(3);
    let observed: Vec<(u64, u64)> = tree.begin().collect();
    assert_eq!(observed, vec![(1, 10), (2, 20), (4, 40), (5, 50)]);
}

#[test]
fn lower_and_upper_bound_scope_the_scan() {
    let tree = small_tree();
    for k in 0..10u64 {
        tree.insert(k, k);
    }
    let from_five: Vec<u64> = tree.lower_bound(5).map(|(k, _)| k).collect();
    assert_eq!(from_five, vec![5, 6, 7, 8, 9]);

    let after_five: Vec<u64> = tree.upper_bound(5).map(|(k, _)| k).collect();
    assert_eq!(after_five, vec![6, 7, 8, 9]);
}

#[test]
fn end_iterator_is_immediately_exhausted() {
    let tree = small_tree();
    tree.insert(1, 1);
    assert_eq!(tree.end().next(), None);
}

#[test]
fn many_inserts_force_splits_and_flushes() {
    let tree = small_tree();
    for k in 0..2000u64 {
        tree.insert(k, k * 2);
    }
    for k in 0..2000u64 {
        assert_eq!(tree.query(k), Some(k * 2), "key {k}");
    }
    let all: Vec<u64> = tree.begin().map(|(k, _)| k).collect();
    let expected: Vec<u64> = (0..2000).collect();
    assert_eq!(all, expected);
}

#[test]
fn batched_upserts_apply_atomically_with_respect_to_ordering() {
    let tree = small_tree();
    tree.insert_batch((0..100u64).map(|k| (k, k)));
    tree.update_batch((0..100u64).map(|k| (k, 1)));
    tree.erase_batch((0..100u64).step_by(2));

    for k in 0..100u64 {
        if k % 2 == 0 {
            assert_eq!(tree.query(k), None, "key {k}");
        } else {
            assert_eq!(tree.query(k), Some(k + 1), "key {k}");
        }
    }
}

#[test]
fn overwriting_insert_discards_prior_updates() {
    let tree = small_tree();
    tree.insert(1, 1);
    tree.update(1, 1);
    tree.insert(1, 99);
    assert_eq!(tree.query(1), Some(99));
}
