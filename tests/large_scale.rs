use betree_kv::{MemBackingStore, Tree, TreeConfig};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

/// Inserting 200,000 keys in shuffled order forces many splits and
/// multi-level flushes; every key must still resolve to its own value
/// afterward, and an unwritten key must report absent.
#[test]
fn two_hundred_thousand_inserts_survive_many_splits() {
    let tree = Tree::new(MemBackingStore::new(), TreeConfig::default());

    let mut keys: Vec<u64> = (0..200_000u64).collect();
    let mut rng = XorShiftRng::from_seed([7u8; 16]);
    keys.shuffle(&mut rng);

    for &k in &keys {
        tree.insert(k, k);
    }

    assert_eq!(tree.query(123_456), Some(123_456));
    assert_eq!(tree.query(200_001), None);

    for &k in keys.iter().step_by(997) {
        assert_eq!(tree.query(k), Some(k), "key {k}");
    }
}

/// A shuffled insert/erase workload agrees with the effective live set when
/// walked with the ordered iterator.
#[test]
fn shuffled_inserts_then_sparse_erase_iterate_in_order() {
    let config = TreeConfig::builder()
        .max_node_size(128)
        .min_flush_size(8)
        .build();
    let tree = Tree::new(MemBackingStore::new(), config);

    let mut keys: Vec<u64> = (0..5_000u64).collect();
    let mut rng = XorShiftRng::from_seed([3u8; 16]);
    keys.shuffle(&mut rng);

    for &k in &keys {
        tree.insert(k, k * 2);
    }
    for k in (0..5_000u64).step_by(3) {
        tree.erase(k);
    }

    let expected: Vec<(u64, u64)> = (0..5_000u64)
        .filter(|k| k % 3 != 0)
        .map(|k| (k, k * 2))
        .collect();
    let observed: Vec<(u64, u64)> = tree.begin().collect();
    assert_eq!(observed, expected);
}
