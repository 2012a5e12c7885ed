//! Property tests checking the tree against a plain `BTreeMap` model under
//! the same message algebra, the way the reference engine's leaf-node tests
//! check a structure against `quickcheck`-generated operation sequences.

use betree_kv::{MemBackingStore, Tree, TreeConfig};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
enum Op {
    Insert(u64, u64),
    Update(u64, u64),
    Erase(u64),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        let key = u64::arbitrary(g) % 64;
        let value = u64::arbitrary(g) % 1000;
        match u32::arbitrary(g) % 3 {
            0 => Op::Insert(key, value),
            1 => Op::Update(key, value),
            _ => Op::Erase(key),
        }
    }
}

fn apply_model(model: &mut BTreeMap<u64, u64>, op: Op, default_value: u64) {
    match op {
        Op::Insert(k, v) => {
            model.insert(k, v);
        }
        Op::Update(k, d) => {
            let base = model.get(&k).copied().unwrap_or(default_value);
            model.insert(k, base.wrapping_add(d));
        }
        Op::Erase(k) => {
            model.remove(&k);
        }
    }
}

/// A small-node tree replaying the same operation sequence as a `BTreeMap`
/// model must agree on every key's resolved value, including absence.
#[quickcheck]
fn matches_btreemap_model(ops: Vec<Op>) -> bool {
    let config = TreeConfig::builder()
        .max_node_size(16)
        .min_flush_size(2)
        .build();
    let tree = Tree::new(MemBackingStore::new(), config);
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(k, v) => tree.insert(k, v),
            Op::Update(k, d) => tree.update(k, d),
            Op::Erase(k) => tree.erase(k),
        }
        apply_model(&mut model, op, 0);
    }

    for k in 0..64u64 {
        if tree.query(k) != model.get(&k).copied() {
            return false;
        }
    }
    true
}

/// Forward iteration must match the model's ascending key order exactly,
/// regardless of node-split boundaries.
#[quickcheck]
fn iteration_matches_btreemap_model(ops: Vec<Op>) -> bool {
    let config = TreeConfig::builder()
        .max_node_size(16)
        .min_flush_size(2)
        .build();
    let tree = Tree::new(MemBackingStore::new(), config);
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(k, v) => tree.insert(k, v),
            Op::Update(k, d) => tree.update(k, d),
            Op::Erase(k) => tree.erase(k),
        }
        apply_model(&mut model, op, 0);
    }

    let observed: Vec<(u64, u64)> = tree.begin().collect();
    let expected: Vec<(u64, u64)> = model.into_iter().collect();
    observed == expected
}
