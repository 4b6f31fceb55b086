//! End-to-end B+ tree scenarios.
//!
//! Exercises the index with tiny fan-out (leaf and internal max size 4)
//! so splits, redistribution, coalescing, and root adjustment all trigger
//! within a handful of keys. Every scenario finishes by checking that no
//! page was left pinned.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use marlin_buffer::{BufferPool, BufferPoolConfig, DiskManager, DiskManagerConfig};
use marlin_common::page::PageId;
use marlin_common::row::RowId;
use marlin_index::btree::registry;
use marlin_index::{BPlusTree, KeySchema};

fn make_pool(dir: &std::path::Path, num_frames: usize) -> Arc<BufferPool> {
    let disk = DiskManager::new(DiskManagerConfig {
        data_dir: dir.to_path_buf(),
        fsync_enabled: false,
    })
    .unwrap();
    Arc::new(BufferPool::new(BufferPoolConfig { num_frames }, disk))
}

fn make_tree(pool: &Arc<BufferPool>) -> BPlusTree {
    let schema = KeySchema::int64().unwrap();
    BPlusTree::new(1, 1, pool.clone(), schema.comparator(), 4, 4).unwrap()
}

fn rid(key: i64) -> RowId {
    RowId::new(PageId::new(7, key as u32), (key % 100) as u16)
}

fn insert_all(tree: &mut BPlusTree, schema: &KeySchema, keys: impl IntoIterator<Item = i64>) {
    for k in keys {
        assert!(tree.insert(&schema.encode_i64(k).unwrap(), rid(k)).unwrap(), "insert {k}");
    }
}

fn collect_keys(tree: &BPlusTree, schema: &KeySchema) -> Vec<i64> {
    let decoded: Vec<i64> = tree
        .iter()
        .unwrap()
        .map(|(k, _)| decode_i64(schema, &k))
        .collect();
    decoded
}

fn decode_i64(_schema: &KeySchema, key: &Bytes) -> i64 {
    let raw = u64::from_be_bytes([
        key[0], key[1], key[2], key[3], key[4], key[5], key[6], key[7],
    ]);
    (raw ^ (1 << 63)) as i64
}

#[test]
fn scenario_empty_lookup() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let tree = make_tree(&pool);

    assert_eq!(tree.get(&schema.encode_i64(5).unwrap()).unwrap(), None);
    assert!(tree.iter().unwrap() == tree.end());
    assert!(tree.check());
}

#[test]
fn scenario_split_to_depth_two() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, 1..=4);
    let root_before_split = tree.root_page_id();

    insert_all(&mut tree, &schema, [5]);
    assert_ne!(tree.root_page_id(), root_before_split, "root split expected");

    assert_eq!(tree.get(&schema.encode_i64(3).unwrap()).unwrap(), Some(rid(3)));
    assert_eq!(collect_keys(&tree, &schema), (1..=5).collect::<Vec<_>>());
    assert_eq!(
        registry::get_root(&pool, 1).unwrap(),
        Some(tree.root_page_id())
    );
    assert!(tree.check());
}

#[test]
fn scenario_split_to_depth_three() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, 1..=13);

    assert_eq!(collect_keys(&tree, &schema), (1..=13).collect::<Vec<_>>());
    assert_eq!(tree.get(&schema.encode_i64(13).unwrap()).unwrap(), Some(rid(13)));
    assert_eq!(tree.get(&schema.encode_i64(14).unwrap()).unwrap(), None);

    // Depth 3: the dot dump shows at least three internal nodes (a root
    // plus a split internal level).
    let dot = tree.to_graphviz().unwrap();
    assert!(dot.matches("[label=\"int").count() >= 3, "expected depth 3:\n{dot}");
    assert!(tree.check());
}

#[test]
fn scenario_delete_causing_redistribute() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    // Leaves {1,2} and {3,4,5,6}: removing 1 underflows the left leaf
    // while its right sibling is too full to merge, forcing a borrow.
    insert_all(&mut tree, &schema, 1..=6);
    tree.remove(&schema.encode_i64(1).unwrap()).unwrap();

    assert_eq!(collect_keys(&tree, &schema), (2..=6).collect::<Vec<_>>());
    for k in 2..=6 {
        assert_eq!(tree.get(&schema.encode_i64(k).unwrap()).unwrap(), Some(rid(k)), "get {k}");
    }
    assert!(tree.check());
}

#[test]
fn scenario_deep_delete_keeps_order() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, 1..=13);
    tree.remove(&schema.encode_i64(1).unwrap()).unwrap();

    assert_eq!(collect_keys(&tree, &schema), (2..=13).collect::<Vec<_>>());
    assert!(tree.check());
}

#[test]
fn scenario_delete_causing_coalesce_and_root_shrink() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, 1..=5);
    let split_root = tree.root_page_id();

    for k in [5, 4, 3] {
        tree.remove(&schema.encode_i64(k).unwrap()).unwrap();
    }

    // Leaves merged and the single-child internal root was replaced by
    // its child, shrinking the tree back to depth 1.
    assert!(!tree.is_empty());
    assert_ne!(tree.root_page_id(), split_root, "root shrink expected");
    assert_eq!(collect_keys(&tree, &schema), vec![1, 2]);
    assert_eq!(
        registry::get_root(&pool, 1).unwrap(),
        Some(tree.root_page_id())
    );
    assert!(tree.check());
}

#[test]
fn scenario_delete_to_empty() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, 1..=13);
    for k in 1..=13 {
        tree.remove(&schema.encode_i64(k).unwrap()).unwrap();
        assert!(tree.check(), "pin leaked while removing {k}");
    }

    assert!(tree.is_empty());
    assert!(!tree.root_page_id().is_valid());
    assert_eq!(registry::get_root(&pool, 1).unwrap(), Some(PageId::INVALID));
    assert!(tree.iter().unwrap() == tree.end());
    assert!(tree.check());
}

#[test]
fn law_insert_then_get_then_duplicate() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    assert!(tree.insert(&schema.encode_i64(10).unwrap(), rid(10)).unwrap());
    assert_eq!(tree.get(&schema.encode_i64(10).unwrap()).unwrap(), Some(rid(10)));

    // A second insert of the same key fails and leaves the first value.
    let other = RowId::new(PageId::new(3, 3), 3);
    assert!(!tree.insert(&schema.encode_i64(10).unwrap(), other).unwrap());
    assert_eq!(tree.get(&schema.encode_i64(10).unwrap()).unwrap(), Some(rid(10)));
}

#[test]
fn law_insert_remove_returns_to_empty() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    tree.insert(&schema.encode_i64(10).unwrap(), rid(10)).unwrap();
    tree.remove(&schema.encode_i64(10).unwrap()).unwrap();

    assert_eq!(tree.get(&schema.encode_i64(10).unwrap()).unwrap(), None);
    assert!(tree.is_empty());
    assert!(tree.check());
}

#[test]
fn law_permutation_invariance() {
    let keys: Vec<i64> = (1..=200).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);
    let mut reference: Option<Vec<i64>> = None;

    for _ in 0..3 {
        let dir = tempdir().unwrap();
        let pool = make_pool(dir.path(), 256);
        let schema = KeySchema::int64().unwrap();
        let mut tree = make_tree(&pool);

        let mut shuffled = keys.clone();
        shuffled.shuffle(&mut rng);
        insert_all(&mut tree, &schema, shuffled);

        let collected = collect_keys(&tree, &schema);
        match &reference {
            Some(expected) => assert_eq!(&collected, expected),
            None => {
                assert_eq!(collected, keys);
                reference = Some(collected);
            }
        }
        assert!(tree.check());
    }
}

#[test]
fn random_ops_match_reference_model() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);
    let mut model: BTreeMap<i64, RowId> = BTreeMap::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);

    for step in 0..3000 {
        let key: i64 = rng.gen_range(0..120);
        let encoded = schema.encode_i64(key).unwrap();
        if rng.gen_bool(0.6) {
            let inserted = tree.insert(&encoded, rid(key)).unwrap();
            let model_inserted = model.insert(key, rid(key)).is_none();
            assert_eq!(inserted, model_inserted, "insert {key} at step {step}");
        } else {
            tree.remove(&encoded).unwrap();
            model.remove(&key);
        }
        assert!(tree.check(), "pin leaked at step {step}");
    }

    let collected: Vec<(i64, RowId)> = tree
        .iter()
        .unwrap()
        .map(|(k, r)| (decode_i64(&schema, &k), r))
        .collect();
    let expected: Vec<(i64, RowId)> = model.into_iter().collect();
    assert_eq!(collected, expected);
    assert!(tree.check());
}

#[test]
fn range_scan_from_key() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, (2..=40).step_by(2));

    // Present key: scan starts at it.
    let from_ten: Vec<i64> = tree
        .iter_from(&schema.encode_i64(10).unwrap())
        .unwrap()
        .map(|(k, _)| decode_i64(&schema, &k))
        .collect();
    assert_eq!(from_ten, (10..=40).step_by(2).collect::<Vec<_>>());

    // Absent key: scan starts at the next larger entry.
    let from_eleven: Vec<i64> = tree
        .iter_from(&schema.encode_i64(11).unwrap())
        .unwrap()
        .map(|(k, _)| decode_i64(&schema, &k))
        .collect();
    assert_eq!(from_eleven, (12..=40).step_by(2).collect::<Vec<_>>());

    // Past the last key: end iterator.
    assert!(tree.iter_from(&schema.encode_i64(41).unwrap()).unwrap() == tree.end());
    assert!(tree.check());
}

#[test]
fn root_survives_reopen() {
    let dir = tempdir().unwrap();
    let schema = KeySchema::int64().unwrap();

    {
        let pool = make_pool(dir.path(), 64);
        let mut tree = make_tree(&pool);
        insert_all(&mut tree, &schema, 1..=13);
        pool.flush_all().unwrap();
    }

    // A fresh pool over the same files restores the root from the
    // registry and sees every key.
    let pool = make_pool(dir.path(), 64);
    let tree = make_tree(&pool);
    assert!(!tree.is_empty());
    assert_eq!(collect_keys(&tree, &schema), (1..=13).collect::<Vec<_>>());
    assert!(tree.check());
}

#[test]
fn destroy_releases_every_page() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();
    let mut tree = make_tree(&pool);

    insert_all(&mut tree, &schema, 1..=50);
    tree.destroy().unwrap();

    assert!(tree.is_empty());
    assert!(tree.iter().unwrap() == tree.end());
    assert!(tree.check());

    // The index is reusable after destroy.
    insert_all(&mut tree, &schema, [1]);
    assert_eq!(collect_keys(&tree, &schema), vec![1]);
}

#[test]
fn two_indexes_share_the_registry() {
    let dir = tempdir().unwrap();
    let pool = make_pool(dir.path(), 64);
    let schema = KeySchema::int64().unwrap();

    let mut users = BPlusTree::new(1, 1, pool.clone(), schema.comparator(), 4, 4).unwrap();
    let mut orders = BPlusTree::new(2, 2, pool.clone(), schema.comparator(), 4, 4).unwrap();

    insert_all(&mut users, &schema, 1..=10);
    insert_all(&mut orders, &schema, 100..=120);

    assert_eq!(collect_keys(&users, &schema), (1..=10).collect::<Vec<_>>());
    assert_eq!(collect_keys(&orders, &schema), (100..=120).collect::<Vec<_>>());
    assert_eq!(
        registry::get_root(&pool, 1).unwrap(),
        Some(users.root_page_id())
    );
    assert_eq!(
        registry::get_root(&pool, 2).unwrap(),
        Some(orders.root_page_id())
    );
    assert!(users.check());
}
