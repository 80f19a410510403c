//! Unit tests for the B-tree and its persistence backends
//!
//! These tests verify:
//! - Structural invariants under many insertions and different orders
//! - Spilling values to a backend and transparently reloading them
//! - The file backend's encodings and error conditions
//!
//! Tests use temporary directories that are automatically cleaned up.

use crate::config::SpillFormat;
use crate::error::Error as StoreError;
use crate::storage::{BTree, FileBackend, PersistenceBackend};
use rstest::rstest;
use std::collections::HashMap;
use std::error::Error;

/// In-memory backend that records how it was used
#[derive(Default)]
struct MapBackend {
    records: HashMap<String, String>,
    deletes: usize,
}

impl PersistenceBackend<String, String> for MapBackend {
    fn serialize(&mut self, key: &String, value: &String) -> crate::Result<()> {
        self.records.insert(key.clone(), value.clone());
        Ok(())
    }

    fn deserialize(&mut self, key: &String) -> crate::Result<String> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key.clone()))
    }

    fn delete(&mut self, key: &String) -> crate::Result<bool> {
        self.deletes += 1;
        Ok(self.records.remove(key).is_some())
    }
}

fn key(i: usize) -> String {
    format!("key_{:04}", i)
}

/// Tests that the tree stays balanced and ordered for several orders
#[rstest]
#[case(4)]
#[case(6)]
#[case(8)]
#[case(32)]
fn test_btree_invariants_hold(#[case] order: usize) -> Result<(), Box<dyn Error>> {
    let mut tree = BTree::with_order(order)?;
    assert_eq!(tree.order(), order);

    // Interleave keys so inserts land all over the tree
    for i in (0..500).map(|i| (i * 7919) % 500) {
        tree.put(key(i), Some(i))?;
        tree.check_invariants();
    }

    assert_eq!(tree.len(), 500);
    assert!(tree.height() > 0);
    for i in 0..500 {
        assert_eq!(tree.get(&key(i))?, Some(&i));
    }

    let keys: Vec<_> = tree.keys().cloned().collect();
    let expected: Vec<_> = (0..500).map(key).collect();
    assert_eq!(keys, expected);

    Ok(())
}

/// Tests that deletes leave the structure intact and hide the key
#[test]
fn test_btree_deletes_do_not_shrink_nodes() -> Result<(), Box<dyn Error>> {
    let mut tree = BTree::new();
    for i in 0..100 {
        tree.put(key(i), Some(i))?;
    }
    let height = tree.height();

    for i in (0..100).step_by(2) {
        assert_eq!(tree.put(key(i), None)?, Some(i));
    }

    tree.check_invariants();
    assert_eq!(tree.height(), height);
    assert_eq!(tree.len(), 50);
    assert_eq!(tree.get(&key(10))?, None);
    assert_eq!(tree.get(&key(11))?, Some(&11));
    assert!(tree.keys().all(|k| k.ends_with(['1', '3', '5', '7', '9'])));

    // Re-inserting a deleted key reuses its entry
    assert_eq!(tree.put(key(10), Some(1000))?, None);
    assert_eq!(tree.len(), 51);
    tree.check_invariants();

    Ok(())
}

/// Tests spilling to a backend and transparently reloading on get
#[test]
fn test_spill_and_reload() -> Result<(), Box<dyn Error>> {
    let mut tree: BTree<String, String> = BTree::new();
    assert!(!tree.has_backend());
    tree.set_backend(Box::new(MapBackend::default()));
    assert!(tree.has_backend());

    tree.put("a".into(), Some("alpha".into()))?;
    tree.put("b".into(), Some("beta".into()))?;

    tree.move_to_secondary("a")?;
    assert!(tree.is_spilled("a"));
    assert!(tree.contains_key("a"));
    assert_eq!(tree.get_resident("a"), None);
    assert_eq!(tree.len(), 2);

    // Reload happens on access and the key is resident again
    assert_eq!(tree.get("a")?.map(String::as_str), Some("alpha"));
    assert!(!tree.is_spilled("a"));
    assert_eq!(tree.get_resident("a").map(String::as_str), Some("alpha"));

    Ok(())
}

/// Tests that overwriting a spilled key returns the spilled value
#[test]
fn test_overwrite_spilled_key() -> Result<(), Box<dyn Error>> {
    let mut tree: BTree<String, String> = BTree::new();
    tree.set_backend(Box::new(MapBackend::default()));

    tree.put("a".into(), Some("old".into()))?;
    tree.move_to_secondary("a")?;

    assert_eq!(tree.put("a".into(), Some("new".into()))?, Some("old".to_string()));
    assert!(!tree.is_spilled("a"));
    assert_eq!(tree.get("a")?.map(String::as_str), Some("new"));

    // Deleting a spilled key also hands back its value
    tree.move_to_secondary("a")?;
    assert_eq!(tree.put("a".into(), None)?, Some("new".to_string()));
    assert!(!tree.contains_key("a"));

    Ok(())
}

/// Tests error conditions of move_to_secondary
#[test]
fn test_move_to_secondary_errors() -> Result<(), Box<dyn Error>> {
    let mut tree: BTree<String, String> = BTree::new();
    tree.set_backend(Box::new(MapBackend::default()));

    assert!(matches!(
        tree.move_to_secondary("missing"),
        Err(StoreError::NotFound(_))
    ));

    // A key that is already spilled has no resident value to move
    tree.put("a".into(), Some("x".into()))?;
    tree.move_to_secondary("a")?;
    assert!(matches!(
        tree.move_to_secondary("a"),
        Err(StoreError::NotFound(_))
    ));

    // Neither does a deleted key
    tree.put("b".into(), Some("y".into()))?;
    tree.put("b".into(), None)?;
    assert!(matches!(
        tree.move_to_secondary("b"),
        Err(StoreError::NotFound(_))
    ));

    Ok(())
}

/// Tests that the file backend round-trips values in both encodings
#[rstest]
#[case(SpillFormat::Json)]
#[case(SpillFormat::Bincode)]
fn test_file_backend_roundtrip(#[case] format: SpillFormat) -> Result<(), Box<dyn Error>> {
    let temp_dir = tempfile::tempdir()?;
    let mut backend = FileBackend::open(temp_dir.path(), format, true)?;
    let key = "http://example.com/doc".to_string();

    PersistenceBackend::<String, Vec<u32>>::serialize(&mut backend, &key, &vec![1, 2, 3])?;
    let path = backend.path_for(&key);
    assert!(path.exists());
    assert_eq!(
        path.extension().and_then(|e| e.to_str()),
        Some(format.extension())
    );

    let value: Vec<u32> = backend.deserialize(&key)?;
    assert_eq!(value, vec![1, 2, 3]);

    assert!(PersistenceBackend::<String, Vec<u32>>::delete(&mut backend, &key)?);
    assert!(!path.exists());
    assert!(!PersistenceBackend::<String, Vec<u32>>::delete(&mut backend, &key)?);

    Ok(())
}

/// Tests the file backend's missing and corrupt record handling
#[test]
fn test_file_backend_errors() -> Result<(), Box<dyn Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = tempfile::tempdir()?;
    let mut backend = FileBackend::open(temp_dir.path(), SpillFormat::Json, true)?;
    let key = "doc://corrupt".to_string();

    let missing: crate::Result<Vec<u32>> = backend.deserialize(&key);
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    std::fs::write(backend.path_for(&key), b"corrupted data")?;
    let corrupt: crate::Result<Vec<u32>> = backend.deserialize(&key);
    assert!(matches!(corrupt, Err(StoreError::Serialization(_))));

    // Opening a missing directory without permission to create it
    let absent = temp_dir.path().join("absent");
    assert!(FileBackend::open(&absent, SpillFormat::Json, false).is_err());
    assert!(FileBackend::open(&absent, SpillFormat::Json, true)?.dir().is_dir());

    Ok(())
}

/// Tests a tree spilling through the file backend and reloading after reopen
#[test]
fn test_btree_with_file_backend() -> Result<(), Box<dyn Error>> {
    let temp_dir = tempfile::tempdir()?;
    let backend = FileBackend::open(temp_dir.path(), SpillFormat::Bincode, true)?;
    let mut tree: BTree<String, String> = BTree::with_order(4)?;
    tree.set_backend(Box::new(backend.clone()));

    for i in 0..20 {
        tree.put(key(i), Some(format!("value_{}", i)))?;
    }
    for i in (0..20).step_by(3) {
        tree.move_to_secondary(&key(i))?;
        assert!(backend.path_for(&key(i)).exists());
    }

    tree.check_invariants();
    for i in 0..20 {
        assert_eq!(tree.get(&key(i))?, Some(&format!("value_{}", i)));
    }

    // Reloaded records are removed from disk
    assert!(!backend.path_for(&key(0)).exists());
    Ok(())
}
