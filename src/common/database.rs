//! Thread-safe store indexed by a Merkle tree.

use std::sync::RwLock;

use serde::Serialize;

use crate::common::merkle::MerkleTree;
use crate::common::messages::{KvMap, WireNode};
use crate::common::Id;
use crate::Result;

/// The per-peer key/value store: a Merkle tree behind one reader/writer
/// lock, with an entry counter alongside for O(1) emptiness checks.
#[derive(Debug)]
pub(crate) struct Database<V> {
    inner: RwLock<Inner<V>>,
}

#[derive(Debug)]
struct Inner<V> {
    index: MerkleTree<V>,
    size: usize,
}

impl<V: Clone> Database<V> {
    pub fn new() -> Database<V> {
        Database {
            inner: RwLock::new(Inner {
                index: MerkleTree::new(),
                size: 0,
            }),
        }
    }

    pub fn insert(&self, key: Id, value: V) -> Result<()> {
        let mut inner = self.inner.write().expect("database lock poisoned");
        inner.index.insert(key, value)?;
        inner.size += 1;
        Ok(())
    }

    pub fn lookup(&self, key: Id) -> Result<V> {
        let inner = self.inner.read().expect("database lock poisoned");
        inner
            .index
            .lookup(key)
            .cloned()
            .ok_or(crate::Error::KeyMissing)
    }

    pub fn update(&self, key: Id, value: V) -> Result<()> {
        let mut inner = self.inner.write().expect("database lock poisoned");
        inner.index.update(key, value)
    }

    pub fn delete(&self, key: Id) -> Result<()> {
        let mut inner = self.inner.write().expect("database lock poisoned");
        inner.index.delete(key)?;
        inner.size -= 1;
        Ok(())
    }

    pub fn contains(&self, key: Id) -> bool {
        let inner = self.inner.read().expect("database lock poisoned");
        inner.index.contains(key)
    }

    pub fn read_range(&self, lower: Id, upper: Id) -> KvMap<V> {
        let inner = self.inner.read().expect("database lock poisoned");
        inner.index.read_range(lower, upper)
    }

    pub fn next(&self, key: Id) -> Option<(Id, V)> {
        let inner = self.inner.read().expect("database lock poisoned");
        inner.index.next(key)
    }

    pub fn entries(&self) -> KvMap<V> {
        let inner = self.inner.read().expect("database lock poisoned");
        inner.index.entries()
    }

    pub fn hash(&self) -> Id {
        let inner = self.inner.read().expect("database lock poisoned");
        inner.index.hash()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("database lock poisoned").size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Serialize> Database<V> {
    /// Snapshot the node at a positional address in its wire form, children
    /// included, without holding the lock across any I/O.
    pub fn wire_node_at(&self, position: &[usize]) -> Result<Option<WireNode>> {
        let inner = self.inner.read().expect("database lock poisoned");
        match inner.index.lookup_by_position(position) {
            Some(node) => Ok(Some(node.to_wire(true)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn size_tracks_inserts_and_deletes() {
        let db: Database<String> = Database::new();
        assert!(db.is_empty());

        db.insert(Id::new(1), "a".into()).unwrap();
        db.insert(Id::new(2), "b".into()).unwrap();
        assert_eq!(db.len(), 2);

        db.delete(Id::new(1)).unwrap();
        assert_eq!(db.len(), 1);
        assert!(!db.is_empty());
    }

    #[test]
    fn failed_insert_leaves_size_untouched() {
        let db: Database<String> = Database::new();
        db.insert(Id::new(1), "a".into()).unwrap();

        assert!(db.insert(Id::new(1), "again".into()).is_err());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn lookup_missing_key_is_an_error() {
        let db: Database<String> = Database::new();
        assert!(matches!(
            db.lookup(Id::new(9)),
            Err(crate::Error::KeyMissing)
        ));
    }

    #[test]
    fn wire_node_at_reports_missing_positions() {
        let db: Database<String> = Database::new();
        db.insert(Id::new(5), "v".into()).unwrap();

        assert!(db.wire_node_at(&[]).unwrap().is_some());
        assert!(db.wire_node_at(&[0, 0, 0, 0, 0, 0]).unwrap().is_none());
    }
}
