//! Bucketed Merkle tree over the identifier space.
//!
//! Two peers compare their stores by exchanging one node at a time: equal
//! hashes at the same positional address mean equal subtrees, so only the
//! differing branches are walked. Each node covers a fixed slice of the id
//! space and is either a leaf holding up to [FANOUT] entries or an internal
//! node with exactly [FANOUT] equally-sized children; a leaf that overflows
//! is split and its entries redistributed.
//!
//! Hash rules: a leaf hashes the concatenation of its keys, an internal node
//! the concatenation of its children's hashes, and an empty subtree is the
//! zero sentinel. The hash is therefore a pure function of the subtree's
//! entry set.

use std::ops::Bound;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::messages::{raw_kvs, KvMap, WireNode};
use crate::common::{Id, ID_BITS};
use crate::{Error, Result};

/// Entries per leaf and children per internal node.
pub(crate) const FANOUT: usize = 8;

/// Bits of the id consumed per tree level.
const FANOUT_BITS: u32 = 3;

#[derive(Debug, Clone)]
pub(crate) struct MerkleTree<V> {
    /// Inclusive bounds of the id slice this node covers.
    min_key: Id,
    max_key: Id,
    hash: Id,
    /// Child indices walked from the root to reach this node.
    position: Vec<usize>,
    children: Vec<MerkleTree<V>>,
    data: KvMap<V>,
    /// Largest key in the subtree; consulted at the root to wrap `next`.
    largest_key: Option<Id>,
}

impl<V> MerkleTree<V> {
    /// A tree covering the whole id space. The root starts subdivided.
    pub fn new() -> MerkleTree<V> {
        let mut root = Self::node(Id::ZERO, Id::MAX, Vec::new());
        root.create_children();
        root
    }

    fn node(min_key: Id, max_key: Id, position: Vec<usize>) -> MerkleTree<V> {
        MerkleTree {
            min_key,
            max_key,
            hash: Id::ZERO,
            position,
            children: Vec::new(),
            data: KvMap::new(),
            largest_key: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn hash(&self) -> Id {
        self.hash
    }

    pub fn depth(&self) -> usize {
        self.position.len()
    }

    /// Insert a new entry; the key must not be present yet.
    pub fn insert(&mut self, key: Id, value: V) -> Result<()> {
        if self.is_leaf() {
            if self.data.contains_key(&key) {
                return Err(Error::KeyExists);
            }

            self.raise_largest(key);
            self.data.insert(key, value);

            if self.data.len() > FANOUT {
                self.create_children();
            }
        } else {
            self.raise_largest(key);
            let index = self.child_index(key);
            self.children[index].insert(key, value)?;
        }

        self.rehash();
        Ok(())
    }

    pub fn lookup(&self, key: Id) -> Option<&V> {
        if self.is_leaf() {
            return self.data.get(&key);
        }

        self.children[self.child_index(key)].lookup(key)
    }

    pub fn contains(&self, key: Id) -> bool {
        self.lookup(key).is_some()
    }

    /// Overwrite the value of an existing key.
    pub fn update(&mut self, key: Id, value: V) -> Result<()> {
        if self.is_leaf() {
            let slot = self.data.get_mut(&key).ok_or(Error::KeyMissing)?;
            *slot = value;
        } else {
            let index = self.child_index(key);
            self.children[index].update(key, value)?;
        }

        self.rehash();
        Ok(())
    }

    pub fn delete(&mut self, key: Id) -> Result<()> {
        if self.is_leaf() {
            if self.data.remove(&key).is_none() {
                return Err(Error::KeyMissing);
            }
        } else {
            let index = self.child_index(key);
            self.children[index].delete(key)?;
        }

        self.rehash();
        self.largest_key = self.largest_key_in_subtree();
        Ok(())
    }

    /// All entries whose keys fall on the clockwise arc `[lower, upper]`.
    /// A wrapping arc is split at the ring's seam and the halves unioned.
    pub fn read_range(&self, lower: Id, upper: Id) -> KvMap<V>
    where
        V: Clone,
    {
        if lower > upper {
            let mut result = self.read_range(Id::ZERO, upper);
            result.extend(self.read_range(lower, Id::MAX));
            return result;
        }

        let mut result = KvMap::new();

        if self.is_leaf() {
            for (key, value) in &self.data {
                if key.in_between(lower, upper, true) {
                    result.insert(*key, value.clone());
                }
            }
            return result;
        }

        for child in &self.children {
            if child.max_key < lower || child.min_key > upper {
                continue;
            }
            let lo = if lower > child.min_key { lower } else { child.min_key };
            let hi = if upper < child.max_key { upper } else { child.max_key };
            result.extend(child.read_range(lo, hi));
        }

        result
    }

    /// The first entry with a key strictly greater than `key`, wrapping to
    /// the smallest entry at the root once `key` reaches the largest stored.
    pub fn next(&self, key: Id) -> Option<(Id, V)>
    where
        V: Clone,
    {
        if self.hash == Id::ZERO {
            return None;
        }

        if self.position.is_empty() && self.largest_key.is_some_and(|largest| key >= largest) {
            return self.smallest_entry();
        }

        if self.is_leaf() {
            return self
                .data
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(|(k, v)| (*k, v.clone()));
        }

        let start = self.child_index(key);
        for child in &self.children[start..] {
            if let Some(hit) = child.next(key) {
                return Some(hit);
            }
        }

        None
    }

    /// Walk the positional address down from this node.
    pub fn lookup_by_position(&self, position: &[usize]) -> Option<&MerkleTree<V>> {
        let Some((&head, rest)) = position.split_first() else {
            return Some(self);
        };

        if self.is_leaf() {
            return None;
        }

        self.children.get(head)?.lookup_by_position(rest)
    }

    pub fn smallest_entry(&self) -> Option<(Id, V)>
    where
        V: Clone,
    {
        if self.hash == Id::ZERO {
            return None;
        }

        if self.is_leaf() {
            return self.data.iter().next().map(|(k, v)| (*k, v.clone()));
        }

        self.children.iter().find_map(|child| child.smallest_entry())
    }

    /// Every entry in the subtree, in key order.
    pub fn entries(&self) -> KvMap<V>
    where
        V: Clone,
    {
        if self.hash == Id::ZERO {
            return KvMap::new();
        }

        if self.is_leaf() {
            return self.data.clone();
        }

        let mut result = KvMap::new();
        for child in &self.children {
            result.extend(child.entries());
        }
        result
    }

    // === Private Methods ===

    fn raise_largest(&mut self, key: Id) {
        if self.largest_key.map_or(true, |largest| key > largest) {
            self.largest_key = Some(key);
        }
    }

    fn largest_key_in_subtree(&self) -> Option<Id> {
        if self.hash == Id::ZERO {
            return None;
        }

        if self.is_leaf() {
            return self.data.keys().next_back().copied();
        }

        self.children
            .iter()
            .rev()
            .find_map(|child| child.largest_key_in_subtree())
    }

    /// Which child's slice contains the key. The slices are aligned power-of
    /// two blocks, so the index is a bit field of the key itself.
    fn child_index(&self, key: Id) -> usize {
        if key > self.max_key {
            return FANOUT - 1;
        }
        if key < self.min_key {
            return 0;
        }

        let shift = ID_BITS - FANOUT_BITS * (self.depth() as u32 + 1);
        ((key.value() >> shift) & (FANOUT as u128 - 1)) as usize
    }

    /// Subdivide this node's slice among [FANOUT] fresh children and move
    /// any held entries down into them.
    fn create_children(&mut self) {
        let shift = ID_BITS - FANOUT_BITS * (self.depth() as u32 + 1);
        let width = 1u128 << shift;

        let mut remaining = std::mem::take(&mut self.data);
        let mut lower = self.min_key;

        for i in 0..FANOUT {
            let upper = lower.add(width - 1);
            let mut position = self.position.clone();
            position.push(i);

            let mut child = Self::node(lower, upper, position);
            while let Some((&key, _)) = remaining.iter().next() {
                if !key.in_between(lower, upper, true) {
                    break;
                }
                let value = remaining.remove(&key).expect("key taken from iterator");
                child.data.insert(key, value);
            }
            child.rehash();

            self.children.push(child);
            lower = upper.add(1);
        }
    }

    fn rehash(&mut self) {
        let mut concatenated = String::new();

        if self.is_leaf() {
            if self.data.is_empty() {
                self.hash = Id::ZERO;
                return;
            }

            for key in self.data.keys() {
                concatenated.push_str(&key.to_string());
            }
        } else {
            if self.children.iter().all(|child| child.hash == Id::ZERO) {
                self.hash = Id::ZERO;
                return;
            }

            for child in &self.children {
                concatenated.push_str(&child.hash.to_string());
            }
        }

        self.hash = Id::hash(&concatenated);
    }
}

impl<V: Serialize> MerkleTree<V> {
    /// Serialize this node alone, optionally with its direct children (who
    /// travel without theirs). The receiving side requests deeper nodes by
    /// positional address if their hashes disagree.
    pub fn to_wire(&self, with_children: bool) -> Result<WireNode> {
        let kv_pairs = if self.is_leaf() {
            Some(raw_kvs(&self.data)?)
        } else {
            None
        };

        let children = if !self.is_leaf() && with_children {
            Some(
                self.children
                    .iter()
                    .map(|child| child.to_wire(false))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };

        Ok(WireNode {
            hash: self.hash,
            min_key: self.min_key,
            max_key: self.max_key,
            position: self.position.clone(),
            kv_pairs,
            children,
        })
    }

    /// Serialize the whole subtree.
    #[cfg(test)]
    pub fn to_wire_deep(&self) -> Result<WireNode> {
        let mut node = self.to_wire(false)?;
        if !self.is_leaf() {
            node.children = Some(
                self.children
                    .iter()
                    .map(|child| child.to_wire_deep())
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        Ok(node)
    }
}

impl<V: DeserializeOwned> MerkleTree<V> {
    /// Rebuild a subtree from its deep wire form.
    #[cfg(test)]
    pub fn from_wire(wire: WireNode) -> Result<MerkleTree<V>> {
        use crate::common::messages::typed_kvs;

        let mut tree = Self::node(wire.min_key, wire.max_key, wire.position);
        tree.hash = wire.hash;

        if let Some(kv_pairs) = wire.kv_pairs {
            tree.data = typed_kvs(kv_pairs)?;
        }
        if let Some(children) = wire.children {
            tree.children = children
                .into_iter()
                .map(Self::from_wire)
                .collect::<Result<Vec<_>>>()?;
        }

        tree.largest_key = tree.largest_key_in_subtree();
        Ok(tree)
    }
}
