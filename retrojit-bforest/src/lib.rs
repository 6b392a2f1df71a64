//! A forest of small ordered maps sharing one backing allocation.
//!
//! Grounded in the shape of Cranelift's `cranelift-bforest` crate: a
//! `MapForest` is the arena, `Map<K, V>` handles are lightweight
//! references into it, so many maps can be cleared and reused without
//! dropping an allocation per map. Unlike Cranelift's crate this is not
//! a B+-tree — entries are kept in a `BTreeMap` per handle — because
//! the one consumer needing ordered lookup here, the CFG builder's
//! block-to-layout-position map, is small enough per function that
//! node-level compaction doesn't pay for its own complexity. See
//! DESIGN.md for the full tradeoff.

use retrojit_entity::{entity_impl, EntityRef, PrimaryMap};
use std::collections::BTreeMap;
use std::fmt;

/// An opaque reference to one ordered map living inside a [`MapForest`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Map<K, V>
where
    K: Copy + Ord,
{
    index: u32,
    _marker: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V> fmt::Debug for Map<K, V>
where
    K: Copy + Ord,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "map{}", self.index)
    }
}

impl<K, V> EntityRef for Map<K, V>
where
    K: Copy + Ord,
{
    fn new(index: usize) -> Self {
        Self {
            index: index as u32,
            _marker: std::marker::PhantomData,
        }
    }

    fn index(self) -> usize {
        self.index as usize
    }
}

struct Tree<K, V>(BTreeMap<K, V>);

impl<K, V> Default for Tree<K, V> {
    fn default() -> Self {
        Tree(BTreeMap::new())
    }
}

/// The backing allocation for a family of [`Map`] handles.
///
/// Like Cranelift's `MapForest`, this is meant to be created once per
/// function (or reused across functions via [`clear`](Self::clear)) and
/// passed alongside every `Map` handle it owns.
pub struct MapForest<K, V>
where
    K: Copy + Ord,
{
    trees: PrimaryMap<Map<K, V>, Tree<K, V>>,
}

impl<K, V> MapForest<K, V>
where
    K: Copy + Ord,
{
    pub fn new() -> Self {
        Self {
            trees: PrimaryMap::new(),
        }
    }

    /// Drop every tree's contents, keeping the backing allocation.
    pub fn clear(&mut self) {
        for (_, tree) in self.trees.iter_mut() {
            tree.0.clear();
        }
        self.trees.clear();
    }

    /// Allocate a fresh, empty map inside this forest.
    pub fn make_map(&mut self) -> Map<K, V> {
        self.trees.push(Tree::default())
    }

    pub fn insert(&mut self, map: Map<K, V>, key: K, value: V) -> Option<V> {
        self.trees[map].0.insert(key, value)
    }

    pub fn get(&self, map: Map<K, V>, key: &K) -> Option<&V> {
        self.trees[map].0.get(key)
    }

    pub fn remove(&mut self, map: Map<K, V>, key: &K) -> Option<V> {
        self.trees[map].0.remove(key)
    }

    pub fn is_empty(&self, map: Map<K, V>) -> bool {
        self.trees[map].0.is_empty()
    }

    pub fn len(&self, map: Map<K, V>) -> usize {
        self.trees[map].0.len()
    }

    /// Iterate the entries of `map` in ascending key order.
    pub fn iter(&self, map: Map<K, V>) -> impl Iterator<Item = (&K, &V)> {
        self.trees[map].0.iter()
    }
}

impl<K, V> Default for MapForest<K, V>
where
    K: Copy + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_iterate_in_key_order() {
        let mut forest: MapForest<u32, &'static str> = MapForest::new();
        let map = forest.make_map();
        forest.insert(map, 5, "five");
        forest.insert(map, 1, "one");
        forest.insert(map, 3, "three");

        let keys: Vec<u32> = forest.iter(map).map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }

    #[test]
    fn clear_drops_entries_but_keeps_forest_reusable() {
        let mut forest: MapForest<u32, u32> = MapForest::new();
        let map = forest.make_map();
        forest.insert(map, 1, 100);
        assert_eq!(forest.len(map), 1);

        forest.clear();
        let map2 = forest.make_map();
        assert!(forest.is_empty(map2));
    }
}
