//! Observed-Remove Map
//!
//! Each key holds the dot-tagged values of every write that has not been
//! superseded. An insert replaces the local slot and ships the dots it
//! replaced; a remove ships every dot it observed. Applying an op only drops
//! the dots it names, so a concurrent write the remover never saw survives.
//!
//! While writers race a key holds several elements sorted by dot; the
//! lowest dot is the visible value.

use crate::dot::{check_site_id, dots_contain, Dot, SiteId, Summary};
use crate::replica::{CausalOp, Replica};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A value written under a key by the mutation `dot`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapElement<V> {
    pub value: V,
    pub dot: Dot,
}

/// Remote operation on one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapOp<K, V> {
    pub key: K,
    pub inserted: Option<MapElement<V>>,
    pub removed_dots: Vec<Dot>,
}

impl<K, V> CausalOp for MapOp<K, V> {
    fn inserted_dots(&self) -> Vec<Dot> {
        self.inserted.iter().map(|e| e.dot).collect()
    }
}

/// What applying a remote op did to a key.
///
/// `value` is the key's visible value afterwards, `None` once it is gone.
#[derive(Clone, Debug, PartialEq)]
pub struct MapChange<K, V> {
    pub is_insert: bool,
    pub key: K,
    pub value: Option<V>,
}

/// Keyed elements of an observed-remove map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapState<K: Ord, V> {
    entries: BTreeMap<K, Vec<MapElement<V>>>,
}

impl<K: Ord, V> Default for MapState<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> MapState<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Visible value of `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.first(key).map(|e| &e.value)
    }

    /// Visible element of `key`, including its dot.
    pub fn first(&self, key: &K) -> Option<&MapElement<V>> {
        self.entries.get(key).and_then(|elements| elements.first())
    }

    pub fn get_mut(&mut self, key: &K) -> Option<(Dot, &mut V)> {
        self.entries
            .get_mut(key)
            .and_then(|elements| elements.first_mut())
            .map(|e| (e.dot, &mut e.value))
    }

    /// The element written under `key` by `dot`, visible or not.
    pub fn get_element(&self, key: &K, dot: &Dot) -> Option<&MapElement<V>> {
        let elements = self.entries.get(key)?;
        let i = elements.binary_search_by(|e| e.dot.cmp(dot)).ok()?;
        elements.get(i)
    }

    pub fn get_element_mut(&mut self, key: &K, dot: &Dot) -> Option<&mut V> {
        let elements = self.entries.get_mut(key)?;
        let i = elements.binary_search_by(|e| e.dot.cmp(dot)).ok()?;
        elements.get_mut(i).map(|e| &mut e.value)
    }

    /// Visible `(key, value)` pairs in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries
            .iter()
            .filter_map(|(k, elements)| elements.first().map(|e| (k, &e.value)))
    }

    /// Every stored value, including concurrent ones that are not visible.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.entries
            .values_mut()
            .flat_map(|elements| elements.iter_mut().map(|e| &mut e.value))
    }

    /// Whether both states hold the same dots under the same keys.
    pub fn same_dots(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(key, elements)| {
                other.entries.get(key).is_some_and(|others| {
                    elements.len() == others.len()
                        && elements.iter().zip(others).all(|(a, b)| a.dot == b.dot)
                })
            })
    }

    /// Drop `key` locally. Returns `None` if it was absent.
    pub fn remove(&mut self, key: &K) -> Option<MapOp<K, V>>
    where
        K: Clone,
    {
        let elements = self.entries.remove(key)?;
        Some(MapOp {
            key: key.clone(),
            inserted: None,
            removed_dots: elements.iter().map(|e| e.dot).collect(),
        })
    }
}

impl<K: Ord + Clone, V: Clone> MapState<K, V> {
    /// Replace whatever `key` holds with `value` written by `dot`.
    pub fn insert(&mut self, key: K, value: V, dot: Dot) -> MapOp<K, V> {
        let element = MapElement { value, dot };
        let removed = self.entries.insert(key.clone(), vec![element.clone()]);
        MapOp {
            key,
            inserted: Some(element),
            removed_dots: removed
                .map(|elements| elements.iter().map(|e| e.dot).collect())
                .unwrap_or_default(),
        }
    }

    pub fn execute_op(&mut self, op: &MapOp<K, V>) -> Option<MapChange<K, V>> {
        self.apply(&op.key, op.inserted.as_ref(), &op.removed_dots)
    }

    /// Drop the elements named by `removed_dots`, then add `inserted`.
    ///
    /// Returns `None` when nothing changed.
    pub fn apply(
        &mut self,
        key: &K,
        inserted: Option<&MapElement<V>>,
        removed_dots: &[Dot],
    ) -> Option<MapChange<K, V>> {
        let mut elements = self.entries.remove(key).unwrap_or_default();
        let before = elements.len();
        elements.retain(|e| !dots_contain(removed_dots, &e.dot));
        let mut changed = elements.len() != before;

        if let Some(element) = inserted {
            if let Err(slot) = elements.binary_search_by(|e| e.dot.cmp(&element.dot)) {
                elements.insert(slot, element.clone());
                changed = true;
            }
        }

        let value = elements.first().map(|e| e.value.clone());
        if !elements.is_empty() {
            self.entries.insert(key.clone(), elements);
        }
        if !changed {
            debug!("map op changed nothing");
            return None;
        }
        Some(MapChange {
            is_insert: value.is_some(),
            key: key.clone(),
            value,
        })
    }
}

/// Op-based observed-remove map owned by one site.
#[derive(Clone, Debug)]
pub struct ORMap<K: Ord, V> {
    site_id: SiteId,
    state: MapState<K, V>,
    summary: Summary,
}

impl<K: Ord, V> ORMap<K, V> {
    /// Panics if `site_id` is zero.
    pub fn new(site_id: SiteId) -> Self {
        check_site_id(site_id);
        Self {
            site_id,
            state: MapState::new(),
            summary: Summary::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.state.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.state.get(key)
    }

    pub fn get_element(&self, key: &K, dot: &Dot) -> Option<&MapElement<V>> {
        self.state.get_element(key, dot)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.state.entries()
    }

    pub fn state(&self) -> &MapState<K, V> {
        &self.state
    }

    pub fn remove(&mut self, key: &K) -> Option<MapOp<K, V>>
    where
        K: Clone,
    {
        self.state.remove(key)
    }
}

impl<K: Ord + Clone, V: Clone> ORMap<K, V> {
    pub fn insert(&mut self, key: K, value: V) -> MapOp<K, V> {
        let dot = self.summary.dot(self.site_id);
        self.state.insert(key, value, dot)
    }
}

impl<K: Ord + Clone, V: Clone> Replica for ORMap<K, V> {
    type Op = MapOp<K, V>;
    type Change = Option<MapChange<K, V>>;

    fn site_id(&self) -> SiteId {
        self.site_id
    }

    fn summary(&self) -> &Summary {
        &self.summary
    }

    fn replicate(&self, site_id: SiteId) -> Self {
        check_site_id(site_id);
        Self {
            site_id,
            state: self.state.clone(),
            summary: self.summary.clone(),
        }
    }

    fn execute_op(&mut self, op: &MapOp<K, V>) -> Option<MapChange<K, V>> {
        // An already observed insert is either present or was removed since.
        let inserted = op
            .inserted
            .as_ref()
            .filter(|e| !self.summary.contains(&e.dot));
        if let Some(element) = inserted {
            self.summary.insert(&element.dot);
        }
        // Removed dots count as observed so their inserts, if still in
        // flight, are dropped on arrival.
        for dot in &op.removed_dots {
            self.summary.insert(dot);
        }
        self.state.apply(&op.key, inserted, &op.removed_dots)
    }
}

/// Replicas are equal when they hold the same dots and summary.
impl<K: Ord, V> PartialEq for ORMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.state.same_dots(&other.state) && self.summary == other.summary
    }
}
