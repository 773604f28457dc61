//! Observed-Remove Set (add-wins)
//!
//! The presence-only specialization of the observed-remove map: each value
//! keeps the dots of the inserts that have not been removed. A remove only
//! drops the dots it observed, so a concurrent insert of the same value wins.

use crate::dot::{check_site_id, Dot, SiteId, Summary};
use crate::ormap::{MapElement, MapState};
use crate::replica::{CausalOp, Replica};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpKind {
    Insert,
    Remove,
}

/// Remote operation on one value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetOp<T> {
    pub kind: SetOpKind,
    pub value: T,
    pub inserted_dot: Option<Dot>,
    pub removed_dots: Vec<Dot>,
}

impl<T> CausalOp for SetOp<T> {
    fn inserted_dots(&self) -> Vec<Dot> {
        self.inserted_dot.into_iter().collect()
    }
}

/// A value that became present or absent after applying a remote op.
#[derive(Clone, Debug, PartialEq)]
pub struct SetChange<T> {
    pub kind: SetOpKind,
    pub value: T,
}

/// Op-based observed-remove set owned by one site.
#[derive(Clone, Debug)]
pub struct ORSet<T: Ord> {
    site_id: SiteId,
    state: MapState<T, ()>,
    summary: Summary,
}

impl<T: Ord> ORSet<T> {
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

    pub fn contains(&self, value: &T) -> bool {
        self.state.contains_key(value)
    }

    /// Present values in ascending order.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.state.entries().map(|(value, _)| value)
    }
}

impl<T: Ord + Clone> ORSet<T> {
    pub fn insert(&mut self, value: T) -> SetOp<T> {
        let dot = self.summary.dot(self.site_id);
        let op = self.state.insert(value, (), dot);
        SetOp {
            kind: SetOpKind::Insert,
            value: op.key,
            inserted_dot: Some(dot),
            removed_dots: op.removed_dots,
        }
    }

    /// Returns `None` if `value` was not present.
    pub fn remove(&mut self, value: &T) -> Option<SetOp<T>> {
        let op = self.state.remove(value)?;
        Some(SetOp {
            kind: SetOpKind::Remove,
            value: op.key,
            inserted_dot: None,
            removed_dots: op.removed_dots,
        })
    }
}

impl<T: Ord + Clone> Replica for ORSet<T> {
    type Op = SetOp<T>;
    type Change = Option<SetChange<T>>;

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

    /// Reports a change only when the value's presence flipped.
    fn execute_op(&mut self, op: &SetOp<T>) -> Option<SetChange<T>> {
        let inserted = op
            .inserted_dot
            .filter(|dot| !self.summary.contains(dot))
            .map(|dot| MapElement { value: (), dot });
        if let Some(element) = &inserted {
            self.summary.insert(&element.dot);
        }
        for dot in &op.removed_dots {
            self.summary.insert(dot);
        }

        let existed = self.state.contains_key(&op.value);
        self.state
            .apply(&op.value, inserted.as_ref(), &op.removed_dots);
        let kind = match (existed, self.state.contains_key(&op.value)) {
            (false, true) => SetOpKind::Insert,
            (true, false) => SetOpKind::Remove,
            _ => return None,
        };
        Some(SetChange {
            kind,
            value: op.value.clone(),
        })
    }
}

impl<T: Ord> PartialEq for ORSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.state.same_dots(&other.state) && self.summary == other.summary
    }
}
