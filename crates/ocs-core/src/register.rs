//! Multi-writer register
//!
//! Keeps the latest value written by each site on the current write frontier.
//! An update supersedes every value it has observed, so after any single
//! write propagates only values concurrent with it remain. Among those the
//! value of the lowest site id is the visible one.

use crate::dot::{check_site_id, Counter, Dot, SiteId, Summary};
use crate::replica::{CausalOp, Replica};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SiteValue<V> {
    value: V,
    counter: Counter,
}

/// Remote operation produced by `Register::update`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterOp<V> {
    pub dot: Dot,
    pub value: V,
    pub removed_dots: Vec<Dot>,
}

impl<V> CausalOp for RegisterOp<V> {
    fn inserted_dots(&self) -> Vec<Dot> {
        vec![self.dot]
    }
}

/// Op-based register owned by one site.
#[derive(Clone, Debug)]
pub struct Register<V> {
    site_id: SiteId,
    values: BTreeMap<SiteId, SiteValue<V>>,
    summary: Summary,
}

impl<V> Register<V> {
    /// Create a register holding `value`, written by `site_id` at counter 1.
    ///
    /// Panics if `site_id` is zero.
    pub fn new(site_id: SiteId, value: V) -> Self {
        check_site_id(site_id);
        let mut summary = Summary::new();
        let counter = summary.increment(site_id);
        let mut values = BTreeMap::new();
        values.insert(site_id, SiteValue { value, counter });
        Self {
            site_id,
            values,
            summary,
        }
    }

    /// The value written by the lowest site id still on the frontier.
    pub fn get(&self) -> &V {
        match self.values.values().next() {
            Some(entry) => &entry.value,
            None => unreachable!("register holds no value"),
        }
    }

    /// Highest counter observed for `site`.
    pub fn counter(&self, site: SiteId) -> Counter {
        self.summary.counter(site)
    }

    /// Number of concurrent values currently held.
    pub fn concurrent_len(&self) -> usize {
        self.values.len()
    }

    /// Overwrite every observed value with `value`.
    pub fn update(&mut self, value: V) -> RegisterOp<V>
    where
        V: Clone,
    {
        let removed_dots = self
            .values
            .iter()
            .filter(|(site, _)| **site != self.site_id)
            .map(|(&site, entry)| Dot::new(site, entry.counter))
            .collect();
        let dot = self.summary.dot(self.site_id);
        self.values.clear();
        self.values.insert(
            self.site_id,
            SiteValue {
                value: value.clone(),
                counter: dot.counter,
            },
        );
        RegisterOp {
            dot,
            value,
            removed_dots,
        }
    }
}

impl<V: Clone> Replica for Register<V> {
    type Op = RegisterOp<V>;
    type Change = V;

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
            values: self.values.clone(),
            summary: self.summary.clone(),
        }
    }

    /// Returns the visible value after applying `op`.
    fn execute_op(&mut self, op: &RegisterOp<V>) -> V {
        for dot in &op.removed_dots {
            // A newer write from the same site was not observed by the remover.
            if self
                .values
                .get(&dot.site)
                .is_some_and(|entry| entry.counter <= dot.counter)
            {
                self.values.remove(&dot.site);
            }
            // A superseded write still in flight is dropped on arrival.
            self.summary.insert(dot);
        }

        if self.summary.contains(&op.dot) {
            debug!(dot = %op.dot, "ignoring already observed register write");
        } else {
            self.summary.insert(&op.dot);
            let fresher = self
                .values
                .get(&op.dot.site)
                .is_some_and(|entry| entry.counter > op.dot.counter);
            if !fresher {
                self.values.insert(
                    op.dot.site,
                    SiteValue {
                        value: op.value.clone(),
                        counter: op.dot.counter,
                    },
                );
            }
        }
        self.get().clone()
    }
}

impl<V: PartialEq> PartialEq for Register<V> {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.summary == other.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_register() {
        let r = Register::new(1, 8142);
        assert_eq!(*r.get(), 8142);
        assert_eq!(r.site_id(), 1);
        assert_eq!(r.counter(1), 1);
    }

    #[test]
    fn test_update() {
        let mut r = Register::new(1, 8142);
        let op = r.update(42);
        assert_eq!(*r.get(), 42);
        assert_eq!(r.counter(1), 2);
        assert_eq!(op.dot, Dot::new(1, 2));
        assert_eq!(op.value, 42);
        assert!(op.removed_dots.is_empty());
    }

    #[test]
    fn test_execute_op() {
        let mut r1 = Register::new(1, "a");
        let mut r2 = r1.replicate(2);
        let op = r1.update("b");
        assert_eq!(r2.execute_op(&op), "b");
        assert_eq!(r2.replicate(1), r1);
    }

    #[test]
    fn test_execute_op_concurrent() {
        let mut r1 = Register::new(1, "a");
        let mut r2 = r1.replicate(2);
        let mut r3 = r1.replicate(3);
        let op1 = r1.update("b");
        let op2 = r2.update("c");
        let op3 = r3.update("d");

        assert_eq!(r1.execute_op(&op2), "b");
        assert_eq!(r1.execute_op(&op3), "b");
        assert_eq!(r2.execute_op(&op3), "c");
        assert_eq!(r2.execute_op(&op1), "b");
        assert_eq!(r3.execute_op(&op2), "c");
        assert_eq!(r3.execute_op(&op1), "b");

        assert_eq!(r1.concurrent_len(), 3);
        assert_eq!(r1.replicate(2), r2);
        assert_eq!(r1.replicate(3), r3);
    }

    #[test]
    fn test_remote_duplicate() {
        let mut r1 = Register::new(1, "a");
        let mut r2 = r1.replicate(2);
        let op = r1.update("b");
        assert_eq!(r2.execute_op(&op), "b");
        assert_eq!(r2.execute_op(&op), "b");
        assert_eq!(r2.replicate(1), r1);
    }

    #[test]
    fn test_sequential_updates_across_sites() {
        let mut r1 = Register::new(1, 1);
        let mut r2 = r1.replicate(2);
        let op1 = r1.update(2);
        assert_eq!(r2.execute_op(&op1), 2);
        let op2 = r2.update(3);
        assert_eq!(op2.removed_dots, vec![Dot::new(1, 2)]);
        assert_eq!(r1.execute_op(&op2), 3);
        assert_eq!(r1.concurrent_len(), 1);
    }

    #[test]
    fn test_unseen_newer_write_survives_remove() {
        let mut r1 = Register::new(1, "a");
        let mut r2 = r1.replicate(2);
        let newer = r1.update("b");
        let op = r2.update("c");
        assert_eq!(op.removed_dots, vec![Dot::new(1, 1)]);
        assert_eq!(r1.execute_op(&op), "b");
        assert_eq!(r2.execute_op(&newer), "b");
    }

    #[test]
    fn test_same_site_writes_in_reverse_order() {
        let mut r1 = Register::new(1, "a");
        let mut r2 = r1.replicate(2);
        let first = r1.update("b");
        let second = r1.update("c");
        assert_eq!(r2.execute_op(&second), "c");
        assert_eq!(r2.execute_op(&first), "c");
        assert_eq!(r2.replicate(1), r1);
    }

    #[test]
    fn test_superseded_write_arriving_late_is_dropped() {
        let r1 = Register::new(1, "a");
        let mut r2 = r1.replicate(2);
        let mut r3 = r1.replicate(3);
        let mut late = r1.replicate(4);
        let write = r2.update("x");
        r3.execute_op(&write);
        let overwrite = r3.update("y");

        // The overwrite never observed site 1's value, only the write did.
        assert_eq!(late.execute_op(&overwrite), "a");
        assert_eq!(late.execute_op(&write), "y");
        assert_eq!(late.concurrent_len(), 1);
        assert_eq!(late.replicate(3), r3);
    }

    #[test]
    fn test_validate() {
        let mut r = Register::new(2, 0u8);
        let op = r.update(1);
        assert!(op.validate(2).is_ok());
        assert!(op.validate(1).is_err());
    }
}
