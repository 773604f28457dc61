//! Replicated sequence keyed by UID.
//!
//! Elements are kept sorted by their `Uid`. Because the UID order is fixed
//! when an element is created, every replica that has applied the same
//! inserts and removes holds the same sequence regardless of delivery order.
//! Removal deletes the element outright. Duplicate ops are detected by a
//! binary search for the UID, and inserts already recorded in the summary are
//! never applied twice. A remove records the dot of the element it deletes,
//! so an insert delivered after its own remove is dropped as well.

use crate::dot::{check_site_id, Dot, SiteId, Summary};
use crate::replica::{CausalOp, Replica};
use crate::uid::Uid;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One value together with its position in the sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListElement<T> {
    pub uid: Uid,
    pub value: T,
}

/// Remote operation on a list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ListOp<T> {
    Insert(ListElement<T>),
    Remove(Uid),
}

impl<T> ListOp<T> {
    pub fn inserted_element(&self) -> Option<&ListElement<T>> {
        match self {
            ListOp::Insert(element) => Some(element),
            ListOp::Remove(_) => None,
        }
    }

    pub fn removed_uid(&self) -> Option<&Uid> {
        match self {
            ListOp::Insert(_) => None,
            ListOp::Remove(uid) => Some(uid),
        }
    }
}

impl<T> CausalOp for ListOp<T> {
    fn inserted_dots(&self) -> Vec<Dot> {
        self.inserted_element()
            .map(|element| vec![element.uid.dot])
            .unwrap_or_default()
    }
}

/// What applying a remote op did to the local sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum ListChange<T> {
    Insert { index: usize, value: T },
    Remove { index: usize },
}

/// The UID-sorted elements of a list, without causal bookkeeping.
///
/// Positional methods panic when the index is out of range; check `len`
/// first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListState<T> {
    elements: Vec<ListElement<T>>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
        }
    }
}

impl<T> ListState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.elements.get(index).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<(&Uid, &mut T)> {
        self.elements.get_mut(index).map(|e| (&e.uid, &mut e.value))
    }

    pub fn element(&self, index: usize) -> Option<&ListElement<T>> {
        self.elements.get(index)
    }

    /// Locate `uid`: `Ok(index)` if present, `Err(slot)` where it would go.
    pub fn index_of(&self, uid: &Uid) -> Result<usize, usize> {
        self.elements.binary_search_by(|e| e.uid.cmp(uid))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.elements.iter().map(|e| &e.value)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.elements.iter_mut().map(|e| &mut e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListElement<T>> + '_ {
        self.elements.iter()
    }

    /// Remove and return the element at `index`.
    pub fn remove(&mut self, index: usize) -> (T, ListOp<T>) {
        let element = self.elements.remove(index);
        (element.value, ListOp::Remove(element.uid))
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<(T, ListOp<T>)> {
        let element = self.elements.pop()?;
        Some((element.value, ListOp::Remove(element.uid)))
    }

    fn insert_element(&mut self, element: ListElement<T>) -> Option<usize> {
        match self.index_of(&element.uid) {
            Ok(_) => None,
            Err(slot) => {
                self.elements.insert(slot, element);
                Some(slot)
            }
        }
    }
}

impl<T: Clone> ListState<T> {
    /// Insert `value` so it ends up at `index`, tagging it with `dot`.
    pub fn insert(&mut self, index: usize, value: T, dot: Dot) -> ListOp<T> {
        let len = self.elements.len();
        assert!(index <= len, "index {} out of bounds for list of length {}", index, len);

        let lo = match index {
            0 => Uid::min(),
            i => self.elements[i - 1].uid.clone(),
        };
        let hi = match self.elements.get(index) {
            Some(e) => e.uid.clone(),
            None => Uid::max(),
        };
        let element = ListElement {
            uid: Uid::between(&lo, &hi, dot),
            value,
        };
        // Placed by UID so a colliding allocation still lands where remote replicas put it.
        self.insert_element(element.clone());
        ListOp::Insert(element)
    }

    pub fn push(&mut self, value: T, dot: Dot) -> ListOp<T> {
        self.insert(self.elements.len(), value, dot)
    }

    pub fn execute_op(&mut self, op: &ListOp<T>) -> Option<ListChange<T>> {
        match op {
            ListOp::Insert(element) => match self.insert_element(element.clone()) {
                Some(index) => Some(ListChange::Insert {
                    index,
                    value: element.value.clone(),
                }),
                None => {
                    debug!(uid = %element.uid, "ignoring duplicate list insert");
                    None
                }
            },
            ListOp::Remove(uid) => match self.index_of(uid) {
                Ok(index) => {
                    self.elements.remove(index);
                    Some(ListChange::Remove { index })
                }
                Err(_) => {
                    debug!(uid = %uid, "ignoring remove of absent list element");
                    None
                }
            },
        }
    }
}

/// Op-based replicated list owned by one site.
#[derive(Clone, Debug)]
pub struct List<T> {
    site_id: SiteId,
    state: ListState<T>,
    summary: Summary,
}

impl<T> List<T> {
    /// Panics if `site_id` is zero.
    pub fn new(site_id: SiteId) -> Self {
        check_site_id(site_id);
        Self {
            site_id,
            state: ListState::new(),
            summary: Summary::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.state.get(index)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.state.values()
    }

    pub fn index_of(&self, uid: &Uid) -> Option<usize> {
        self.state.index_of(uid).ok()
    }

    pub fn state(&self) -> &ListState<T> {
        &self.state
    }

    /// Remove the element at `index`. Panics if out of range.
    pub fn remove(&mut self, index: usize) -> (T, ListOp<T>) {
        self.state.remove(index)
    }

    pub fn pop(&mut self) -> Option<(T, ListOp<T>)> {
        self.state.pop()
    }
}

impl<T: Clone> List<T> {
    pub fn push(&mut self, value: T) -> ListOp<T> {
        let dot = self.summary.dot(self.site_id);
        self.state.push(value, dot)
    }

    /// Insert at `index`, which must be in `0..=len`.
    pub fn insert(&mut self, index: usize, value: T) -> ListOp<T> {
        let dot = self.summary.dot(self.site_id);
        self.state.insert(index, value, dot)
    }
}

impl<T: Clone> Replica for List<T> {
    type Op = ListOp<T>;
    type Change = Option<ListChange<T>>;

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

    /// Inserts whose dot is already in the summary were seen before and,
    /// if absent now, removed since; they are not applied again.
    fn execute_op(&mut self, op: &ListOp<T>) -> Option<ListChange<T>> {
        match op {
            ListOp::Insert(element) => {
                if self.summary.contains(&element.uid.dot) {
                    debug!(dot = %element.uid.dot, "ignoring already observed list insert");
                    return None;
                }
                self.summary.insert(&element.uid.dot);
            }
            ListOp::Remove(uid) => self.summary.insert(&uid.dot),
        }
        self.state.execute_op(op)
    }
}

/// Replicas are equal when they hold the same elements and summary.
impl<T: PartialEq> PartialEq for List<T> {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state && self.summary == other.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid_of<T>(op: &ListOp<T>) -> &Uid {
        &op.inserted_element().unwrap().uid
    }

    #[test]
    fn test_new_list_is_empty() {
        let list: List<i32> = List::new(1);
        assert_eq!(list.len(), 0);
        assert!(list.get(0).is_none());
    }

    #[test]
    fn test_insert_prepend() {
        let mut list = List::new(1);
        let op1 = list.insert(0, 123);
        let op2 = list.insert(0, 456);
        let op3 = list.insert(0, 789);
        assert_eq!(list.values().copied().collect::<Vec<_>>(), vec![789, 456, 123]);
        assert!(uid_of(&op1) > uid_of(&op2));
        assert!(uid_of(&op2) > uid_of(&op3));
    }

    #[test]
    fn test_many_prepends() {
        let mut list = List::new(1);
        for i in 0..5_000 {
            list.insert(0, i);
        }
        let values: Vec<_> = list.values().copied().collect();
        let expected: Vec<_> = (0..5_000).rev().collect();
        assert_eq!(values, expected);
        let uids: Vec<_> = list.state().iter().map(|e| &e.uid).collect();
        assert!(uids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_insert_append_and_middle() {
        let mut list = List::new(1);
        let op1 = list.insert(0, 123);
        let op2 = list.insert(1, 456);
        let op3 = list.insert(1, 789);
        assert_eq!(list.values().copied().collect::<Vec<_>>(), vec![123, 789, 456]);
        assert!(uid_of(&op1) < uid_of(&op3));
        assert!(uid_of(&op3) < uid_of(&op2));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_insert_out_of_bounds() {
        let mut list = List::new(1);
        list.insert(1, 123);
    }

    #[test]
    fn test_remove() {
        let mut list = List::new(1);
        list.push(123);
        let op1 = list.push(456);
        list.push(789);
        let (value, op2) = list.remove(1);
        assert_eq!(value, 456);
        assert_eq!(list.values().copied().collect::<Vec<_>>(), vec![123, 789]);
        assert_eq!(op2.removed_uid(), Some(uid_of(&op1)));
    }

    #[test]
    #[should_panic]
    fn test_remove_out_of_bounds() {
        let mut list: List<i32> = List::new(1);
        list.remove(0);
    }

    #[test]
    fn test_pop() {
        let mut list = List::new(1);
        list.push(1);
        let op = list.push(2);
        let (value, removed) = list.pop().unwrap();
        assert_eq!(value, 2);
        assert_eq!(removed.removed_uid(), Some(uid_of(&op)));
        assert_eq!(list.len(), 1);

        let mut empty: List<i32> = List::new(1);
        assert!(empty.pop().is_none());
    }

    #[test]
    fn test_execute_insert_and_remove() {
        let mut l1 = List::new(1);
        let mut l2 = l1.replicate(2);
        let op1 = l1.push("a");
        let op2 = l1.push("b");

        assert_eq!(
            l2.execute_op(&op2),
            Some(ListChange::Insert { index: 0, value: "b" })
        );
        assert_eq!(
            l2.execute_op(&op1),
            Some(ListChange::Insert { index: 0, value: "a" })
        );
        assert_eq!(l1, l2.replicate(1));

        let (_, remove) = l1.remove(0);
        assert_eq!(l2.execute_op(&remove), Some(ListChange::Remove { index: 0 }));
        assert_eq!(l2.values().copied().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_concurrent_push_converges() {
        let mut a = List::new(1);
        let mut b = a.replicate(2);
        let op_a = a.push("x");
        let op_b = b.push("y");
        b.execute_op(&op_a);
        a.execute_op(&op_b);

        let values_a: Vec<_> = a.values().copied().collect();
        let values_b: Vec<_> = b.values().copied().collect();
        assert_eq!(values_a, values_b);
        assert_eq!(values_a.len(), 2);
        assert_eq!(a.summary(), b.summary());
    }

    #[test]
    fn test_position_tie_orders_by_site() {
        let between = Uid::between(&Uid::min(), &Uid::max(), Dot::new(1, 1));
        let tied = Uid {
            position: between.position.clone(),
            dot: Dot::new(2, 1),
        };
        let insert_x = ListOp::Insert(ListElement { uid: between, value: "x" });
        let insert_y = ListOp::Insert(ListElement { uid: tied, value: "y" });

        let mut a = List::new(3);
        let mut b = a.replicate(4);
        a.execute_op(&insert_x);
        a.execute_op(&insert_y);
        b.execute_op(&insert_y);
        b.execute_op(&insert_x);

        assert_eq!(a.values().copied().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(b.values().copied().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn test_same_site_ops_in_reverse_order() {
        let mut a = List::new(1);
        let mut b = a.replicate(2);
        let ops = vec![a.push('x'), a.push('y'), a.insert(0, 'w'), a.remove(1).1];

        for op in ops.iter().rev() {
            b.execute_op(op);
        }
        assert_eq!(b.values().copied().collect::<Vec<_>>(), vec!['w', 'y']);
        assert_eq!(a, b.replicate(1));
        assert!(b.summary().is_contiguous());
    }

    #[test]
    fn test_duplicate_ops_are_not_applied() {
        let mut l1 = List::new(1);
        let mut l2 = l1.replicate(2);
        let insert = l1.push(5);
        assert!(l2.execute_op(&insert).is_some());
        let snapshot = l2.clone();
        assert!(l2.execute_op(&insert).is_none());
        assert_eq!(l2, snapshot);

        let (_, remove) = l1.pop().unwrap();
        assert!(l2.execute_op(&remove).is_some());
        assert!(l2.execute_op(&remove).is_none());
        assert!(l2.is_empty());
    }

    #[test]
    fn test_redelivered_insert_stays_removed() {
        let mut l1 = List::new(1);
        let mut l2 = l1.replicate(2);
        let insert = l1.push(5);
        let (_, remove) = l1.pop().unwrap();
        l2.execute_op(&insert);
        l2.execute_op(&remove);
        assert!(l2.execute_op(&insert).is_none());
        assert!(l2.is_empty());
        assert_eq!(l1.summary(), l2.summary());
    }

    #[test]
    fn test_remove_before_insert_wins() {
        let mut l1 = List::new(1);
        let mut l2 = l1.replicate(2);
        let insert = l1.push(5);
        let (_, remove) = l1.pop().unwrap();
        assert!(l2.execute_op(&remove).is_none());
        assert!(l2.execute_op(&insert).is_none());
        assert!(l2.is_empty());
        assert_eq!(l1.summary(), l2.summary());
    }

    #[test]
    fn test_index_of() {
        let mut list = List::new(1);
        list.push('a');
        let op = list.push('b');
        assert_eq!(list.index_of(uid_of(&op)), Some(1));
        list.remove(1);
        assert_eq!(list.index_of(uid_of(&op)), None);
    }

    #[test]
    fn test_validate() {
        let mut list = List::new(3);
        let insert = list.push(1);
        assert!(insert.validate(3).is_ok());
        assert!(insert.validate(4).is_err());
        let (_, remove) = list.pop().unwrap();
        assert!(remove.validate(4).is_ok());
    }

    #[test]
    #[should_panic(expected = "Invalid site id")]
    fn test_replicate_rejects_zero_site() {
        let list: List<i32> = List::new(1);
        list.replicate(0);
    }

    #[test]
    fn test_op_serialization() {
        let mut list = List::new(1);
        let op = list.push(String::from("hi"));
        let json = serde_json::to_string(&op).unwrap();
        let back: ListOp<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
