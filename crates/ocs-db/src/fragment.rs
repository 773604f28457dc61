//! UID-ordered runs of text.

use ocs_core::Uid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text fragments ordered by UID, with their total length in bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Uid, String>", into = "BTreeMap<Uid, String>")]
pub struct FragmentTree {
    fragments: BTreeMap<Uid, String>,
    len: usize,
}

impl FragmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.fragments.contains_key(uid)
    }

    /// Returns false if `uid` is already present.
    pub fn insert(&mut self, uid: Uid, text: String) -> bool {
        if self.fragments.contains_key(&uid) {
            return false;
        }
        self.len += text.len();
        self.fragments.insert(uid, text);
        true
    }

    pub fn remove(&mut self, uid: &Uid) -> Option<String> {
        let text = self.fragments.remove(uid)?;
        self.len -= text.len();
        Some(text)
    }

    /// The fragment covering byte `index` and the offset of `index` inside it.
    ///
    /// Panics if `index >= len`.
    pub fn element_at(&self, index: usize) -> (&Uid, &str, usize) {
        assert!(index < self.len, "Index out of bounds: {}", index);
        let mut remaining = index;
        for (uid, text) in &self.fragments {
            if remaining < text.len() {
                return (uid, text, remaining);
            }
            remaining -= text.len();
        }
        unreachable!("fragment lengths do not add up to {}", self.len)
    }

    /// Byte index at which the fragment `uid` starts.
    pub fn index_of(&self, uid: &Uid) -> Option<usize> {
        if !self.fragments.contains_key(uid) {
            return None;
        }
        Some(self.fragments.range(..uid).map(|(_, text)| text.len()).sum())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uid, &str)> + '_ {
        self.fragments.iter().map(|(uid, text)| (uid, text.as_str()))
    }

    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.len);
        for text in self.fragments.values() {
            out.push_str(text);
        }
        out
    }
}

impl From<BTreeMap<Uid, String>> for FragmentTree {
    fn from(fragments: BTreeMap<Uid, String>) -> Self {
        let len = fragments.values().map(String::len).sum();
        Self { fragments, len }
    }
}

impl From<FragmentTree> for BTreeMap<Uid, String> {
    fn from(tree: FragmentTree) -> Self {
        tree.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocs_core::Dot;

    fn uids(n: u32) -> Vec<Uid> {
        let mut out = Vec::new();
        let mut lo = Uid::min();
        for counter in 1..=n {
            let uid = Uid::between(&lo, &Uid::max(), Dot::new(1, counter));
            out.push(uid.clone());
            lo = uid;
        }
        out
    }

    #[test]
    fn test_insert_remove_tracks_len() {
        let u = uids(2);
        let mut tree = FragmentTree::new();
        assert!(tree.insert(u[0].clone(), "abc".into()));
        assert!(!tree.insert(u[0].clone(), "zzz".into()));
        assert!(tree.insert(u[1].clone(), "dé".into()));
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.remove(&u[0]).as_deref(), Some("abc"));
        assert_eq!(tree.len(), 3);
        assert!(tree.remove(&u[0]).is_none());
    }

    #[test]
    fn test_element_at_and_index_of() {
        let u = uids(3);
        let mut tree = FragmentTree::new();
        tree.insert(u[2].clone(), "ghi".into());
        tree.insert(u[0].clone(), "a".into());
        tree.insert(u[1].clone(), "bcdef".into());
        assert_eq!(tree.text(), "abcdefghi");

        assert_eq!(tree.element_at(0), (&u[0], "a", 0));
        assert_eq!(tree.element_at(1), (&u[1], "bcdef", 0));
        assert_eq!(tree.element_at(4), (&u[1], "bcdef", 3));
        assert_eq!(tree.element_at(8), (&u[2], "ghi", 2));

        assert_eq!(tree.index_of(&u[0]), Some(0));
        assert_eq!(tree.index_of(&u[2]), Some(6));
        tree.remove(&u[1]);
        assert_eq!(tree.index_of(&u[2]), Some(1));
        assert_eq!(tree.index_of(&u[1]), None);
    }

    #[test]
    #[should_panic(expected = "Index out of bounds")]
    fn test_element_at_end_panics() {
        let u = uids(1);
        let mut tree = FragmentTree::new();
        tree.insert(u[0].clone(), "ab".into());
        tree.element_at(2);
    }
}
