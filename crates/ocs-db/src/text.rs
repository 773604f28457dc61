//! Collaborative text.
//!
//! Text is a sequence of UID-tagged fragments rather than single characters.
//! Every local change goes through `replace`, which rewrites only the
//! fragments the edit touches: the untouched prefix and suffix of a boundary
//! fragment are re-issued as fresh fragments next to the inserted text.
//!
//! Consecutive local edits that touch the same short run are folded into one
//! pending edit and re-issued as a single fragment, so typing a word leaves
//! one fragment behind instead of one per keystroke.
//!
//! Indices and lengths are in bytes and must fall on `char` boundaries.

use crate::edit::{push_edit, Edit};
use crate::fragment::FragmentTree;
use ocs_core::{check_site_id, CausalOp, Dot, Replica, SiteId, Summary, Uid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, trace};

/// A fragment shipped in an op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextElement {
    pub uid: Uid,
    pub text: String,
}

/// Remote operation on text: fragments to drop and fragments to add.
///
/// All fragments inserted by one op share the op's dot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOp {
    pub inserted: Vec<TextElement>,
    pub removed: Vec<Uid>,
}

impl TextOp {
    /// The dot of the mutation that produced this op, if it inserted text.
    pub fn dot(&self) -> Option<Dot> {
        self.inserted.first().map(|e| e.uid.dot)
    }
}

impl CausalOp for TextOp {
    fn inserted_dots(&self) -> Vec<Dot> {
        let mut dots: Vec<Dot> = self.inserted.iter().map(|e| e.uid.dot).collect();
        dots.dedup();
        dots
    }
}

/// Fragments plus the pending local edit.
///
/// Only the fragments are serialized; the pending edit is local.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TextState {
    tree: FragmentTree,
    #[serde(skip)]
    edit: Option<Edit>,
}

impl TextState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state holding `text` as a single fragment.
    pub fn from_text(text: &str, dot: Dot) -> (Self, TextOp) {
        let mut state = Self::new();
        let op = state.replace(0, 0, text, dot).unwrap_or_default();
        state.edit = None;
        (state, op)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn value(&self) -> String {
        self.tree.text()
    }

    pub fn tree(&self) -> &FragmentTree {
        &self.tree
    }

    /// Whether byte `index` starts a `char` or is the end of the text.
    pub fn is_char_boundary(&self, index: usize) -> bool {
        if index >= self.tree.len() {
            return index == self.tree.len();
        }
        let (_, text, offset) = self.tree.element_at(index);
        text.is_char_boundary(offset)
    }

    pub fn pending_edit(&self) -> Option<&Edit> {
        self.edit.as_ref()
    }

    /// Forget the pending local edit.
    pub fn clear_pending_edit(&mut self) {
        self.edit = None;
    }

    /// Copy of the fragments without the pending edit.
    pub fn fork(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            edit: None,
        }
    }

    /// Replace `count` bytes at `index` with `text`, tagging new fragments
    /// with `dot`.
    ///
    /// Returns `None` for an empty edit. Panics if the range is out of
    /// bounds or either end splits a `char`.
    pub fn replace(&mut self, index: usize, count: usize, text: &str, dot: Dot) -> Option<TextOp> {
        assert!(
            index + count <= self.tree.len(),
            "Index out of bounds: {}",
            index
        );
        for end in [index, index + count] {
            assert!(
                self.is_char_boundary(end),
                "Index {} is not on a char boundary",
                end
            );
        }
        if count == 0 && text.is_empty() {
            return None;
        }

        let edit = self.merged_edit(index, count, text);
        let op = if self.offset_at(edit.index) == 0 && edit.count == 0 {
            self.do_insert(edit.index, edit.text, dot)
        } else {
            self.do_replace(edit.index, edit.count, &edit.text, dot)
        };
        Some(op)
    }

    /// Apply a remote op, returning the resulting changes in order.
    pub fn execute_op(&mut self, op: &TextOp) -> Vec<Edit> {
        let mut edits = Vec::new();
        for uid in &op.removed {
            let Some(index) = self.tree.index_of(uid) else {
                continue;
            };
            if let Some(text) = self.tree.remove(uid) {
                push_edit(&mut edits, index, text.len(), "");
            }
        }
        for element in &op.inserted {
            if !self.tree.insert(element.uid.clone(), element.text.clone()) {
                continue;
            }
            if let Some(index) = self.tree.index_of(&element.uid) {
                push_edit(&mut edits, index, 0, &element.text);
            }
        }
        self.shift_pending_edit(&edits);
        edits
    }

    fn do_insert(&mut self, index: usize, text: String, dot: Dot) -> TextOp {
        let uid = Uid::between(&self.prev_uid(index), &self.uid_at(index), dot);
        self.tree.insert(uid.clone(), text.clone());
        TextOp {
            inserted: vec![TextElement { uid, text }],
            removed: Vec::new(),
        }
    }

    fn do_replace(&mut self, index: usize, count: usize, text: &str, dot: Dot) -> TextOp {
        let (first, offset) = self.remove_at(index);
        let start = index - offset;
        let mut covered = first.text.len() - offset;
        let mut removed = vec![first];
        while covered < count {
            let (next, _) = self.remove_at(start);
            covered += next.text.len();
            removed.push(next);
        }

        let mut pieces = Vec::with_capacity(3);
        if offset > 0 {
            pieces.push(removed[0].text[..offset].to_string());
        }
        if !text.is_empty() {
            pieces.push(text.to_string());
        }
        if covered > count {
            if let Some(last) = removed.last() {
                pieces.push(last.text[last.text.len() + count - covered..].to_string());
            }
        }

        let mut inserted: Vec<TextElement> = Vec::with_capacity(pieces.len());
        if !pieces.is_empty() {
            let mut lo = self.prev_uid(start);
            let hi = self.uid_at(start);
            for piece in pieces {
                let uid = Uid::between(&lo, &hi, dot);
                lo = uid.clone();
                inserted.push(TextElement { uid, text: piece });
            }
        }
        for element in &inserted {
            self.tree.insert(element.uid.clone(), element.text.clone());
        }
        trace!(
            removed = removed.len(),
            inserted = inserted.len(),
            "replaced text fragments"
        );
        TextOp {
            inserted,
            removed: removed.into_iter().map(|e| e.uid).collect(),
        }
    }

    fn remove_at(&mut self, index: usize) -> (TextElement, usize) {
        let (uid, _, offset) = self.tree.element_at(index);
        let uid = uid.clone();
        match self.tree.remove(&uid) {
            Some(text) => (TextElement { uid, text }, offset),
            None => unreachable!("fragment {} vanished", uid),
        }
    }

    /// UID of the fragment holding the byte before `index`.
    fn prev_uid(&self, index: usize) -> Uid {
        match index {
            0 => Uid::min(),
            i => self.tree.element_at(i - 1).0.clone(),
        }
    }

    /// UID of the fragment holding byte `index`.
    fn uid_at(&self, index: usize) -> Uid {
        if index == self.tree.len() {
            Uid::max()
        } else {
            self.tree.element_at(index).0.clone()
        }
    }

    fn offset_at(&self, index: usize) -> usize {
        if index == self.tree.len() {
            0
        } else {
            self.tree.element_at(index).2
        }
    }

    fn merged_edit(&mut self, index: usize, count: usize, text: &str) -> Edit {
        if let Some(pending) = self.edit.as_mut() {
            if pending.try_overwrite(index, count, text) {
                trace!(index = pending.index, count = pending.count, "folded into pending edit");
                return pending.clone();
            }
        }
        let edit = Edit::new(index, count, text);
        self.edit = Some(edit.clone());
        edit
    }

    fn shift_pending_edit(&mut self, edits: &[Edit]) {
        for edit in edits {
            let Some(pending) = self.edit.take() else {
                break;
            };
            self.edit = pending.shift_or_destroy(edit.index, edit.count, &edit.text);
        }
    }
}

/// States are equal when they hold the same fragments.
impl PartialEq for TextState {
    fn eq(&self, other: &Self) -> bool {
        self.tree == other.tree
    }
}

impl fmt::Display for TextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, text) in self.tree.iter() {
            f.write_str(text)?;
        }
        Ok(())
    }
}

/// Op-based collaborative text owned by one site.
#[derive(Clone, Debug)]
pub struct Text {
    site_id: SiteId,
    state: TextState,
    summary: Summary,
    /// Fragments removed before the op inserting them arrived.
    early_removes: BTreeSet<Uid>,
}

impl Text {
    /// Panics if `site_id` is zero.
    pub fn new(site_id: SiteId) -> Self {
        check_site_id(site_id);
        Self {
            site_id,
            state: TextState::new(),
            summary: Summary::new(),
            early_removes: BTreeSet::new(),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn value(&self) -> String {
        self.state.value()
    }

    pub fn state(&self) -> &TextState {
        &self.state
    }

    /// Replace `count` bytes at `index` with `text`.
    ///
    /// A dot is only consumed when the op inserts text. Panics if the range
    /// is out of bounds or `index` or `index + count` falls inside a
    /// multi-byte `char`.
    pub fn replace(&mut self, index: usize, count: usize, text: &str) -> Option<TextOp> {
        let dot = self.summary.next_dot(self.site_id);
        let op = self.state.replace(index, count, text, dot)?;
        if !op.inserted.is_empty() {
            self.summary.insert(&dot);
        }
        Some(op)
    }
}

impl Replica for Text {
    type Op = TextOp;
    type Change = Vec<Edit>;

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
            state: self.state.fork(),
            summary: self.summary.clone(),
            early_removes: self.early_removes.clone(),
        }
    }

    fn execute_op(&mut self, op: &TextOp) -> Vec<Edit> {
        if let Some(dot) = op.dot() {
            if self.summary.contains(&dot) {
                debug!(dot = %dot, "ignoring already observed text op");
                return Vec::new();
            }
            self.summary.insert(&dot);
        }
        for uid in &op.removed {
            if !self.summary.contains(&uid.dot) {
                trace!(uid = %uid, "remove arrived ahead of its insert");
                self.early_removes.insert(uid.clone());
            }
        }
        if self.early_removes.is_empty() {
            return self.state.execute_op(op);
        }
        let early_removes = &mut self.early_removes;
        let op = TextOp {
            inserted: op
                .inserted
                .iter()
                .filter(|e| !early_removes.remove(&e.uid))
                .cloned()
                .collect(),
            removed: op.removed.clone(),
        };
        self.state.execute_op(&op)
    }
}

/// Replicas are equal when they hold the same fragments and summary.
impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state && self.summary == other.summary
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.fmt(f)
    }
}
