//! Change notifications for text.
//!
//! An `Edit` replaces `count` bytes at `index` with `text`. Consecutive
//! edits that touch or overlap fold into one, which keeps the notifications
//! produced by remote ops (and the pending local edit) compact.

use serde::{Deserialize, Serialize};

/// Pending edits longer than this are never rewritten in place.
pub const OVERWRITE_LIMIT: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub index: usize,
    pub count: usize,
    pub text: String,
}

impl Edit {
    pub fn new(index: usize, count: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            count,
            text: text.into(),
        }
    }

    /// Fold a later edit into this one if their ranges touch.
    ///
    /// The later edit is expressed against the text after this one applied.
    pub fn try_merge(&mut self, index: usize, count: usize, text: &str) -> bool {
        if self.can_merge(index, count) {
            self.modify(false, index, count, text);
            true
        } else {
            false
        }
    }

    /// Like `try_merge`, but afterwards `count` spans the current text the
    /// merged edit covers, so the whole run can be replaced again.
    pub fn try_overwrite(&mut self, index: usize, count: usize, text: &str) -> bool {
        if self.should_overwrite(index, count) {
            self.modify(true, index, count, text);
            true
        } else {
            false
        }
    }

    /// Move this edit past a change made elsewhere.
    ///
    /// Returns `None` when the change overlaps this edit's inserted text.
    pub fn shift_or_destroy(mut self, index: usize, count: usize, text: &str) -> Option<Self> {
        if index + count <= self.index {
            self.index = self.index - count + text.len();
            Some(self)
        } else if index >= self.index + self.text.len() {
            Some(self)
        } else {
            None
        }
    }

    fn should_overwrite(&self, index: usize, count: usize) -> bool {
        self.can_merge(index, count)
            && self.text.len() < OVERWRITE_LIMIT
            && !self.text.ends_with('\n')
    }

    fn can_merge(&self, index: usize, count: usize) -> bool {
        index + count >= self.index && index <= self.index + self.text.len()
    }

    fn modify(&mut self, overwrite: bool, index: usize, count: usize, text: &str) {
        let deletes_before = self.index.saturating_sub(index);
        let insert_index = index.saturating_sub(self.index);
        let deletes_after = count - deletes_before;
        let text_delete_len = deletes_after.min(self.text.len() - insert_index);
        let deletes_after = deletes_after - text_delete_len;

        self.index = self.index.min(index);
        if overwrite {
            self.count = deletes_before + self.text.len() + deletes_after;
        } else {
            self.count += deletes_before + deletes_after;
        }

        let mut merged = String::with_capacity(self.text.len() + text.len());
        merged.push_str(&self.text[..insert_index]);
        merged.push_str(text);
        merged.push_str(&self.text[insert_index + text_delete_len..]);
        self.text = merged;
    }
}

/// Append an edit, folding it into the last one when possible.
pub fn push_edit(edits: &mut Vec<Edit>, index: usize, count: usize, text: &str) {
    if let Some(last) = edits.last_mut() {
        if last.try_merge(index, count, text) {
            return;
        }
    }
    edits.push(Edit::new(index, count, text));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adjacent_inserts() {
        let mut edit = Edit::new(3, 0, "ab");
        assert!(edit.try_merge(5, 0, "cd"));
        assert_eq!(edit, Edit::new(3, 0, "abcd"));
        assert!(edit.try_merge(3, 0, "x"));
        assert_eq!(edit, Edit::new(3, 0, "xabcd"));
    }

    #[test]
    fn test_merge_delete_spanning_text() {
        let mut edit = Edit::new(2, 1, "abc");
        // Deletes one byte before, all of "abc" and two bytes after.
        assert!(edit.try_merge(1, 6, ""));
        assert_eq!(edit, Edit::new(1, 4, ""));
    }

    #[test]
    fn test_disjoint_edits_do_not_merge() {
        let mut edit = Edit::new(5, 0, "ab");
        assert!(!edit.try_merge(8, 0, "x"));
        assert!(!edit.try_merge(0, 2, ""));
        assert_eq!(edit, Edit::new(5, 0, "ab"));
    }

    #[test]
    fn test_overwrite_counts_current_text() {
        let mut edit = Edit::new(0, 0, "Hello There");
        assert!(edit.try_overwrite(6, 3, ""));
        assert_eq!(edit, Edit::new(0, 11, "Hello re"));
    }

    #[test]
    fn test_overwrite_refused_for_long_or_finished_lines() {
        let mut line = Edit::new(0, 0, "done\n");
        assert!(!line.try_overwrite(5, 0, "x"));
        let mut long = Edit::new(0, 0, "x".repeat(OVERWRITE_LIMIT));
        assert!(!long.try_overwrite(1, 0, "y"));
        assert!(long.try_merge(1, 0, "y"));
    }

    #[test]
    fn test_shift_or_destroy() {
        let edit = Edit::new(10, 0, "abc");
        assert_eq!(
            edit.clone().shift_or_destroy(2, 3, "z"),
            Some(Edit::new(8, 0, "abc"))
        );
        assert_eq!(edit.clone().shift_or_destroy(13, 2, ""), Some(edit.clone()));
        assert_eq!(edit.shift_or_destroy(11, 0, "q"), None);
    }

    #[test]
    fn test_push_edit_folds() {
        let mut edits = Vec::new();
        push_edit(&mut edits, 0, 13, "");
        push_edit(&mut edits, 0, 0, "Hěllo ere");
        push_edit(&mut edits, 20, 0, "!");
        assert_eq!(
            edits,
            vec![Edit::new(0, 13, "Hěllo ere"), Edit::new(20, 0, "!")]
        );
    }
}
