//! JSON documents as nested CRDTs.
//!
//! Objects are observed-remove maps, arrays are lists and strings are
//! collaborative text. Every nested CRDT shares the document's summary, so a
//! single dot is minted per local edit no matter how large the inserted
//! value is.
//!
//! Local edits address a value with a pointer of keys and indices. The op
//! they return addresses the same value remotely: object entries by key and
//! the dot that wrote them, array elements by UID. Another replica resolves
//! that remote pointer against its own tree, so sibling edits that shifted
//! indices do not matter, and an op whose ancestor was removed in the
//! meantime is simply not applied.

use crate::edit::Edit;
use crate::error::{DbError, Result};
use crate::text::{TextOp, TextState};
use ocs_core::{
    check_site_id, CausalOp, Dot, ListChange, ListOp, ListState, MapOp, MapState, Replica,
    SiteId, Summary, Uid,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// One step of a local pointer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Format a pointer as `/a/0/b`.
pub fn pointer_string(pointer: &[PathSegment]) -> String {
    pointer.iter().map(|s| format!("/{}", s)).collect()
}

/// One step of a remote pointer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteUid {
    /// The object entry written under `key` by `dot`.
    Object { key: String, dot: Dot },
    /// The array element with this UID.
    Array(Uid),
}

/// A node of the document tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JsonValue {
    Object(MapState<String, JsonValue>),
    Array(ListState<JsonValue>),
    String(TextState),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Null,
}

impl JsonValue {
    /// Convert a plain JSON value, tagging every nested element with `dot`.
    ///
    /// Numbers become `Int` when they fit an `i64`, then `Uint`, then
    /// `Float`.
    pub fn from_json(value: &serde_json::Value, dot: Dot) -> Self {
        match value {
            serde_json::Value::Null => JsonValue::Null,
            serde_json::Value::Bool(b) => JsonValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    JsonValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    JsonValue::Uint(u)
                } else {
                    n.as_f64().map_or(JsonValue::Null, JsonValue::Float)
                }
            }
            serde_json::Value::String(s) => JsonValue::String(TextState::from_text(s, dot).0),
            serde_json::Value::Array(values) => {
                let mut list = ListState::new();
                for v in values {
                    list.push(JsonValue::from_json(v, dot), dot);
                }
                JsonValue::Array(list)
            }
            serde_json::Value::Object(entries) => {
                let mut map = MapState::new();
                for (k, v) in entries {
                    map.insert(k.clone(), JsonValue::from_json(v, dot), dot);
                }
                JsonValue::Object(map)
            }
        }
    }

    /// Materialize this subtree into plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            JsonValue::Object(map) => serde_json::Value::Object(
                map.entries()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            JsonValue::Array(list) => {
                serde_json::Value::Array(list.values().map(JsonValue::to_json).collect())
            }
            JsonValue::String(text) => serde_json::Value::String(text.value()),
            JsonValue::Bool(b) => serde_json::Value::Bool(*b),
            JsonValue::Int(i) => serde_json::Value::Number((*i).into()),
            JsonValue::Uint(u) => serde_json::Value::Number((*u).into()),
            JsonValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            JsonValue::Null => serde_json::Value::Null,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JsonValue::Object(_) => "object",
            JsonValue::Array(_) => "array",
            JsonValue::String(_) => "string",
            JsonValue::Bool(_) => "bool",
            JsonValue::Int(_) => "int",
            JsonValue::Uint(_) => "uint",
            JsonValue::Float(_) => "float",
            JsonValue::Null => "null",
        }
    }

    /// Entry count of a container, byte length of a string, zero otherwise.
    pub fn len(&self) -> usize {
        match self {
            JsonValue::Object(map) => map.len(),
            JsonValue::Array(list) => list.len(),
            JsonValue::String(text) => text.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear_pending_edits(&mut self) {
        match self {
            JsonValue::Object(map) => map.values_mut().for_each(JsonValue::clear_pending_edits),
            JsonValue::Array(list) => list.values_mut().for_each(JsonValue::clear_pending_edits),
            JsonValue::String(text) => text.clear_pending_edit(),
            _ => {}
        }
    }
}

/// The CRDT-specific part of a document op.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InnerOp {
    Object(MapOp<String, JsonValue>),
    Array(ListOp<JsonValue>),
    String(TextOp),
}

impl CausalOp for InnerOp {
    fn inserted_dots(&self) -> Vec<Dot> {
        match self {
            InnerOp::Object(op) => op.inserted_dots(),
            InnerOp::Array(op) => op.inserted_dots(),
            InnerOp::String(op) => op.inserted_dots(),
        }
    }
}

/// Remote operation on a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonOp {
    /// Remote pointer to the object, array or string the inner op targets.
    pub pointer: Vec<RemoteUid>,
    pub inner: InnerOp,
}

impl CausalOp for JsonOp {
    fn inserted_dots(&self) -> Vec<Dot> {
        self.inner.inserted_dots()
    }
}

/// What applying a remote op changed, addressed by local pointer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LocalOp {
    /// `value` is now visible at `pointer`.
    Insert {
        pointer: Vec<PathSegment>,
        value: serde_json::Value,
    },
    Remove {
        pointer: Vec<PathSegment>,
    },
    /// The string at `pointer` changed by `changes`, in order.
    ReplaceText {
        pointer: Vec<PathSegment>,
        changes: Vec<Edit>,
    },
}

impl LocalOp {
    pub fn pointer(&self) -> &[PathSegment] {
        match self {
            LocalOp::Insert { pointer, .. }
            | LocalOp::Remove { pointer }
            | LocalOp::ReplaceText { pointer, .. } => pointer,
        }
    }
}

/// A replicated JSON document owned by one site.
#[derive(Clone, Debug)]
pub struct Json {
    site_id: SiteId,
    root: JsonValue,
    summary: Summary,
}

impl Json {
    /// An empty object document. Panics if `site_id` is zero.
    pub fn new(site_id: SiteId) -> Self {
        check_site_id(site_id);
        Self {
            site_id,
            root: JsonValue::Object(MapState::new()),
            summary: Summary::new(),
        }
    }

    /// A document holding `value`, written by a single mutation.
    ///
    /// Panics if `site_id` is zero.
    pub fn from_json_value(site_id: SiteId, value: &serde_json::Value) -> Self {
        check_site_id(site_id);
        let mut summary = Summary::new();
        let dot = summary.dot(site_id);
        Self {
            site_id,
            root: JsonValue::from_json(value, dot),
            summary,
        }
    }

    /// Parse JSON text into a document.
    pub fn parse(site_id: SiteId, text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::from_json_value(site_id, &value))
    }

    pub(crate) fn from_parts(site_id: SiteId, root: JsonValue, summary: Summary) -> Self {
        check_site_id(site_id);
        Self {
            site_id,
            root,
            summary,
        }
    }

    pub fn root(&self) -> &JsonValue {
        &self.root
    }

    /// The whole document as plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    /// The value at `pointer` as plain JSON. An empty pointer is the root.
    pub fn value(&self, pointer: &[PathSegment]) -> Result<serde_json::Value> {
        Ok(self.lookup(pointer)?.to_json())
    }

    /// See [`JsonValue::len`].
    pub fn len(&self, pointer: &[PathSegment]) -> Result<usize> {
        Ok(self.lookup(pointer)?.len())
    }

    /// Set the key or insert at the index named by the last segment of
    /// `pointer`, inside the object or array the rest of it addresses.
    ///
    /// Array indices may be `0..=len`.
    pub fn insert(&mut self, pointer: &[PathSegment], value: &serde_json::Value) -> Result<JsonOp> {
        let (last, parent) = pointer.split_last().ok_or(DbError::EmptyPointer)?;
        let dot = self.summary.next_dot(self.site_id);
        let (target, remote) = resolve_local(&mut self.root, parent)?;
        let value = JsonValue::from_json(value, dot);

        let inner = match (target, last) {
            (JsonValue::Object(map), PathSegment::Key(key)) => {
                InnerOp::Object(map.insert(key.clone(), value, dot))
            }
            (JsonValue::Array(list), PathSegment::Index(index)) => {
                if *index > list.len() {
                    return Err(DbError::IndexOutOfBounds {
                        index: *index,
                        length: list.len(),
                    });
                }
                InnerOp::Array(list.insert(*index, value, dot))
            }
            (other, segment) => return Err(segment_error(other, segment)),
        };

        self.summary.insert(&dot);
        trace!(pointer = %pointer_string(pointer), dot = %dot, "json insert");
        Ok(JsonOp {
            pointer: remote,
            inner,
        })
    }

    /// Remove the object entry or array element `pointer` addresses.
    pub fn remove(&mut self, pointer: &[PathSegment]) -> Result<JsonOp> {
        let (last, parent) = pointer.split_last().ok_or(DbError::EmptyPointer)?;
        let (target, remote) = resolve_local(&mut self.root, parent)?;

        let inner = match (target, last) {
            (JsonValue::Object(map), PathSegment::Key(key)) => InnerOp::Object(
                map.remove(key)
                    .ok_or_else(|| DbError::PathNotFound(pointer_string(pointer)))?,
            ),
            (JsonValue::Array(list), PathSegment::Index(index)) => {
                if *index >= list.len() {
                    return Err(DbError::IndexOutOfBounds {
                        index: *index,
                        length: list.len(),
                    });
                }
                InnerOp::Array(list.remove(*index).1)
            }
            (other, segment) => return Err(segment_error(other, segment)),
        };

        trace!(pointer = %pointer_string(pointer), "json remove");
        Ok(JsonOp {
            pointer: remote,
            inner,
        })
    }

    /// Replace `count` bytes at `index` of the string `pointer` addresses.
    ///
    /// Returns `Ok(None)` for an empty edit.
    pub fn replace_text(
        &mut self,
        pointer: &[PathSegment],
        index: usize,
        count: usize,
        text: &str,
    ) -> Result<Option<JsonOp>> {
        let dot = self.summary.next_dot(self.site_id);
        let (target, remote) = resolve_local(&mut self.root, pointer)?;
        let state = match target {
            JsonValue::String(state) => state,
            other => {
                return Err(DbError::TypeMismatch {
                    expected: "string".to_string(),
                    found: other.kind().to_string(),
                })
            }
        };

        let length = state.len();
        if index + count > length {
            return Err(DbError::IndexOutOfBounds {
                index: index + count,
                length,
            });
        }
        if let Some(bad) = [index, index + count]
            .into_iter()
            .find(|&i| !state.is_char_boundary(i))
        {
            return Err(DbError::NotCharBoundary(bad));
        }

        let Some(op) = state.replace(index, count, text, dot) else {
            return Ok(None);
        };
        if !op.inserted.is_empty() {
            self.summary.insert(&dot);
        }
        Ok(Some(JsonOp {
            pointer: remote,
            inner: InnerOp::String(op),
        }))
    }

    fn lookup(&self, pointer: &[PathSegment]) -> Result<&JsonValue> {
        let mut value = &self.root;
        for (depth, segment) in pointer.iter().enumerate() {
            value = match (value, segment) {
                (JsonValue::Object(map), PathSegment::Key(key)) => map
                    .get(key)
                    .ok_or_else(|| DbError::PathNotFound(pointer_string(&pointer[..=depth])))?,
                (JsonValue::Array(list), PathSegment::Index(index)) => {
                    list.get(*index).ok_or(DbError::IndexOutOfBounds {
                        index: *index,
                        length: list.len(),
                    })?
                }
                (other, segment) => return Err(segment_error(other, segment)),
            };
        }
        Ok(value)
    }
}

fn segment_error(value: &JsonValue, segment: &PathSegment) -> DbError {
    match (value, segment) {
        (JsonValue::Object(_), PathSegment::Index(i)) => DbError::ExpectedKey {
            found: i.to_string(),
        },
        (JsonValue::Array(_), PathSegment::Key(k)) => DbError::ExpectedIndex { found: k.clone() },
        (other, _) => DbError::TypeMismatch {
            expected: "object or array".to_string(),
            found: other.kind().to_string(),
        },
    }
}

/// Walk a local pointer, collecting the remote pointer to the same value.
fn resolve_local<'a>(
    value: &'a mut JsonValue,
    pointer: &[PathSegment],
) -> Result<(&'a mut JsonValue, Vec<RemoteUid>)> {
    let mut value = value;
    let mut remote = Vec::with_capacity(pointer.len());
    for (depth, segment) in pointer.iter().enumerate() {
        value = match (value, segment) {
            (JsonValue::Object(map), PathSegment::Key(key)) => {
                let (dot, child) = map
                    .get_mut(key)
                    .ok_or_else(|| DbError::PathNotFound(pointer_string(&pointer[..=depth])))?;
                remote.push(RemoteUid::Object {
                    key: key.clone(),
                    dot,
                });
                child
            }
            (JsonValue::Array(list), PathSegment::Index(index)) => {
                let length = list.len();
                let (uid, child) = list
                    .get_mut(*index)
                    .ok_or(DbError::IndexOutOfBounds {
                        index: *index,
                        length,
                    })?;
                remote.push(RemoteUid::Array(uid.clone()));
                child
            }
            (other, segment) => return Err(segment_error(other, segment)),
        };
    }
    Ok((value, remote))
}

/// Walk a remote pointer, collecting the local pointer to the same value.
fn resolve_remote<'a>(
    value: &'a mut JsonValue,
    pointer: &[RemoteUid],
) -> Option<(&'a mut JsonValue, Vec<PathSegment>)> {
    let mut value = value;
    let mut local = Vec::with_capacity(pointer.len());
    for uid in pointer {
        value = match (value, uid) {
            (JsonValue::Object(map), RemoteUid::Object { key, dot }) => {
                let child = map.get_element_mut(key, dot)?;
                local.push(PathSegment::Key(key.clone()));
                child
            }
            (JsonValue::Array(list), RemoteUid::Array(uid)) => {
                let index = list.index_of(uid).ok()?;
                local.push(PathSegment::Index(index));
                list.get_mut(index)?.1
            }
            _ => return None,
        };
    }
    Some((value, local))
}

fn apply_inner(
    target: &mut JsonValue,
    mut pointer: Vec<PathSegment>,
    inner: &InnerOp,
) -> Option<LocalOp> {
    match (target, inner) {
        (JsonValue::Object(map), InnerOp::Object(op)) => {
            let change = map.execute_op(op)?;
            pointer.push(PathSegment::Key(change.key));
            Some(match change.value {
                Some(value) => LocalOp::Insert {
                    pointer,
                    value: value.to_json(),
                },
                None => LocalOp::Remove { pointer },
            })
        }
        (JsonValue::Array(list), InnerOp::Array(op)) => match list.execute_op(op)? {
            ListChange::Insert { index, value } => {
                pointer.push(PathSegment::Index(index));
                Some(LocalOp::Insert {
                    pointer,
                    value: value.to_json(),
                })
            }
            ListChange::Remove { index } => {
                pointer.push(PathSegment::Index(index));
                Some(LocalOp::Remove { pointer })
            }
        },
        (JsonValue::String(state), InnerOp::String(op)) => {
            let changes = state.execute_op(op);
            if changes.is_empty() {
                return None;
            }
            Some(LocalOp::ReplaceText { pointer, changes })
        }
        (target, _) => {
            debug!(found = target.kind(), "json op does not match the addressed value");
            None
        }
    }
}

impl Replica for Json {
    type Op = JsonOp;
    type Change = Option<LocalOp>;

    fn site_id(&self) -> SiteId {
        self.site_id
    }

    fn summary(&self) -> &Summary {
        &self.summary
    }

    fn replicate(&self, site_id: SiteId) -> Self {
        check_site_id(site_id);
        let mut root = self.root.clone();
        root.clear_pending_edits();
        Self {
            site_id,
            root,
            summary: self.summary.clone(),
        }
    }

    /// Ops must arrive in causal order. An op whose dot was already
    /// observed is dropped; one whose target no longer exists is consumed
    /// without effect.
    fn execute_op(&mut self, op: &JsonOp) -> Option<LocalOp> {
        let dots = op.inserted_dots();
        if let Some(dot) = dots.iter().find(|dot| self.summary.contains(dot)) {
            debug!(dot = %dot, "ignoring already observed json op");
            return None;
        }
        for dot in &dots {
            self.summary.insert(dot);
        }

        let Some((target, pointer)) = resolve_remote(&mut self.root, &op.pointer) else {
            debug!(
                depth = op.pointer.len(),
                "json op addresses a value that no longer exists"
            );
            return None;
        };
        apply_inner(target, pointer, &op.inner)
    }
}

/// Documents are equal when their trees and summaries are.
impl PartialEq for Json {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.summary == other.summary
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
