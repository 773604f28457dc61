//! Incremental construction of JSON documents.
//!
//! The builder writes the whole document as one mutation of its site, like
//! [`Json::parse`], without going through JSON text. Calls chain; the first
//! misuse is remembered and reported by [`Builder::build`].
//!
//! ```rust,ignore
//! let doc = Builder::new(1)
//!     .start_object()
//!     .string_field("title", "Notes")
//!     .int_array("sizes", &[1, 2, 3])
//!     .start_array_field("tags")
//!     .add_string("draft")
//!     .end_array()
//!     .end_object()
//!     .build()?;
//! ```

use crate::error::{DbError, Result};
use crate::json::{Json, JsonValue};
use crate::text::TextState;
use ocs_core::{check_site_id, Dot, ListState, MapState, SiteId, Summary};

/// A container still being filled, and the field it goes under.
struct Frame {
    value: JsonValue,
    field: Option<String>,
}

pub struct Builder {
    site_id: SiteId,
    summary: Summary,
    dot: Dot,
    root: Option<JsonValue>,
    stack: Vec<Frame>,
    error: Option<DbError>,
}

impl Builder {
    /// Panics if `site_id` is zero.
    pub fn new(site_id: SiteId) -> Self {
        check_site_id(site_id);
        let mut summary = Summary::new();
        let dot = summary.dot(site_id);
        Self {
            site_id,
            summary,
            dot,
            root: None,
            stack: Vec::new(),
            error: None,
        }
    }

    pub fn start_object(self) -> Self {
        self.open(JsonValue::Object(MapState::new()), None)
    }

    pub fn end_object(self) -> Self {
        self.close("object")
    }

    pub fn start_array(self) -> Self {
        self.open(JsonValue::Array(ListState::new()), None)
    }

    pub fn end_array(self) -> Self {
        self.close("array")
    }

    /// Open an object stored under `name` in the current object.
    pub fn start_object_field(self, name: &str) -> Self {
        self.open(JsonValue::Object(MapState::new()), Some(name.to_string()))
    }

    /// Open an array stored under `name` in the current object.
    pub fn start_array_field(self, name: &str) -> Self {
        self.open(JsonValue::Array(ListState::new()), Some(name.to_string()))
    }

    /// Set `name` in the current object to a plain JSON value.
    pub fn field(mut self, name: &str, value: &serde_json::Value) -> Self {
        let value = JsonValue::from_json(value, self.dot);
        self.put_field(name, value);
        self
    }

    pub fn null_field(mut self, name: &str) -> Self {
        self.put_field(name, JsonValue::Null);
        self
    }

    pub fn string_field(mut self, name: &str, value: &str) -> Self {
        let value = self.string_value(value);
        self.put_field(name, value);
        self
    }

    pub fn bool_field(mut self, name: &str, value: bool) -> Self {
        self.put_field(name, JsonValue::Bool(value));
        self
    }

    pub fn int_field(mut self, name: &str, value: i64) -> Self {
        self.put_field(name, JsonValue::Int(value));
        self
    }

    pub fn uint_field(mut self, name: &str, value: u64) -> Self {
        self.put_field(name, JsonValue::Uint(value));
        self
    }

    pub fn float_field(mut self, name: &str, value: f64) -> Self {
        self.put_field(name, JsonValue::Float(value));
        self
    }

    pub fn string_array(mut self, name: &str, values: &[&str]) -> Self {
        let values = values.iter().map(|v| self.string_value(v)).collect();
        let array = self.array_value(values);
        self.put_field(name, array);
        self
    }

    pub fn bool_array(mut self, name: &str, values: &[bool]) -> Self {
        let array = self.array_value(values.iter().copied().map(JsonValue::Bool).collect());
        self.put_field(name, array);
        self
    }

    pub fn int_array(mut self, name: &str, values: &[i64]) -> Self {
        let array = self.array_value(values.iter().copied().map(JsonValue::Int).collect());
        self.put_field(name, array);
        self
    }

    pub fn float_array(mut self, name: &str, values: &[f64]) -> Self {
        let array = self.array_value(values.iter().copied().map(JsonValue::Float).collect());
        self.put_field(name, array);
        self
    }

    /// Append a plain JSON value to the current array, or make it the root.
    pub fn add(mut self, value: &serde_json::Value) -> Self {
        let value = JsonValue::from_json(value, self.dot);
        self.put_element(value);
        self
    }

    pub fn add_null(mut self) -> Self {
        self.put_element(JsonValue::Null);
        self
    }

    pub fn add_string(mut self, value: &str) -> Self {
        let value = self.string_value(value);
        self.put_element(value);
        self
    }

    pub fn add_bool(mut self, value: bool) -> Self {
        self.put_element(JsonValue::Bool(value));
        self
    }

    pub fn add_int(mut self, value: i64) -> Self {
        self.put_element(JsonValue::Int(value));
        self
    }

    pub fn add_uint(mut self, value: u64) -> Self {
        self.put_element(JsonValue::Uint(value));
        self
    }

    pub fn add_float(mut self, value: f64) -> Self {
        self.put_element(JsonValue::Float(value));
        self
    }

    pub fn add_string_array(mut self, values: &[&str]) -> Self {
        let values = values.iter().map(|v| self.string_value(v)).collect();
        let array = self.array_value(values);
        self.put_element(array);
        self
    }

    pub fn add_int_array(mut self, values: &[i64]) -> Self {
        let array = self.array_value(values.iter().copied().map(JsonValue::Int).collect());
        self.put_element(array);
        self
    }

    pub fn add_float_array(mut self, values: &[f64]) -> Self {
        let array = self.array_value(values.iter().copied().map(JsonValue::Float).collect());
        self.put_element(array);
        self
    }

    pub fn add_bool_array(mut self, values: &[bool]) -> Self {
        let array = self.array_value(values.iter().copied().map(JsonValue::Bool).collect());
        self.put_element(array);
        self
    }

    /// Finish the document.
    pub fn build(self) -> Result<Json> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.stack.is_empty() {
            return Err(DbError::UnclosedContainers(self.stack.len()));
        }
        let root = self.root.ok_or(DbError::EmptyBuilder)?;
        Ok(Json::from_parts(self.site_id, root, self.summary))
    }

    fn string_value(&self, value: &str) -> JsonValue {
        JsonValue::String(TextState::from_text(value, self.dot).0)
    }

    fn array_value(&self, values: Vec<JsonValue>) -> JsonValue {
        let mut list = ListState::new();
        for value in values {
            list.push(value, self.dot);
        }
        JsonValue::Array(list)
    }

    fn open(mut self, value: JsonValue, field: Option<String>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let parent_ok = match (&field, self.stack.last()) {
            (Some(_), Some(Frame { value: JsonValue::Object(_), .. })) => true,
            (None, Some(Frame { value: JsonValue::Array(_), .. })) => true,
            (None, None) => self.root.is_none(),
            _ => false,
        };
        if !parent_ok {
            let expected = if field.is_some() { "object" } else { "array" };
            self.fail(expected);
            return self;
        }
        self.stack.push(Frame { value, field });
        self
    }

    fn close(mut self, kind: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.stack.pop() {
            Some(frame) if frame.value.kind() == kind => match frame.field {
                Some(name) => self.put_field(&name, frame.value),
                None => self.put_element(frame.value),
            },
            Some(frame) => {
                self.error = Some(DbError::TypeMismatch {
                    expected: kind.to_string(),
                    found: frame.value.kind().to_string(),
                });
            }
            None => self.fail(kind),
        }
        self
    }

    fn put_field(&mut self, name: &str, value: JsonValue) {
        if self.error.is_some() {
            return;
        }
        let dot = self.dot;
        match self.stack.last_mut() {
            Some(Frame {
                value: JsonValue::Object(map),
                ..
            }) => {
                map.insert(name.to_string(), value, dot);
            }
            _ => self.fail("object"),
        }
    }

    fn put_element(&mut self, value: JsonValue) {
        if self.error.is_some() {
            return;
        }
        let dot = self.dot;
        match self.stack.last_mut() {
            Some(Frame {
                value: JsonValue::Array(list),
                ..
            }) => {
                list.push(value, dot);
            }
            None if self.root.is_none() => self.root = Some(value),
            _ => self.fail("array"),
        }
    }

    /// Record that the current container is not of the `expected` kind.
    fn fail(&mut self, expected: &str) {
        let found = match self.stack.last() {
            Some(frame) => frame.value.kind(),
            None if self.root.is_some() => "finished document",
            None => "nothing",
        };
        self.error = Some(DbError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
}
