//! # ocs-db
//!
//! Document layer for the Chalcedony CRDT library.
//!
//! This crate provides:
//! - Collaborative text built from UID-ordered fragments, with compact
//!   change notifications
//! - JSON documents whose objects, arrays and strings are CRDTs sharing
//!   one causal summary
//! - A builder for constructing documents without JSON text
//!
//! ## Example
//!
//! ```rust
//! use ocs_core::Replica;
//! use ocs_db::{Json, PathSegment};
//! use serde_json::json;
//!
//! let mut a = Json::parse(1, r#"{"title": "Notes", "tags": []}"#).unwrap();
//! let mut b = a.replicate(2);
//!
//! let tags: Vec<PathSegment> = vec!["tags".into(), 0.into()];
//! let op1 = a.insert(&tags, &json!("draft")).unwrap();
//! let op2 = b
//!     .replace_text(&["title".into()], 5, 0, " 2")
//!     .unwrap()
//!     .unwrap();
//!
//! b.execute_op(&op1);
//! a.execute_op(&op2);
//! assert_eq!(a.to_json(), json!({"title": "Notes 2", "tags": ["draft"]}));
//! assert_eq!(a, b);
//! ```

pub mod builder;
pub mod edit;
pub mod error;
pub mod fragment;
pub mod json;
pub mod text;

pub use builder::Builder;
pub use edit::{push_edit, Edit, OVERWRITE_LIMIT};
pub use error::{DbError, Result};
pub use fragment::FragmentTree;
pub use json::{InnerOp, Json, JsonOp, JsonValue, LocalOp, PathSegment, RemoteUid};
pub use text::{Text, TextElement, TextOp, TextState};
