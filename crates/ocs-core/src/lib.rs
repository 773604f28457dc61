//! # ocs-core
//!
//! Causal primitives and operation-based CRDTs for the Chalcedony CRDT library.
//!
//! This crate provides:
//! - `Dot` / `Summary` causal context used to mint and deduplicate operations
//! - `Uid` dense ordering identifiers (fractional indexing) with a VLQ wire form
//! - `List`, `ORMap`, `ORSet` and `Register` replicas
//!
//! Every replica mutates locally and returns a self-describing operation.
//! Applying the same set of operations on another replica, in any order the
//! per-site causal delivery allows, converges both to the same state.
//!
//! ## Example
//!
//! ```rust
//! use ocs_core::list::List;
//! use ocs_core::replica::Replica;
//!
//! let mut a: List<&str> = List::new(1);
//! let mut b = a.replicate(2);
//!
//! let op1 = a.push("x");
//! let op2 = b.push("y");
//! b.execute_op(&op1);
//! a.execute_op(&op2);
//!
//! assert_eq!(a.values().collect::<Vec<_>>(), b.values().collect::<Vec<_>>());
//! ```

pub mod dot;
pub mod error;
pub mod list;
pub mod ormap;
pub mod orset;
pub mod register;
pub mod replica;
pub mod uid;
pub mod vlq;

pub use dot::{check_site_id, Counter, Dot, SiteId, Summary};
pub use error::{CrdtError, Result, VlqError};
pub use list::{List, ListChange, ListElement, ListOp, ListState};
pub use ormap::{MapChange, MapElement, MapOp, MapState, ORMap};
pub use orset::{ORSet, SetChange, SetOp, SetOpKind};
pub use register::{Register, RegisterOp};
pub use replica::{CausalOp, Replica};
pub use uid::{Position, Uid};
