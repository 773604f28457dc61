//! Error types for the causal core.

use crate::dot::{Dot, SiteId};
use thiserror::Error;

/// Errors raised while decoding variable-length quantities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VlqError {
    #[error("VLQ: no terminating byte")]
    NoTerminatingByte,

    #[error("VLQ: value does not fit in {0} bits")]
    Overflow(u32),
}

/// Errors that can occur in core CRDT operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    #[error(transparent)]
    Vlq(#[from] VlqError),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid UID position of {0} bits")]
    InvalidPosition(usize),

    #[error("Trailing bytes after UID: {0}")]
    TrailingBytes(usize),

    #[error("Invalid site id: {0}")]
    InvalidSiteId(SiteId),

    #[error("Invalid op: dot {claimed} was not minted by site {actual}")]
    InvalidOp { claimed: Dot, actual: SiteId },
}

pub type Result<T> = std::result::Result<T, CrdtError>;
