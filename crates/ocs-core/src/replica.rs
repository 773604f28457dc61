//! Traits shared by every operation-based replica.
//!
//! A replica mutates locally through type-specific methods that each return
//! an operation. Shipping that operation to other replicas and handing it to
//! `execute_op` makes them converge:
//!  - Applying an op a second time is a no-op
//!  - Ops from different sites commute
//!
//! Ops carry everything needed to apply them, so no side channel is required.

use crate::dot::{Dot, SiteId, Summary};
use crate::error::{CrdtError, Result};

/// An op-based CRDT replica owned by a single site.
pub trait Replica: Sized {
    /// Operation emitted by local mutations and consumed by `execute_op`.
    type Op: Clone;

    /// Local notification describing what applying an op changed.
    type Change;

    /// The site this replica mints dots for.
    fn site_id(&self) -> SiteId;

    /// Causal context of everything this replica has observed.
    fn summary(&self) -> &Summary;

    /// Copy of the current state owned by another site.
    ///
    /// Panics if `site` is zero.
    fn replicate(&self, site: SiteId) -> Self;

    /// Apply an op produced by any replica of the same object.
    fn execute_op(&mut self, op: &Self::Op) -> Self::Change;
}

/// Authorship information carried by an operation.
pub trait CausalOp {
    /// Dots this op introduces. All of them belong to its author.
    fn inserted_dots(&self) -> Vec<Dot>;

    /// Check that every dot this op introduces was minted by `site`.
    ///
    /// Run before trusting an op that a peer claims to have authored.
    fn validate(&self, site: SiteId) -> Result<()> {
        if site == 0 {
            return Err(CrdtError::InvalidSiteId(site));
        }
        match self.inserted_dots().into_iter().find(|dot| dot.site != site) {
            Some(claimed) => Err(CrdtError::InvalidOp {
                claimed,
                actual: site,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Authored(Vec<Dot>);

    impl CausalOp for Authored {
        fn inserted_dots(&self) -> Vec<Dot> {
            self.0.clone()
        }
    }

    #[test]
    fn test_validate_accepts_own_dots() {
        let op = Authored(vec![Dot::new(3, 1), Dot::new(3, 2)]);
        assert_eq!(op.validate(3), Ok(()));
        assert_eq!(Authored(vec![]).validate(9), Ok(()));
    }

    #[test]
    fn test_validate_rejects_foreign_dots() {
        let op = Authored(vec![Dot::new(3, 1), Dot::new(4, 1)]);
        assert_eq!(
            op.validate(3),
            Err(CrdtError::InvalidOp {
                claimed: Dot::new(4, 1),
                actual: 3
            })
        );
        assert_eq!(op.validate(0), Err(CrdtError::InvalidSiteId(0)));
    }
}
