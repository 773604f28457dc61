//! Dots and causal summaries.
//!
//! A `Dot` names exactly one local mutation: the site that made it and that
//! site's sequence number at the time. A `Summary` records, per site, the
//! highest counter a replica has observed (a version vector) together with
//! the dots below it that have not arrived yet. Replicas mint fresh dots
//! from their own summary and use it to recognise operations they have
//! already applied, whatever order those operations arrived in.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a replica. Zero is reserved as "unset".
pub type SiteId = u32;

/// Per-site monotonically increasing sequence number.
pub type Counter = u32;

/// A unique identifier for a single mutation.
///
/// Ordered by site, then by counter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Dot {
    pub site: SiteId,
    pub counter: Counter,
}

impl Dot {
    pub fn new(site: SiteId, counter: Counter) -> Self {
        Self { site, counter }
    }
}

impl std::fmt::Display for Dot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.site, self.counter)
    }
}

/// Panics if `site` is the reserved zero id.
///
/// Every constructor and `replicate` call goes through this check.
pub fn check_site_id(site: SiteId) {
    assert!(site != 0, "Invalid site id: {}", site);
}

/// Returns true if `dot` is one of `dots`.
pub fn dots_contain(dots: &[Dot], dot: &Dot) -> bool {
    dots.iter().any(|d| d == dot)
}

/// Causal context: the highest counter observed for each site.
///
/// Counters never decrease. A dot that arrives ahead of earlier dots from
/// the same site leaves those earlier dots recorded as missing until they
/// show up, so `contains` is exact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    counters: BTreeMap<SiteId, Counter>,
    /// Dots at or below their site's counter that were never observed.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    missing: BTreeSet<Dot>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest counter seen for `site`, or 0 for unknown sites.
    pub fn counter(&self, site: SiteId) -> Counter {
        self.counters.get(&site).copied().unwrap_or(0)
    }

    /// Bump the counter of `site` and return the new value.
    pub fn increment(&mut self, site: SiteId) -> Counter {
        let counter = self.counters.entry(site).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Mint a fresh dot for a local mutation made by `site`.
    pub fn dot(&mut self, site: SiteId) -> Dot {
        let counter = self.increment(site);
        Dot::new(site, counter)
    }

    /// The dot `dot(site)` would mint next, without minting it.
    pub fn next_dot(&self, site: SiteId) -> Dot {
        Dot::new(site, self.counter(site) + 1)
    }

    /// Whether the mutation named by `dot` is already known.
    pub fn contains(&self, dot: &Dot) -> bool {
        self.counters
            .get(&dot.site)
            .is_some_and(|&counter| counter >= dot.counter)
            && !self.missing.contains(dot)
    }

    /// Record `dot` as observed.
    ///
    /// Skipping ahead of the stored counter marks the skipped dots missing.
    pub fn insert(&mut self, dot: &Dot) {
        let counter = self.counters.entry(dot.site).or_insert(0);
        if *counter < dot.counter {
            self.missing
                .extend((*counter + 1..dot.counter).map(|c| Dot::new(dot.site, c)));
            *counter = dot.counter;
        } else {
            self.missing.remove(dot);
        }
    }

    /// Whether every dot up to each site's counter has been observed.
    pub fn is_contiguous(&self) -> bool {
        self.missing.is_empty()
    }

    /// Iterate over `(site, counter)` pairs in site order.
    pub fn iter(&self) -> impl Iterator<Item = (SiteId, Counter)> + '_ {
        self.counters.iter().map(|(&site, &counter)| (site, counter))
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
