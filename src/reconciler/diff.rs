//! Desired-vs-actual stream diff

use std::collections::BTreeSet;

/// Remote changes for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub flush: bool,
    pub to_add: BTreeSet<u32>,
    pub to_remove: BTreeSet<u32>,
}

impl ReconcilePlan {
    /// `desired` = allocated slot ids, `actual` = ids listed by the relay,
    /// `stale` = desired ids whose earlier flush destroy failed.
    ///
    /// A flush removes every listed stream and re-creates the whole desired set.
    /// Otherwise only stale ids still listed are removed and re-created.
    pub fn compute(
        desired: &BTreeSet<u32>,
        actual: &BTreeSet<u32>,
        flush: bool,
        stale: &BTreeSet<u32>,
    ) -> Self {
        if flush {
            return Self {
                flush,
                to_add: desired.clone(),
                to_remove: actual.clone(),
            };
        }

        let mut plan = Self {
            flush,
            to_add: desired.difference(actual).copied().collect(),
            to_remove: actual.difference(desired).copied().collect(),
        };
        for id in stale.iter().filter(|id| desired.contains(id) && actual.contains(id)) {
            plan.to_remove.insert(*id);
            plan.to_add.insert(*id);
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// The relay lost every stream we had confirmed: it restarted under us
pub fn relay_was_reset(confirmed: &BTreeSet<u32>, actual: &BTreeSet<u32>) -> bool {
    !confirmed.is_empty() && confirmed.is_disjoint(actual)
}
