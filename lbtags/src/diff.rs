//! Membership diffing.

use crate::model::MembershipSet;

/// Changes needed to turn `current` into `desired`.
///
/// The two sets are disjoint and `desired == (current - to_remove) + to_add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: MembershipSet,
    pub to_remove: MembershipSet,
}

impl MembershipDiff {
    /// Diff one snapshot pair.
    pub fn compute(desired: &MembershipSet, current: &MembershipSet) -> Self {
        Self {
            to_add: desired.difference(current),
            to_remove: current.difference(desired),
        }
    }

    /// No mutation is needed.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}
