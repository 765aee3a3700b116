//! Conflict detection hook consulted by the rule store before mutation.
//!
//! The verdict interface lets a deployment swap in a stricter policy
//! without touching the store or facade call sites.

use crate::common::entity::RuleId;

use super::entity::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictVerdict {
    NoConflict,
    /// The candidate clashes with the named live rule.
    Conflict { other: RuleId },
}

pub trait ConflictPolicy: Send + Sync {
    /// Judge `candidate` against the live rule set. On `modify`, the rule
    /// being replaced is excluded from `live` by the caller.
    fn check<'a>(
        &self,
        candidate: &Rule,
        live: &mut dyn Iterator<Item = &'a Rule>,
    ) -> ConflictVerdict;
}

/// Default policy: everything coexists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConflictPolicy;

impl ConflictPolicy for NoConflictPolicy {
    fn check<'a>(
        &self,
        _candidate: &Rule,
        _live: &mut dyn Iterator<Item = &'a Rule>,
    ) -> ConflictVerdict {
        ConflictVerdict::NoConflict
    }
}

/// Stricter policy: rejects a candidate whose filter can match the same
/// packet as a live rule at the same priority, since the id tie-break
/// would silently shadow one of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct EqualPriorityOverlapPolicy;

impl ConflictPolicy for EqualPriorityOverlapPolicy {
    fn check<'a>(
        &self,
        candidate: &Rule,
        live: &mut dyn Iterator<Item = &'a Rule>,
    ) -> ConflictVerdict {
        for rule in live {
            if rule.priority == candidate.priority && rule.filter.overlaps(&candidate.filter) {
                return ConflictVerdict::Conflict { other: rule.id };
            }
        }
        ConflictVerdict::NoConflict
    }
}
