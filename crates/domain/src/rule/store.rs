//! Authoritative rule set, indexed by id with a priority-sorted view.
//!
//! The store is a value type: the concurrent facade clones it, mutates the
//! clone, and publishes the result. Rule records are `Arc`-shared between
//! clones, so the per-rule atomic counters keep working across publishes
//! and counter operations only need `&self`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::common::entity::RuleId;

use super::conflict::{ConflictPolicy, ConflictVerdict};
use super::entity::{Rule, RuleCounters};
use super::error::RuleError;

#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: HashMap<u32, Arc<Rule>>,
    /// Priority-sorted view, rebuilt on any membership or priority change
    /// and handed out as an immutable snapshot.
    by_priority: Arc<[Arc<Rule>]>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Insert a new rule. Validates, rejects duplicate ids, and consults
    /// the conflict policy before mutating.
    pub fn add(&mut self, rule: Rule, policy: &dyn ConflictPolicy) -> Result<Arc<Rule>, RuleError> {
        rule.validate()?;
        if self.rules.contains_key(&rule.id.0) {
            return Err(RuleError::DuplicateRule { id: rule.id });
        }
        if let ConflictVerdict::Conflict { other } =
            policy.check(&rule, &mut self.rules.values().map(Arc::as_ref))
        {
            return Err(RuleError::Conflict { id: rule.id, other });
        }

        let record = Arc::new(rule);
        self.rules.insert(record.id.0, Arc::clone(&record));
        self.rebuild_priority_view();
        Ok(record)
    }

    /// Remove a rule, returning the retired record.
    pub fn delete(&mut self, id: RuleId) -> Result<Arc<Rule>, RuleError> {
        let record = self
            .rules
            .remove(&id.0)
            .ok_or(RuleError::RuleNotFound { id })?;
        self.rebuild_priority_view();
        Ok(record)
    }

    /// Replace every mutable field of the rule except `id`. The stats
    /// cells carry over so `match_count` survives a modify. Returns
    /// `(old, new)` records.
    pub fn modify(
        &mut self,
        id: RuleId,
        mut body: Rule,
        policy: &dyn ConflictPolicy,
    ) -> Result<(Arc<Rule>, Arc<Rule>), RuleError> {
        body.validate()?;
        let old = Arc::clone(self.rules.get(&id.0).ok_or(RuleError::RuleNotFound { id })?);

        body.id = id;
        body.stats = Arc::clone(&old.stats);
        if let ConflictVerdict::Conflict { other } = policy.check(
            &body,
            &mut self
                .rules
                .values()
                .filter(|r| r.id != id)
                .map(Arc::as_ref),
        ) {
            return Err(RuleError::Conflict { id, other });
        }

        let record = Arc::new(body);
        self.rules.insert(id.0, Arc::clone(&record));
        self.rebuild_priority_view();
        Ok((old, record))
    }

    /// Re-insert a previously retired record verbatim. Used by the facade
    /// when rolling a failed modify back.
    pub fn restore(&mut self, record: Arc<Rule>) {
        self.rules.insert(record.id.0, record);
        self.rebuild_priority_view();
    }

    pub fn get(&self, id: RuleId) -> Option<&Arc<Rule>> {
        self.rules.get(&id.0)
    }

    /// Stable ordered view: priority descending, id ascending. The
    /// returned snapshot stays valid for as long as the caller holds it,
    /// regardless of later store mutation.
    pub fn snapshot_by_priority(&self) -> Arc<[Arc<Rule>]> {
        Arc::clone(&self.by_priority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    // ── Statistics ─────────────────────────────────────────────────

    /// Count a match on the hot path. Atomic, never takes the write path.
    pub fn bump_counter(&self, id: RuleId, timestamp: u64) -> bool {
        match self.rules.get(&id.0) {
            Some(rule) => {
                rule.stats.record(timestamp);
                true
            }
            None => false,
        }
    }

    pub fn counters(&self, id: RuleId) -> Option<RuleCounters> {
        self.rules.get(&id.0).map(|r| r.stats.snapshot())
    }

    pub fn counters_all(&self) -> HashMap<RuleId, RuleCounters> {
        self.rules
            .values()
            .map(|r| (r.id, r.stats.snapshot()))
            .collect()
    }

    pub fn reset_counter(&self, id: RuleId) -> Result<(), RuleError> {
        let rule = self.rules.get(&id.0).ok_or(RuleError::RuleNotFound { id })?;
        rule.stats.reset();
        Ok(())
    }

    pub fn reset_all_counters(&self) {
        for rule in self.rules.values() {
            rule.stats.reset();
        }
    }

    // ── Private helpers ────────────────────────────────────────────

    fn rebuild_priority_view(&mut self) {
        let mut view: Vec<Arc<Rule>> = self.rules.values().cloned().collect();
        view.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        self.by_priority = view.into();
    }
}
