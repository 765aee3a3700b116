//! The immutable classification world.
//!
//! One `ClassifierState` bundles the rule store and all four field
//! indices. The facade never mutates a published state: a writer clones
//! the current state, applies one operation to the clone, and publishes
//! the result atomically. A reader holding the old state therefore sees
//! either none or all of a write, across every structure at once.
//!
//! Every rule projects into all four indices; an unconstrained field
//! projects as its wildcard form (the length-zero prefix, the full port
//! range), so candidate collection is a plain four-way intersection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::common::arena::ArenaError;
use domain::common::entity::RuleId;
use domain::common::error::ClassifierError;
use domain::prefix::trie::PrefixTrie;
use domain::range::tree::IntervalTree;
use domain::rule::conflict::ConflictPolicy;
use domain::rule::entity::{ClassificationResult, PacketHeader, Rule};
use domain::rule::store::RuleStore;

#[derive(Debug, Clone)]
pub(crate) struct ClassifierState {
    pub(crate) store: RuleStore,
    src_trie: PrefixTrie,
    dst_trie: PrefixTrie,
    src_ports: IntervalTree,
    dst_ports: IntervalTree,
    max_rules: usize,
}

impl ClassifierState {
    pub(crate) fn new(max_rules: usize) -> Self {
        let max_rules = max_rules.max(1);
        // Worst case one fork plus one terminator node per prefix, plus
        // the root; one tree node per distinct range.
        let trie_nodes = 2 * max_rules + 1;
        Self {
            store: RuleStore::new(),
            src_trie: PrefixTrie::with_node_capacity(trie_nodes),
            dst_trie: PrefixTrie::with_node_capacity(trie_nodes),
            src_ports: IntervalTree::with_node_capacity(max_rules),
            dst_ports: IntervalTree::with_node_capacity(max_rules),
            max_rules,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_capacities(max_rules: usize, trie_nodes: usize, tree_nodes: usize) -> Self {
        Self {
            store: RuleStore::new(),
            src_trie: PrefixTrie::with_node_capacity(trie_nodes),
            dst_trie: PrefixTrie::with_node_capacity(trie_nodes),
            src_ports: IntervalTree::with_node_capacity(tree_nodes),
            dst_ports: IntervalTree::with_node_capacity(tree_nodes),
            max_rules,
        }
    }

    // ── Write operations (run on a private clone) ──────────────────

    /// Validate, store, then index. Any index failure unwinds the steps
    /// already taken, leaving the state exactly as before.
    pub(crate) fn apply_add(
        &mut self,
        rule: Rule,
        policy: &dyn ConflictPolicy,
    ) -> Result<Arc<Rule>, ClassifierError> {
        if self.store.len() >= self.max_rules {
            return Err(ClassifierError::AllocatorExhausted(format!(
                "rule capacity {} reached",
                self.max_rules
            )));
        }
        let record = self.store.add(rule, policy)?;
        if let Err(e) = self.insert_projections(&record) {
            let id = record.id;
            drop(record);
            self.store
                .delete(id)
                .unwrap_or_else(|_| unreachable!("rule was just added"));
            return Err(e.into());
        }
        Ok(record)
    }

    /// Unindex, then unstore. Returns the retired record.
    pub(crate) fn apply_delete(&mut self, id: RuleId) -> Result<Arc<Rule>, ClassifierError> {
        let record = Arc::clone(
            self.store
                .get(id)
                .ok_or(ClassifierError::NotFound(id))?,
        );
        self.remove_projections(&record);
        self.store
            .delete(id)
            .unwrap_or_else(|_| unreachable!("record was just looked up"));
        Ok(record)
    }

    /// Staged replace: old projections out, store swap, new projections
    /// in. A failure rolls the earlier stages back; if even the rollback
    /// cannot be completed, the rule is force-disabled and the caller
    /// publishes that state together with the inconsistency error.
    pub(crate) fn apply_modify(
        &mut self,
        id: RuleId,
        body: Rule,
        policy: &dyn ConflictPolicy,
    ) -> Result<Arc<Rule>, ClassifierError> {
        body.validate().map_err(ClassifierError::from)?;
        let old = Arc::clone(
            self.store
                .get(id)
                .ok_or(ClassifierError::NotFound(id))?,
        );

        self.remove_projections(&old);

        let (old_record, new_record) = match self.store.modify(id, body, policy) {
            Ok(pair) => pair,
            Err(e) => {
                // Store untouched; bring the old projections back.
                if self.insert_projections(&old).is_err() {
                    self.force_disable(&old);
                    return Err(ClassifierError::InternalInconsistency(id));
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.insert_projections(&new_record) {
            self.store.restore(Arc::clone(&old_record));
            if self.insert_projections(&old_record).is_err() {
                self.force_disable(&old_record);
                return Err(ClassifierError::InternalInconsistency(id));
            }
            return Err(e.into());
        }
        Ok(new_record)
    }

    // ── Read path ──────────────────────────────────────────────────

    /// Lookup over this state: intersect the four index hits, filter by
    /// protocol and enabled, rank survivors, count the winner.
    pub(crate) fn classify_in(&self, header: &PacketHeader, now: u64) -> ClassificationResult {
        let mut candidates: HashSet<RuleId> =
            self.src_trie.covering_ids(header.src_ip).into_iter().collect();
        if candidates.is_empty() {
            return ClassificationResult::no_match();
        }

        let dst: HashSet<RuleId> = self.dst_trie.covering_ids(header.dst_ip).into_iter().collect();
        candidates.retain(|id| dst.contains(id));
        if candidates.is_empty() {
            return ClassificationResult::no_match();
        }

        let sport: HashSet<RuleId> = self.src_ports.stab(header.src_port).into_iter().collect();
        candidates.retain(|id| sport.contains(id));
        if candidates.is_empty() {
            return ClassificationResult::no_match();
        }

        let dport: HashSet<RuleId> = self.dst_ports.stab(header.dst_port).into_iter().collect();
        candidates.retain(|id| dport.contains(id));

        let winner = candidates
            .into_iter()
            .filter_map(|id| self.store.get(id))
            .filter(|rule| rule.enabled && rule.filter.protocol.accepts(header.protocol))
            .max_by_key(|rule| {
                (
                    rule.priority,
                    rule.filter.specificity(),
                    std::cmp::Reverse(rule.id.0),
                )
            });

        match winner {
            Some(rule) => {
                rule.stats.record(now);
                ClassificationResult::matched(rule.id, rule.actions.clone())
            }
            None => ClassificationResult::no_match(),
        }
    }

    // ── Private helpers ────────────────────────────────────────────

    /// Insert the rule's four field projections. All-or-nothing: a
    /// failure removes whatever was already inserted before returning.
    fn insert_projections(&mut self, rule: &Rule) -> Result<(), ArenaError> {
        let id = rule.id;
        let f = &rule.filter;
        let (sp, dp) = (f.src_prefix_or_any(), f.dst_prefix_or_any());
        let (sr, dr) = (f.src_port_or_any(), f.dst_port_or_any());

        self.src_trie.insert(sp, id)?;
        if let Err(e) = self.dst_trie.insert(dp, id) {
            self.src_trie.remove(sp, id);
            return Err(e);
        }
        if let Err(e) = self.src_ports.insert(sr.start, sr.end, id) {
            self.dst_trie.remove(dp, id);
            self.src_trie.remove(sp, id);
            return Err(e);
        }
        if let Err(e) = self.dst_ports.insert(dr.start, dr.end, id) {
            self.src_ports.remove(sr.start, sr.end, id);
            self.dst_trie.remove(dp, id);
            self.src_trie.remove(sp, id);
            return Err(e);
        }
        Ok(())
    }

    fn remove_projections(&mut self, rule: &Rule) {
        let id = rule.id;
        let f = &rule.filter;
        let (sp, dp) = (f.src_prefix_or_any(), f.dst_prefix_or_any());
        let (sr, dr) = (f.src_port_or_any(), f.dst_port_or_any());
        self.src_trie.remove(sp, id);
        self.dst_trie.remove(dp, id);
        self.src_ports.remove(sr.start, sr.end, id);
        self.dst_ports.remove(dr.start, dr.end, id);
    }

    /// Last-resort consistency measure: keep the rule in the store so its
    /// id stays resolvable, but disabled so it can never match.
    fn force_disable(&mut self, record: &Arc<Rule>) {
        let mut disabled = Rule::clone(record);
        disabled.enabled = false;
        self.store.restore(Arc::new(disabled));
    }

    pub(crate) fn counters_all(&self) -> HashMap<RuleId, domain::rule::entity::RuleCounters> {
        self.store.counters_all()
    }
}
