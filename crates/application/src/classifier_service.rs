//! Public classifier facade.
//!
//! Single-writer, many-reader: control-plane calls serialize through a
//! mutex, build the next world on a private clone, and publish it with an
//! atomic pointer swap. The data plane loads the current world without
//! locking; a load guard keeps that world alive until the reader is done,
//! so retired rule records and index nodes are reclaimed only after the
//! last reader holding them quiesces. Per-rule counters are atomics on
//! records shared across publishes, so a bump is never lost to a swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use domain::common::entity::RuleId;
use domain::common::error::ClassifierError;
use domain::prefilter::bloom::BloomFilter;
use domain::prefilter::signature;
use domain::rule::conflict::{ConflictPolicy, NoConflictPolicy};
use domain::rule::entity::{ClassificationResult, PacketHeader, Rule, RuleCounters};
use ports::secondary::log_sink::{LogLevel, LogSink, NoopSink};

use crate::state::ClassifierState;

/// Construction-time options (mirrors the infrastructure config).
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Run the negative prefilter in front of every lookup.
    pub enable_prefilter: bool,
    /// Expected live rule count; sizes the prefilter bit array.
    pub expected_rule_count: u32,
    /// Prefilter false-positive target; a measured rate above twice this
    /// schedules a rebuild.
    pub target_false_positive: f64,
    /// Hard cap on live rules; writes past it fail, readers are unaffected.
    pub max_rules: usize,
    /// Rule removals tolerated before the prefilter is rebuilt.
    pub prefilter_rebuild_removals: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            enable_prefilter: true,
            expected_rule_count: 4096,
            target_false_positive: 0.01,
            max_rules: 4096,
            prefilter_rebuild_removals: 256,
        }
    }
}

#[derive(Debug, Default)]
struct WriterState {
    removed_since_rebuild: u32,
}

pub struct PacketClassifier {
    state: ArcSwap<ClassifierState>,
    prefilter: Option<ArcSwap<BloomFilter>>,
    /// Serializes the control plane. Readers never touch it.
    writer: Mutex<WriterState>,
    policy: Arc<dyn ConflictPolicy>,
    sink: Arc<dyn LogSink>,
    settings: ClassifierSettings,
    /// Published write sequence number.
    epoch: AtomicU64,
    started: Instant,
}

impl PacketClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        let prefilter = settings.enable_prefilter.then(|| {
            ArcSwap::from_pointee(BloomFilter::with_rate(
                settings.expected_rule_count,
                settings.target_false_positive,
            ))
        });
        let classifier = Self {
            state: ArcSwap::from_pointee(ClassifierState::new(settings.max_rules)),
            prefilter,
            writer: Mutex::new(WriterState::default()),
            policy: Arc::new(NoConflictPolicy),
            sink: Arc::new(NoopSink),
            settings,
            epoch: AtomicU64::new(0),
            started: Instant::now(),
        };
        classifier.sink.log(LogLevel::Info, "classifier initialized");
        classifier
    }

    /// Inject the log sink the core emits through.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self.sink.log(LogLevel::Info, "classifier initialized");
        self
    }

    /// Swap the conflict-detection hook.
    pub fn with_conflict_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Number of publishes so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn rule_count(&self) -> usize {
        self.state.load().store.len()
    }

    /// The current priority-ordered rule snapshot. Stable for as long as
    /// the caller holds it, independent of concurrent writes.
    pub fn snapshot_by_priority(&self) -> Arc<[Arc<Rule>]> {
        self.state.load().store.snapshot_by_priority()
    }

    pub fn get_rule(&self, id: RuleId) -> Option<Arc<Rule>> {
        self.state.load().store.get(id).cloned()
    }

    // ── Control plane ──────────────────────────────────────────────

    pub fn add_rule(&self, rule: Rule) -> Result<(), ClassifierError> {
        // Validation is pure and runs outside the writer lock.
        rule.validate().map_err(ClassifierError::from)?;
        let id = rule.id;

        let mut writer = self.writer.lock();
        let mut next = ClassifierState::clone(&self.state.load());
        let record = next.apply_add(rule, self.policy.as_ref())?;

        // Prefilter bits go in before the rule becomes visible, so no
        // reader can see the rule while its signatures read as absent.
        if let Some(prefilter) = &self.prefilter {
            let filter = prefilter.load();
            for sig in signature::of_filter(&record.filter) {
                filter.insert(sig.as_bytes());
            }
            if filter.is_saturated() {
                self.sink.log(
                    LogLevel::Warn,
                    "prefilter saturated, rebuilding with doubled bit array",
                );
                self.rebuild_prefilter(&next, true);
                writer.removed_since_rebuild = 0;
            }
        }

        self.publish(next);
        self.sink
            .log(LogLevel::Debug, &format!("rule {id} added"));
        Ok(())
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<(), ClassifierError> {
        let mut writer = self.writer.lock();
        let mut next = ClassifierState::clone(&self.state.load());
        next.apply_delete(id)?;
        self.publish(next);

        // The prefilter cannot forget; count removals toward a rebuild.
        if let Some(prefilter) = &self.prefilter {
            writer.removed_since_rebuild += 1;
            let stale = writer.removed_since_rebuild >= self.settings.prefilter_rebuild_removals;
            let filter = prefilter.load();
            let degraded =
                filter.estimated_fp_rate() > 2.0 * self.settings.target_false_positive;
            if stale || degraded {
                self.sink.log(
                    LogLevel::Info,
                    &format!(
                        "rebuilding prefilter (removals={}, fp_estimate={:.4})",
                        writer.removed_since_rebuild,
                        filter.estimated_fp_rate(),
                    ),
                );
                drop(filter);
                self.rebuild_prefilter(&self.state.load(), false);
                writer.removed_since_rebuild = 0;
            }
        }

        self.sink
            .log(LogLevel::Debug, &format!("rule {id} deleted"));
        Ok(())
    }

    pub fn modify_rule(&self, id: RuleId, body: Rule) -> Result<(), ClassifierError> {
        body.validate().map_err(ClassifierError::from)?;

        let mut writer = self.writer.lock();
        let mut next = ClassifierState::clone(&self.state.load());
        match next.apply_modify(id, body, self.policy.as_ref()) {
            Ok(record) => {
                if let Some(prefilter) = &self.prefilter {
                    let filter = prefilter.load();
                    for sig in signature::of_filter(&record.filter) {
                        filter.insert(sig.as_bytes());
                    }
                }
                self.publish(next);
                self.sink
                    .log(LogLevel::Debug, &format!("rule {id} modified"));
                Ok(())
            }
            Err(e @ ClassifierError::InternalInconsistency(_)) => {
                // Rollback failed: publish the state with the rule
                // force-disabled and surface the condition.
                self.publish(next);
                self.sink.log(
                    LogLevel::Error,
                    &format!("rule {id} disabled after failed modify rollback"),
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ── Data plane ─────────────────────────────────────────────────

    pub fn classify(&self, header: &PacketHeader) -> ClassificationResult {
        if let Some(prefilter) = &self.prefilter
            && !prefilter
                .load()
                .possibly_contains(signature::of_header(header).as_bytes())
        {
            // Definitely no rule covers this signature.
            return ClassificationResult::no_match();
        }

        let state = self.state.load();
        state.classify_in(header, self.now())
    }

    /// Equivalent to per-packet `classify`, but the whole batch runs
    /// against one snapshot.
    pub fn classify_batch(&self, headers: &[PacketHeader]) -> Vec<ClassificationResult> {
        let prefilter = self.prefilter.as_ref().map(|p| p.load());
        let state = self.state.load();
        let now = self.now();
        headers
            .iter()
            .map(|header| {
                if let Some(filter) = &prefilter
                    && !filter.possibly_contains(signature::of_header(header).as_bytes())
                {
                    return ClassificationResult::no_match();
                }
                state.classify_in(header, now)
            })
            .collect()
    }

    // ── Statistics ─────────────────────────────────────────────────

    pub fn stats_all(&self) -> HashMap<RuleId, RuleCounters> {
        self.state.load().counters_all()
    }

    pub fn stats(&self, id: RuleId) -> Option<RuleCounters> {
        self.state.load().store.counters(id)
    }

    pub fn reset_stats(&self) {
        let _writer = self.writer.lock();
        self.state.load().store.reset_all_counters();
    }

    pub fn reset_stats_for(&self, id: RuleId) -> Result<(), ClassifierError> {
        let _writer = self.writer.lock();
        self.state
            .load()
            .store
            .reset_counter(id)
            .map_err(ClassifierError::from)
    }

    // ── Private helpers ────────────────────────────────────────────

    fn publish(&self, next: ClassifierState) {
        self.state.store(Arc::new(next));
        self.epoch.fetch_add(1, Ordering::Release);
    }

    /// Re-derive the prefilter from the live rule set and publish it
    /// whole. `grow` doubles the bit array (saturation recovery).
    fn rebuild_prefilter(&self, state: &ClassifierState, grow: bool) {
        let Some(prefilter) = &self.prefilter else {
            return;
        };
        let current = prefilter.load();
        let fresh = if grow || current.is_saturated() {
            current.grown()
        } else {
            current.fresh_like()
        };
        for rule in state.store.iter() {
            for sig in signature::of_filter(&rule.filter) {
                fresh.insert(sig.as_bytes());
            }
        }
        prefilter.store(Arc::new(fresh));
    }

    fn now(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

impl Default for PacketClassifier {
    fn default() -> Self {
        Self::new(ClassifierSettings::default())
    }
}
