use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::common::entity::{Protocol, RuleId};

use super::error::RuleError;

// ── IPv4 prefix ─────────────────────────────────────────────────────

/// IPv4 address prefix: the top `len` bits of `addr` are significant.
///
/// A stored prefix is always normalized: bits beyond `len` are zero.
/// `len == 0` is the default route and covers every address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpPrefix {
    /// Host-byte-order address with only the prefix bits set.
    pub addr: u32,
    /// Significant bit count, 0-32.
    pub len: u8,
}

impl IpPrefix {
    /// The length-zero prefix covering all of IPv4.
    pub const ANY: IpPrefix = IpPrefix { addr: 0, len: 0 };

    /// Construct a validated, normalized prefix.
    pub fn new(addr: u32, len: u8) -> Result<Self, RuleError> {
        let prefix = Self { addr, len };
        prefix.validate()?;
        Ok(prefix)
    }

    pub fn mask(self) -> u32 {
        if self.len == 0 {
            0
        } else {
            !0u32 << (32 - self.len)
        }
    }

    /// True if `ip` falls under this prefix.
    pub fn contains(self, ip: u32) -> bool {
        (ip & self.mask()) == self.addr
    }

    /// True if the two prefixes cover at least one common address, which
    /// for prefixes means one contains the other.
    pub fn overlaps(self, other: IpPrefix) -> bool {
        let shared = self.len.min(other.len);
        let mask = IpPrefix { addr: 0, len: shared }.mask();
        (self.addr & mask) == (other.addr & mask)
    }

    pub fn validate(self) -> Result<(), RuleError> {
        if self.len > 32 {
            return Err(RuleError::InvalidPrefixLength { prefix_len: self.len });
        }
        if self.addr & !self.mask() != 0 {
            return Err(RuleError::UnnormalizedPrefix {
                addr: self.addr,
                prefix_len: self.len,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.addr.to_be_bytes();
        write!(f, "{a}.{b}.{c}.{d}/{}", self.len)
    }
}

// ── Port range ──────────────────────────────────────────────────────

/// Inclusive L4 port range. `start == end` selects a single port;
/// `[0, 65535]` is the wildcard sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// The full-range sentinel matched by every port.
    pub const ANY: PortRange = PortRange { start: 0, end: u16::MAX };

    pub fn contains(self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn overlaps(self, other: PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    pub fn validate(self) -> Result<(), RuleError> {
        if self.start > self.end {
            return Err(RuleError::InvalidPortRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_any() {
            f.write_str("any")
        } else if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

// ── Actions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Forward to the numbered next hop.
    Forward { next_hop: u32 },
    Drop,
    /// Emit a log record tagged with `tag`.
    Log { tag: String },
    /// Copy the packet to the numbered mirror target.
    Mirror { target: u32 },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward { next_hop } => write!(f, "forward(next_hop={next_hop})"),
            Self::Drop => f.write_str("drop"),
            Self::Log { tag } => write!(f, "log({tag})"),
            Self::Mirror { target } => write!(f, "mirror(target={target})"),
        }
    }
}

/// Ordered action list: a primary action plus any number of chained ones
/// (e.g. forward and also mirror).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionList {
    pub primary: Action,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chained: Vec<Action>,
}

impl ActionList {
    pub fn single(primary: Action) -> Self {
        Self {
            primary,
            chained: Vec::new(),
        }
    }

    /// Iterate primary first, then the chained actions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        std::iter::once(&self.primary).chain(self.chained.iter())
    }
}

impl std::fmt::Display for ActionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.primary)?;
        for action in &self.chained {
            write!(f, ", {action}")?;
        }
        Ok(())
    }
}

// ── Packet filter ───────────────────────────────────────────────────

/// Five-field predicate of a rule. `None` (or `Protocol::Any`) means the
/// field is unconstrained.
///
/// This is a declarative record: the field indices are authoritative for
/// prefix and range matching, so there is deliberately no whole-packet
/// `matches` here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_prefix: Option<IpPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_prefix: Option<IpPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<PortRange>,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
}

fn default_protocol() -> Protocol {
    Protocol::Any
}

impl Default for PacketFilter {
    fn default() -> Self {
        Self {
            src_prefix: None,
            dst_prefix: None,
            src_port: None,
            dst_port: None,
            protocol: Protocol::Any,
        }
    }
}

impl PacketFilter {
    /// A filter with every field unconstrained.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if let Some(prefix) = self.src_prefix {
            prefix.validate()?;
        }
        if let Some(prefix) = self.dst_prefix {
            prefix.validate()?;
        }
        if let Some(range) = self.src_port {
            range.validate()?;
        }
        if let Some(range) = self.dst_port {
            range.validate()?;
        }
        Ok(())
    }

    /// Effective source prefix: absent means the default route.
    pub fn src_prefix_or_any(&self) -> IpPrefix {
        self.src_prefix.unwrap_or(IpPrefix::ANY)
    }

    pub fn dst_prefix_or_any(&self) -> IpPrefix {
        self.dst_prefix.unwrap_or(IpPrefix::ANY)
    }

    /// Effective source port range: absent means the full-range sentinel.
    pub fn src_port_or_any(&self) -> PortRange {
        self.src_port.unwrap_or(PortRange::ANY)
    }

    pub fn dst_port_or_any(&self) -> PortRange {
        self.dst_port.unwrap_or(PortRange::ANY)
    }

    /// Combined prefix specificity, used to rank equal-priority matches:
    /// a /16 destination beats a /8 at the same priority.
    pub fn specificity(&self) -> u16 {
        u16::from(self.src_prefix_or_any().len) + u16::from(self.dst_prefix_or_any().len)
    }

    /// True if some packet could satisfy both filters, field by field.
    pub fn overlaps(&self, other: &PacketFilter) -> bool {
        self.src_prefix_or_any().overlaps(other.src_prefix_or_any())
            && self.dst_prefix_or_any().overlaps(other.dst_prefix_or_any())
            && self.src_port_or_any().overlaps(other.src_port_or_any())
            && self.dst_port_or_any().overlaps(other.dst_port_or_any())
            && protocols_overlap(self.protocol, other.protocol)
    }
}

fn protocols_overlap(a: Protocol, b: Protocol) -> bool {
    a == Protocol::Any || b == Protocol::Any || a.number() == b.number()
}

impl std::fmt::Display for PacketFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "any".to_string(), T::to_string)
        }
        write!(
            f,
            "src={} dst={} sport={} dport={} proto={}",
            opt(&self.src_prefix),
            opt(&self.dst_prefix),
            opt(&self.src_port),
            opt(&self.dst_port),
            self.protocol,
        )
    }
}

// ── Statistics ──────────────────────────────────────────────────────

/// Per-rule data-plane counters. Shared behind `Arc` so a `modify` that
/// replaces the rule record keeps counting on the same cells.
#[derive(Debug, Default)]
pub struct RuleStats {
    match_count: AtomicU64,
    last_match_ts: AtomicU64,
}

/// Plain-value snapshot of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleCounters {
    pub match_count: u64,
    pub last_match_ts: u64,
}

impl RuleStats {
    /// Record one match at `timestamp`. Never blocks; safe from any number
    /// of reader threads.
    pub fn record(&self, timestamp: u64) {
        self.match_count.fetch_add(1, Ordering::Relaxed);
        self.last_match_ts.fetch_max(timestamp, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.match_count.store(0, Ordering::Relaxed);
        self.last_match_ts.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RuleCounters {
        RuleCounters {
            match_count: self.match_count.load(Ordering::Relaxed),
            last_match_ts: self.last_match_ts.load(Ordering::Relaxed),
        }
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// A classification rule. Immutable once stored; `modify` replaces the
/// record wholesale (keeping `id` and the stats cells), and the counters
/// are interior-mutable atomics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    /// Higher wins; ties break toward the lower id.
    pub priority: i32,
    pub filter: PacketFilter,
    pub actions: ActionList,
    pub enabled: bool,
    #[serde(skip, default)]
    pub stats: Arc<RuleStats>,
}

impl Rule {
    pub fn new(id: RuleId, priority: i32, filter: PacketFilter, actions: ActionList) -> Self {
        Self {
            id,
            priority,
            filter,
            actions,
            enabled: true,
            stats: Arc::new(RuleStats::default()),
        }
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        self.filter.validate()
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rule {} prio={} enabled={} [{}] -> {}",
            self.id, self.priority, self.enabled, self.filter, self.actions,
        )
    }
}

// ── Packet header ───────────────────────────────────────────────────

/// The 5-tuple a packet is classified on. Addresses and ports are
/// host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketHeader {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl std::fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.src_ip.to_be_bytes();
        let [e, g, h, i] = self.dst_ip.to_be_bytes();
        write!(
            f,
            "{a}.{b}.{c}.{d}:{} -> {e}.{g}.{h}.{i}:{} proto={}",
            self.src_port, self.dst_port, self.protocol,
        )
    }
}

// ── Classification result ───────────────────────────────────────────

/// Outcome of a lookup. Total: a packet that matches nothing yields
/// `no_match()`, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub rule_id: Option<RuleId>,
    pub actions: Option<ActionList>,
}

impl ClassificationResult {
    pub fn no_match() -> Self {
        Self {
            rule_id: None,
            actions: None,
        }
    }

    pub fn matched(rule_id: RuleId, actions: ActionList) -> Self {
        Self {
            rule_id: Some(rule_id),
            actions: Some(actions),
        }
    }

    pub fn is_match(&self) -> bool {
        self.rule_id.is_some()
    }
}

impl std::fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.rule_id, &self.actions) {
            (Some(id), Some(actions)) => write!(f, "matched rule {id}: {actions}"),
            _ => f.write_str("no match"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── IpPrefix tests ────────────────────────────────────────────

    #[test]
    fn prefix_exact_match() {
        let p = IpPrefix::new(0xC0A8_0001, 32).unwrap(); // 192.168.0.1/32
        assert!(p.contains(0xC0A8_0001));
        assert!(!p.contains(0xC0A8_0002));
    }

    #[test]
    fn prefix_subnet_match() {
        let p = IpPrefix::new(0xC0A8_0100, 24).unwrap(); // 192.168.1.0/24
        assert!(p.contains(0xC0A8_0100));
        assert!(p.contains(0xC0A8_01FF));
        assert!(!p.contains(0xC0A8_0200));
    }

    #[test]
    fn default_route_matches_all() {
        assert!(IpPrefix::ANY.contains(0));
        assert!(IpPrefix::ANY.contains(0xFFFF_FFFF));
    }

    #[test]
    fn prefix_rejects_bad_length() {
        assert!(matches!(
            IpPrefix::new(0, 33),
            Err(RuleError::InvalidPrefixLength { prefix_len: 33 })
        ));
    }

    #[test]
    fn prefix_rejects_unnormalized_bits() {
        // 10.0.0.1/8 carries bits below the mask.
        assert!(matches!(
            IpPrefix::new(0x0A00_0001, 8),
            Err(RuleError::UnnormalizedPrefix { .. })
        ));
        assert!(IpPrefix::new(0x0A00_0000, 8).is_ok());
    }

    #[test]
    fn prefix_mask_values() {
        assert_eq!(IpPrefix::ANY.mask(), 0);
        assert_eq!(IpPrefix::new(0x0A00_0000, 8).unwrap().mask(), 0xFF00_0000);
        assert_eq!(IpPrefix::new(0xC0A8_0000, 16).unwrap().mask(), 0xFFFF_0000);
        assert_eq!(IpPrefix::new(1, 32).unwrap().mask(), 0xFFFF_FFFF);
    }

    #[test]
    fn prefix_overlap_is_containment() {
        let p8 = IpPrefix::new(0x0A00_0000, 8).unwrap();
        let p16 = IpPrefix::new(0x0A01_0000, 16).unwrap();
        let other = IpPrefix::new(0x0B00_0000, 8).unwrap();
        assert!(p8.overlaps(p16));
        assert!(p16.overlaps(p8));
        assert!(!p8.overlaps(other));
        assert!(IpPrefix::ANY.overlaps(other));
    }

    #[test]
    fn prefix_display() {
        let p = IpPrefix::new(0x0A00_0000, 8).unwrap();
        assert_eq!(p.to_string(), "10.0.0.0/8");
    }

    // ── PortRange tests ───────────────────────────────────────────

    #[test]
    fn port_range_contains() {
        let r = PortRange { start: 80, end: 443 };
        assert!(r.contains(80));
        assert!(r.contains(443));
        assert!(r.contains(200));
        assert!(!r.contains(79));
        assert!(!r.contains(444));
    }

    #[test]
    fn port_range_single_port() {
        let r = PortRange { start: 22, end: 22 };
        assert!(r.contains(22));
        assert!(!r.contains(21));
        assert!(!r.contains(23));
    }

    #[test]
    fn port_range_any_sentinel() {
        assert!(PortRange::ANY.is_any());
        assert!(PortRange::ANY.contains(0));
        assert!(PortRange::ANY.contains(u16::MAX));
        assert!(!PortRange { start: 0, end: 100 }.is_any());
    }

    #[test]
    fn port_range_validate_inverted() {
        assert!(PortRange { start: 443, end: 80 }.validate().is_err());
        assert!(PortRange { start: 80, end: 443 }.validate().is_ok());
    }

    #[test]
    fn port_range_overlap() {
        let a = PortRange { start: 10, end: 20 };
        assert!(a.overlaps(PortRange { start: 20, end: 30 }));
        assert!(a.overlaps(PortRange { start: 0, end: 10 }));
        assert!(!a.overlaps(PortRange { start: 21, end: 30 }));
    }

    // ── Filter tests ──────────────────────────────────────────────

    #[test]
    fn filter_any_is_unconstrained() {
        let f = PacketFilter::any();
        assert_eq!(f.src_prefix_or_any(), IpPrefix::ANY);
        assert_eq!(f.dst_port_or_any(), PortRange::ANY);
        assert_eq!(f.protocol, Protocol::Any);
        assert_eq!(f.specificity(), 0);
    }

    #[test]
    fn filter_validates_all_fields() {
        let mut f = PacketFilter::any();
        f.src_port = Some(PortRange { start: 9, end: 1 });
        assert!(f.validate().is_err());

        let mut f = PacketFilter::any();
        f.dst_prefix = Some(IpPrefix { addr: 0, len: 40 });
        assert!(f.validate().is_err());
    }

    #[test]
    fn filter_specificity_sums_prefix_lengths() {
        let f = PacketFilter {
            src_prefix: Some(IpPrefix::new(0x0A00_0000, 8).unwrap()),
            dst_prefix: Some(IpPrefix::new(0xC0A8_0000, 16).unwrap()),
            ..PacketFilter::any()
        };
        assert_eq!(f.specificity(), 24);
    }

    #[test]
    fn filter_overlap_requires_every_field() {
        let tcp_80 = PacketFilter {
            dst_port: Some(PortRange { start: 80, end: 80 }),
            protocol: Protocol::Tcp,
            ..PacketFilter::any()
        };
        let tcp_443 = PacketFilter {
            dst_port: Some(PortRange { start: 443, end: 443 }),
            protocol: Protocol::Tcp,
            ..PacketFilter::any()
        };
        let udp_80 = PacketFilter {
            dst_port: Some(PortRange { start: 80, end: 80 }),
            protocol: Protocol::Udp,
            ..PacketFilter::any()
        };
        assert!(tcp_80.overlaps(&PacketFilter::any()));
        assert!(!tcp_80.overlaps(&tcp_443));
        assert!(!tcp_80.overlaps(&udp_80));
    }

    // ── Stats tests ───────────────────────────────────────────────

    #[test]
    fn stats_record_and_snapshot() {
        let stats = RuleStats::default();
        stats.record(100);
        stats.record(250);
        let snap = stats.snapshot();
        assert_eq!(snap.match_count, 2);
        assert_eq!(snap.last_match_ts, 250);
    }

    #[test]
    fn stats_last_match_ts_is_monotone() {
        let stats = RuleStats::default();
        stats.record(250);
        stats.record(100); // out-of-order timestamp must not go backwards
        assert_eq!(stats.snapshot().last_match_ts, 250);
    }

    #[test]
    fn stats_reset_zeroes_both() {
        let stats = RuleStats::default();
        stats.record(7);
        stats.reset();
        assert_eq!(stats.snapshot(), RuleCounters::default());
    }

    #[test]
    fn rule_clone_shares_stats_cells() {
        let rule = Rule::new(
            RuleId(1),
            10,
            PacketFilter::any(),
            ActionList::single(Action::Drop),
        );
        let clone = rule.clone();
        rule.stats.record(5);
        assert_eq!(clone.stats.snapshot().match_count, 1);
    }

    // ── Wire form tests ───────────────────────────────────────────

    #[test]
    fn rule_round_trips_through_serde() {
        let rule = Rule::new(
            RuleId(7),
            100,
            PacketFilter {
                dst_prefix: Some(IpPrefix::new(0x0A00_0000, 8).unwrap()),
                dst_port: Some(PortRange { start: 80, end: 80 }),
                protocol: Protocol::Tcp,
                ..PacketFilter::any()
            },
            ActionList::single(Action::Forward { next_hop: 3 }),
        );
        let json = serde_json::to_string(&rule).unwrap();
        let back: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, rule.id);
        assert_eq!(back.priority, rule.priority);
        assert_eq!(back.filter, rule.filter);
        assert_eq!(back.actions, rule.actions);
        // Counters are not part of the wire form.
        assert_eq!(back.stats.snapshot(), RuleCounters::default());
    }

    #[test]
    fn display_formats_are_log_friendly() {
        let header = PacketHeader {
            src_ip: 0x0102_0304,
            dst_ip: 0x0A00_0005,
            src_port: 1024,
            dst_port: 80,
            protocol: 6,
        };
        assert_eq!(header.to_string(), "1.2.3.4:1024 -> 10.0.0.5:80 proto=6");

        let result = ClassificationResult::no_match();
        assert_eq!(result.to_string(), "no match");
    }
}
