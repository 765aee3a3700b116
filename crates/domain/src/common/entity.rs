use serde::{Deserialize, Serialize};

/// Unique identifier for a classification rule, assigned by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// L4 protocol predicate of a rule filter.
///
/// `Any` is the wildcard; it encodes as wire number 0, which the rule
/// wire form reserves for "match every protocol". Every other value is
/// matched literally against the packet's protocol byte, so predicates
/// over protocols without a named variant stay representable as
/// `Other(n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

impl Protocol {
    /// The wire number this predicate encodes as (0 for the wildcard).
    pub fn number(self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Icmp => 1,
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(n) => n,
        }
    }

    /// Decode a wire number back into a predicate; 0 is the wildcard and
    /// unlisted numbers land in `Other` unchanged.
    pub fn from_number(n: u8) -> Self {
        match n {
            0 => Self::Any,
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            other => Self::Other(other),
        }
    }

    /// True if this predicate accepts a packet carrying protocol byte `n`.
    pub fn accepts(self, n: u8) -> bool {
        match self {
            Self::Any => true,
            exact => exact.number() == n,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Icmp => f.write_str("icmp"),
            Self::Other(n) => write!(f, "proto-{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── RuleId tests ──────────────────────────────────────────────

    #[test]
    fn rule_id_display() {
        assert_eq!(format!("{}", RuleId(42)), "42");
    }

    #[test]
    fn rule_id_ordering_is_numeric() {
        // Priority ties break toward the lower id, so ordering must be
        // numeric, not lexicographic.
        assert!(RuleId(3) < RuleId(5));
        assert!(RuleId(100) > RuleId(99));
    }

    // ── Protocol tests ────────────────────────────────────────────

    #[test]
    fn wildcard_accepts_every_protocol_byte() {
        for n in 0..=u8::MAX {
            assert!(Protocol::Any.accepts(n));
        }
    }

    #[test]
    fn exact_predicate_matches_only_its_own_byte() {
        assert!(Protocol::Tcp.accepts(6));
        assert!(!Protocol::Tcp.accepts(17));
        assert!(Protocol::Udp.accepts(17));
        assert!(!Protocol::Icmp.accepts(6));
    }

    #[test]
    fn unnamed_protocols_are_matched_literally() {
        let gre = Protocol::Other(47);
        assert!(gre.accepts(47));
        assert!(!gre.accepts(46));
        assert_eq!(gre.number(), 47);
    }

    #[test]
    fn zero_wire_number_is_the_wildcard() {
        // The rule wire form uses 0 to mean "any"; decoding it must not
        // produce a literal-zero predicate that rejects real traffic.
        assert_eq!(Protocol::from_number(0), Protocol::Any);
        assert_eq!(Protocol::Any.number(), 0);
        assert!(Protocol::from_number(0).accepts(6));
    }

    #[test]
    fn wire_numbers_survive_a_decode_encode_cycle() {
        for n in 0..=u8::MAX {
            assert_eq!(Protocol::from_number(n).number(), n);
        }
    }

    #[test]
    fn accepts_agrees_with_wire_number_for_exact_predicates() {
        // Every non-wildcard predicate accepts exactly the byte it
        // encodes as; the prefilter signature schema relies on this.
        for n in 1..=u8::MAX {
            let predicate = Protocol::from_number(n);
            for byte in 0..=u8::MAX {
                assert_eq!(predicate.accepts(byte), byte == n);
            }
        }
    }

    #[test]
    fn display_names_known_protocols() {
        assert_eq!(Protocol::Any.to_string(), "any");
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::Other(89).to_string(), "proto-89");
    }
}
