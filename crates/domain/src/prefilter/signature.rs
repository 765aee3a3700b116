//! Canonical packet/rule signature fed to the negative prefilter.
//!
//! One schema serves both sides: a packet produces exactly one signature,
//! and a rule enumerates every signature a packet it matches could
//! produce. The schema is the canonical protocol byte, the only header
//! field whose rule-side enumeration is always a small finite set (prefix
//! and range predicates cover unboundedly many concrete values, so they
//! cannot participate). A rule constraining the protocol contributes one
//! signature; an any-protocol rule contributes all 256.

use crate::common::entity::Protocol;
use crate::rule::entity::{PacketFilter, PacketHeader};

pub const SIGNATURE_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The signature of a concrete packet header.
pub fn of_header(header: &PacketHeader) -> Signature {
    Signature([header.protocol])
}

/// Every signature a packet matched by `filter` could produce.
pub fn of_filter(filter: &PacketFilter) -> impl Iterator<Item = Signature> {
    let range = match filter.protocol {
        Protocol::Any => 0..=u8::MAX,
        proto => {
            let n = proto.number();
            n..=n
        }
    };
    range.map(|n| Signature([n]))
}
