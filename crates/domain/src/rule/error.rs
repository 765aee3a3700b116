use thiserror::Error;

use crate::common::entity::RuleId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid port range: {start}..{end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("invalid prefix length: {prefix_len} (must be 0-32)")]
    InvalidPrefixLength { prefix_len: u8 },

    #[error("prefix {addr:#010x}/{prefix_len} has bits set beyond the prefix length")]
    UnnormalizedPrefix { addr: u32, prefix_len: u8 },

    #[error("duplicate rule: {id}")]
    DuplicateRule { id: RuleId },

    #[error("rule not found: {id}")]
    RuleNotFound { id: RuleId },

    #[error("rule {id} conflicts with rule {other}")]
    Conflict { id: RuleId, other: RuleId },
}
