use thiserror::Error;

use super::arena::ArenaError;
use super::entity::RuleId;
use crate::rule::error::RuleError;

/// Crate-level error with the structured result codes the control plane
/// sees. Per-module errors (`RuleError`, `ArenaError`) convert into this.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("duplicate rule id: {0}")]
    DuplicateId(RuleId),

    #[error("rule not found: {0}")]
    NotFound(RuleId),

    #[error("invalid rule: {field}: {reason}")]
    InvalidRule { field: &'static str, reason: String },

    #[error("rule conflicts with rule {0}")]
    Conflict(RuleId),

    #[error("allocator exhausted: {0}")]
    AllocatorExhausted(String),

    #[error("internal inconsistency: rule {0} has been disabled, operator intervention required")]
    InternalInconsistency(RuleId),
}

impl From<RuleError> for ClassifierError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::DuplicateRule { id } => Self::DuplicateId(id),
            RuleError::RuleNotFound { id } => Self::NotFound(id),
            RuleError::Conflict { other, .. } => Self::Conflict(other),
            RuleError::InvalidPortRange { .. } => Self::InvalidRule {
                field: "port_range",
                reason: e.to_string(),
            },
            RuleError::InvalidPrefixLength { .. } => Self::InvalidRule {
                field: "prefix_len",
                reason: e.to_string(),
            },
            RuleError::UnnormalizedPrefix { .. } => Self::InvalidRule {
                field: "prefix",
                reason: e.to_string(),
            },
        }
    }
}

impl From<ArenaError> for ClassifierError {
    fn from(e: ArenaError) -> Self {
        Self::AllocatorExhausted(e.to_string())
    }
}
