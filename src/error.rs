// Error taxonomy for the net-worth core
//
// Validation and malformed-item errors are collected into result lists by
// the aggregation engine. Only storage failures propagate as `Err`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::concurrency::ConflictDetails;

// ============================================================================
// OWNERSHIP VALIDATION
// ============================================================================

/// Why an ownership record was rejected. All variants are recoverable:
/// the caller corrects the input and resubmits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("invalid association type `{0}` (expected individual, joint or tenants_in_common)")]
    InvalidAssociationType(String),

    #[error("unknown owner `{0}` for this client")]
    UnknownOwner(String),

    #[error("individual ownership needs exactly one owner at 100.00% (got {count} share(s), total {total}%)")]
    InvalidIndividualShare { count: usize, total: Decimal },

    #[error("tenants in common shares must be non-negative and total at most 100.01% (total {total}%{})",
        .negative_owner.as_ref().map(|o| format!(", negative share for `{o}`")).unwrap_or_default())]
    OwnershipExceeds100 {
        total: Decimal,
        negative_owner: Option<String>,
    },

    #[error("joint ownership needs at least two distinct owners (got {0})")]
    InsufficientJointOwners(usize),

    #[error("tenants in common ownership lists no owners")]
    NoOwnersListed,
}

impl OwnershipError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            OwnershipError::InvalidAssociationType(_) => "InvalidAssociationType",
            OwnershipError::UnknownOwner(_) => "UnknownOwner",
            OwnershipError::InvalidIndividualShare { .. } => "InvalidIndividualShare",
            OwnershipError::OwnershipExceeds100 { .. } => "OwnershipExceeds100",
            OwnershipError::InsufficientJointOwners(_) => "InsufficientJointOwners",
            OwnershipError::NoOwnersListed => "NoOwnersListed",
        }
    }
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("snapshot {0} already exists and cannot be modified")]
    Immutable(String),

    #[error("snapshot {0} failed its integrity check")]
    IntegrityMismatch(String),

    #[error("snapshot storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

// ============================================================================
// GUARDED WRITES
// ============================================================================

/// Outcome errors of a guarded ownership write.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("ownership rejected: {0}")]
    Invalid(#[from] OwnershipError),

    #[error("item is being edited by {held_by} until {expires_at}")]
    Locked {
        held_by: String,
        expires_at: DateTime<Utc>,
    },

    #[error("write conflict: item changed from version {} to {} by {}",
        .0.base_version, .0.current.version, .0.current.written_by)]
    Conflict(ConflictDetails),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

// ============================================================================
// TESTS
// ============================================================================
