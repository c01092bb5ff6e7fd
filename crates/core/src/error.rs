//! Domain error model.

use thiserror::Error;

use crate::id::EntityId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Kind of referenced entity that failed a create-time lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    Provider,
    Identity,
    Currency,
    Wallet,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Provider => "provider",
            ReferenceKind::Identity => "identity",
            ReferenceKind::Currency => "currency",
            ReferenceKind::Wallet => "wallet",
        }
    }
}

impl core::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The same dedup key was replayed with different defining parameters.
    /// Carries the internal id the key is already mapped to.
    #[error("external id already mapped to {0} with different parameters")]
    ExternalIdConflict(EntityId),

    /// An entity referenced in create params does not exist.
    #[error("referenced {0} not found")]
    ReferencedEntityNotFound(ReferenceKind),

    /// An entity referenced in create params exists but is not usable by
    /// this owner (e.g. party access revoked).
    #[error("referenced {kind} inaccessible: {reason}")]
    ReferencedEntityInaccessible {
        kind: ReferenceKind,
        reason: String,
    },

    /// A requested aggregate was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. duplicate creation on a live aggregate).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn reference_not_found(kind: ReferenceKind) -> Self {
        Self::ReferencedEntityNotFound(kind)
    }

    pub fn reference_inaccessible(kind: ReferenceKind, reason: impl Into<String>) -> Self {
        Self::ReferencedEntityInaccessible {
            kind,
            reason: reason.into(),
        }
    }
}
