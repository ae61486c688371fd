//! Domain error model.
//!
//! Every failure the engine produces is a deterministic function of its input
//! state, so errors carry enough structure (rule, kind, field) for a caller to
//! map them onto field-level messages without parsing strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// The validator rules, listed in the order they are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    /// Rule 1: quantities, ranges and input shape.
    WellFormedness,
    /// Rule 2: assembly order is unique per composite product.
    AssemblyOrderUniqueness,
    /// Rule 3: names and identity triples are unique in their scope.
    IdentityUniqueness,
    /// Rule 4: referenced entities exist, are active and live in the right scope.
    ReferentialSanity,
}

impl ValidationRule {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationRule::WellFormedness => "well_formedness",
            ValidationRule::AssemblyOrderUniqueness => "assembly_order_uniqueness",
            ValidationRule::IdentityUniqueness => "identity_uniqueness",
            ValidationRule::ReferentialSanity => "referential_sanity",
        }
    }
}

impl core::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    InvalidQuantity,
    InvalidRange,
    AmbiguousSelector,
    Malformed,
    DuplicateAssemblyOrder,
    DuplicateName,
    DuplicateExchangeRule,
    UnknownReference,
    InactiveReference,
    GroupMismatch,
    KindMismatch,
    MissingSelection,
    CategoryMismatch,
}

impl ValidationKind {
    /// The validator rule a kind belongs to.
    pub fn rule(self) -> ValidationRule {
        match self {
            ValidationKind::InvalidQuantity
            | ValidationKind::InvalidRange
            | ValidationKind::AmbiguousSelector
            | ValidationKind::Malformed
            | ValidationKind::MissingSelection => ValidationRule::WellFormedness,
            ValidationKind::DuplicateAssemblyOrder => ValidationRule::AssemblyOrderUniqueness,
            ValidationKind::DuplicateName | ValidationKind::DuplicateExchangeRule => {
                ValidationRule::IdentityUniqueness
            }
            ValidationKind::UnknownReference
            | ValidationKind::InactiveReference
            | ValidationKind::GroupMismatch
            | ValidationKind::KindMismatch
            | ValidationKind::CategoryMismatch => ValidationRule::ReferentialSanity,
        }
    }
}

/// A rejected mutation or query input.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?} on `{field}` ({rule}): {message}")]
pub struct ValidationError {
    pub rule: ValidationRule,
    pub kind: ValidationKind,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: kind.rule(),
            kind,
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input failed one of the validator rules.
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// A referenced entity vanished or went inactive after it was linked.
    #[error("stale reference to {entity} {id}")]
    StaleReference { entity: &'static str, id: String },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(
        kind: ValidationKind,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation(ValidationError::new(kind, field, message))
    }

    pub fn stale(entity: &'static str, id: impl ToString) -> Self {
        Self::StaleReference {
            entity,
            id: id.to_string(),
        }
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

    /// Validation payload, if this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            DomainError::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// Kind tag shortcut used heavily by callers and tests.
    pub fn validation_kind(&self) -> Option<ValidationKind> {
        self.as_validation().map(|v| v.kind)
    }
}

impl From<ValidationError> for DomainError {
    fn from(value: ValidationError) -> Self {
        DomainError::Validation(value)
    }
}
