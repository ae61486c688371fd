//! `prodline-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod audit;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use audit::{AuditStamp, LifecycleState};
pub use entity::{Audited, Entity};
pub use error::{DomainError, DomainResult, ValidationError, ValidationKind, ValidationRule};
pub use id::{AggregateId, EntityId, TenantId, UserId};
pub use value_object::ValueObject;
