//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct QuantityRange { min: Decimal, max: Decimal }
///
/// impl ValueObject for QuantityRange {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
