use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use prodline_core::{AggregateId, LifecycleState};

use crate::category::CategoryId;

/// Product identifier.
///
/// Composite and group products own a composition graph, which is stored as
/// the event stream of the same id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What kind of sellable a product is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Simple,
    /// Assembled from components and/or hierarchy templates.
    Composite,
    /// Offers customer-selectable slots.
    Group,
}

impl ProductKind {
    /// Composite and group products own a composition graph.
    pub fn owns_graph(self) -> bool {
        !matches!(self, ProductKind::Simple)
    }
}

/// Flat catalog record as served by the catalog subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub kind: ProductKind,
    pub category_id: Option<CategoryId>,
    pub base_price: Decimal,
    pub state: LifecycleState,
}

impl ProductRecord {
    /// An active record with no category.
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        kind: ProductKind,
        base_price: Decimal,
    ) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            kind,
            category_id: None,
            base_price,
            state: LifecycleState::Active,
        }
    }

    pub fn in_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn belongs_to(&self, category_id: CategoryId) -> bool {
        self.category_id == Some(category_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_composite_and_group_products_own_a_graph() {
        assert!(!ProductKind::Simple.owns_graph());
        assert!(ProductKind::Composite.owns_graph());
        assert!(ProductKind::Group.owns_graph());
    }

    #[test]
    fn record_serializes_price_as_decimal_string() {
        let record = ProductRecord::new(
            ProductId::generate(),
            "FLOUR-1KG",
            "Flour",
            ProductKind::Simple,
            Decimal::new(1050, 2),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["base_price"], "10.50");
        assert_eq!(json["kind"], "simple");
        assert_eq!(json["state"], "active");
    }
}
