//! Price aggregation for a customer's selection.
//!
//! Each line costs `base_price * quantity + extra_price`; the surcharge is
//! flat per line. Arithmetic is decimal and checked, and no rounding, tax or
//! discount is applied here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use prodline_catalog::{CatalogReader, CategoryRecord, ProductId, ProductRecord};
use prodline_core::{DomainError, DomainResult, TenantId, ValidationKind};

use crate::composition::ProductComposition;
use crate::model::{ComponentId, GroupItemId, ItemSelector};
use crate::validator;

/// The graph part a selection line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedPart {
    GroupItem(GroupItemId),
    Component(ComponentId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionLine {
    pub part: SelectedPart,
    pub quantity: Decimal,
    /// The customer's pick for category-bound group items.
    pub chosen_product_id: Option<ProductId>,
}

impl SelectionLine {
    pub fn item(item_id: GroupItemId, quantity: Decimal) -> Self {
        Self {
            part: SelectedPart::GroupItem(item_id),
            quantity,
            chosen_product_id: None,
        }
    }

    pub fn component(component_id: ComponentId, quantity: Decimal) -> Self {
        Self {
            part: SelectedPart::Component(component_id),
            quantity,
            chosen_product_id: None,
        }
    }

    pub fn choosing(mut self, product_id: ProductId) -> Self {
        self.chosen_product_id = Some(product_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub part: SelectedPart,
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub extra_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub lines: Vec<PricedLine>,
    pub total: Decimal,
}

/// Price `lines` against the composition graph and the catalog.
///
/// Missing or inactive products and graph parts fail with `StaleReference`;
/// malformed selections fail validation. An empty selection totals zero.
pub fn price_selection<C>(
    composition: &ProductComposition,
    catalog: &C,
    lines: &[SelectionLine],
) -> DomainResult<PriceBreakdown>
where
    C: CatalogReader + ?Sized,
{
    let tenant_id = composition.tenant_id().ok_or_else(DomainError::not_found)?;

    let mut priced = Vec::with_capacity(lines.len());
    let mut total = Decimal::ZERO;
    for (idx, line) in lines.iter().enumerate() {
        let (product, extra_price) = match line.part {
            SelectedPart::GroupItem(id) => resolve_item(composition, catalog, tenant_id, idx, id, line)?,
            SelectedPart::Component(id) => {
                resolve_component(composition, catalog, tenant_id, idx, id, line)?
            }
        };

        let line_total = product
            .base_price
            .checked_mul(line.quantity)
            .and_then(|v| v.checked_add(extra_price))
            .ok_or_else(|| overflow(idx))?;
        total = total.checked_add(line_total).ok_or_else(|| overflow(idx))?;

        priced.push(PricedLine {
            part: line.part,
            product_id: product.id,
            unit_price: product.base_price,
            quantity: line.quantity,
            extra_price,
            line_total,
        });
    }

    Ok(PriceBreakdown { lines: priced, total })
}

fn overflow(idx: usize) -> DomainError {
    DomainError::invariant(format!("price of lines[{idx}] is out of decimal range"))
}

fn resolve_item<C: CatalogReader + ?Sized>(
    composition: &ProductComposition,
    catalog: &C,
    tenant_id: TenantId,
    idx: usize,
    item_id: GroupItemId,
    line: &SelectionLine,
) -> DomainResult<(ProductRecord, Decimal)> {
    let slots = composition.group_slots()?;
    let item = slots
        .item(item_id)
        .filter(|i| i.state.is_active())
        .ok_or_else(|| DomainError::stale("group item", item_id))?;

    validator::quantity_within(&item.range, line.quantity, &format!("lines[{idx}].quantity"))?;

    let product = match (item.selector, line.chosen_product_id) {
        (ItemSelector::Product(product_id), chosen) => {
            if chosen.is_some_and(|c| c != product_id) {
                return Err(DomainError::validation(
                    ValidationKind::Malformed,
                    format!("lines[{idx}].chosen_product_id"),
                    format!("group item {item_id} is bound to product {product_id}"),
                ));
            }
            catalog
                .product(tenant_id, product_id)
                .filter(ProductRecord::is_active)
                .ok_or_else(|| DomainError::stale("product", product_id))?
        }
        (ItemSelector::Category(_), None) => {
            return Err(DomainError::validation(
                ValidationKind::MissingSelection,
                format!("lines[{idx}].chosen_product_id"),
                format!("group item {item_id} is category-bound and needs a chosen product"),
            ));
        }
        (ItemSelector::Category(category_id), Some(chosen)) => {
            catalog
                .category(tenant_id, category_id)
                .filter(CategoryRecord::is_active)
                .ok_or_else(|| DomainError::stale("category", category_id))?;
            let product = catalog
                .product(tenant_id, chosen)
                .filter(ProductRecord::is_active)
                .ok_or_else(|| DomainError::stale("product", chosen))?;
            if !product.belongs_to(category_id) {
                return Err(DomainError::validation(
                    ValidationKind::CategoryMismatch,
                    format!("lines[{idx}].chosen_product_id"),
                    format!("product {chosen} is not in category {category_id}"),
                ));
            }
            product
        }
    };

    Ok((product, item.extra_price))
}

fn resolve_component<C: CatalogReader + ?Sized>(
    composition: &ProductComposition,
    catalog: &C,
    tenant_id: TenantId,
    idx: usize,
    component_id: ComponentId,
    line: &SelectionLine,
) -> DomainResult<(ProductRecord, Decimal)> {
    let parts = composition.composite_parts()?;
    let component = parts
        .component(component_id)
        .filter(|c| c.state.is_active())
        .ok_or_else(|| DomainError::stale("component", component_id))?;

    validator::positive_quantity(line.quantity, &format!("lines[{idx}].quantity"))?;

    let product = catalog
        .product(tenant_id, component.component_product_id)
        .filter(ProductRecord::is_active)
        .ok_or_else(|| DomainError::stale("product", component.component_product_id))?;
    Ok((product, Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;
    use prodline_catalog::{CategoryId, ProductKind};
    use prodline_core::{Aggregate, LifecycleState, UserId};

    use crate::composition::{CompositionAction, CompositionCommand};
    use crate::model::{CatalogRef, ComponentSpec, GroupItemSpec};

    #[derive(Default)]
    struct StubCatalog {
        products: HashMap<ProductId, ProductRecord>,
        categories: HashMap<CategoryId, CategoryRecord>,
    }

    impl CatalogReader for StubCatalog {
        fn product(&self, _tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
            self.products.get(&id).filter(|p| p.is_active()).cloned()
        }

        fn category(&self, _tenant_id: TenantId, id: CategoryId) -> Option<CategoryRecord> {
            self.categories.get(&id).filter(|c| c.is_active()).cloned()
        }
    }

    /// Serves soft-deleted records as-is, the way a drifting collaborator might.
    struct UnfilteredCatalog<'a>(&'a StubCatalog);

    impl CatalogReader for UnfilteredCatalog<'_> {
        fn product(&self, _tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
            self.0.products.get(&id).cloned()
        }

        fn category(&self, _tenant_id: TenantId, id: CategoryId) -> Option<CategoryRecord> {
            self.0.categories.get(&id).cloned()
        }
    }

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    struct Setup {
        tenant_id: TenantId,
        catalog: StubCatalog,
        composition: ProductComposition,
    }

    impl Setup {
        fn new(kind: ProductKind) -> Self {
            let id = ProductId::generate();
            let mut s = Self {
                tenant_id: TenantId::new(),
                catalog: StubCatalog::default(),
                composition: ProductComposition::empty(id),
            };
            let owner = ProductRecord::new(id, "OWN", "Owner", kind, Decimal::ZERO);
            s.run(CompositionAction::Define { owner: Some(owner) });
            s
        }

        fn run(&mut self, action: CompositionAction) {
            let cmd = CompositionCommand {
                tenant_id: self.tenant_id,
                product_id: self.composition.id_typed(),
                actor: UserId::new(),
                occurred_at: Utc::now(),
                action,
            };
            for e in self.composition.handle(&cmd).unwrap() {
                self.composition.apply(&e);
            }
        }

        fn product(&mut self, price: Decimal) -> ProductRecord {
            let p = ProductRecord::new(ProductId::generate(), "SKU", "Item", ProductKind::Simple, price);
            self.catalog.products.insert(p.id, p.clone());
            p
        }

        fn item(&mut self, name: &str, target: CatalogRef, extra: Decimal) -> GroupItemId {
            let (product_id, category_id) = match &target {
                CatalogRef::Product(p) => (Some(p.id), None),
                CatalogRef::Category(c) => (None, Some(c.id)),
            };
            let id = GroupItemId::generate();
            self.run(CompositionAction::AddGroupItem {
                item_id: id,
                spec: GroupItemSpec {
                    name: name.to_string(),
                    product_id,
                    category_id,
                    min_quantity: Decimal::ONE,
                    max_quantity: Decimal::from(10),
                    default_quantity: None,
                    is_optional: false,
                    extra_price: extra,
                },
                target: Some(target),
            });
            id
        }
    }

    #[test]
    fn two_items_total_26_50() {
        let mut s = Setup::new(ProductKind::Group);
        let p1 = s.product(money(1000));
        let p2 = s.product(money(500));
        let item1 = s.item("First", CatalogRef::Product(p1), money(150));
        let item2 = s.item("Second", CatalogRef::Product(p2), Decimal::ZERO);

        let breakdown = price_selection(
            &s.composition,
            &s.catalog,
            &[
                SelectionLine::item(item1, Decimal::from(2)),
                SelectionLine::item(item2, Decimal::ONE),
            ],
        )
        .unwrap();

        assert_eq!(breakdown.total, money(2650));
        assert_eq!(breakdown.total.to_string(), "26.50");
        assert_eq!(breakdown.lines[0].line_total, money(2150));
        assert_eq!(breakdown.lines[1].line_total, money(500));
    }

    #[test]
    fn inactive_records_are_stale_even_when_the_catalog_returns_them() {
        let mut s = Setup::new(ProductKind::Group);
        let p1 = s.product(money(1000));
        let item1 = s.item("First", CatalogRef::Product(p1.clone()), money(150));

        let fruits = CategoryRecord::new(CategoryId::generate(), "Fruits");
        s.catalog.categories.insert(fruits.id, fruits.clone());
        let apple = ProductRecord::new(ProductId::generate(), "APL", "Apple", ProductKind::Simple, money(80))
            .in_category(fruits.id);
        s.catalog.products.insert(apple.id, apple.clone());
        let fruit = s.item("Fruit", CatalogRef::Category(fruits.clone()), Decimal::ZERO);

        s.catalog.products.get_mut(&p1.id).unwrap().state = LifecycleState::Inactive;
        s.catalog.categories.get_mut(&fruits.id).unwrap().state = LifecycleState::Inactive;
        let leaky = UnfilteredCatalog(&s.catalog);

        let err = price_selection(&s.composition, &leaky, &[SelectionLine::item(item1, Decimal::from(2))]).unwrap_err();
        assert_eq!(err, DomainError::stale("product", p1.id));

        let err = price_selection(
            &s.composition,
            &leaky,
            &[SelectionLine::item(fruit, Decimal::ONE).choosing(apple.id)],
        )
        .unwrap_err();
        assert_eq!(err, DomainError::stale("category", fruits.id));
    }

    #[test]
    fn empty_selection_totals_zero() {
        let s = Setup::new(ProductKind::Group);
        let breakdown = price_selection(&s.composition, &s.catalog, &[]).unwrap();
        assert!(breakdown.lines.is_empty());
        assert_eq!(breakdown.total, Decimal::ZERO);
    }

    #[test]
    fn category_bound_item_uses_the_chosen_product() {
        let mut s = Setup::new(ProductKind::Group);
        let fruits = CategoryRecord::new(CategoryId::generate(), "Fruits");
        s.catalog.categories.insert(fruits.id, fruits.clone());
        let apple = {
            let p = ProductRecord::new(ProductId::generate(), "APL", "Apple", ProductKind::Simple, money(120))
                .in_category(fruits.id);
            s.catalog.products.insert(p.id, p.clone());
            p
        };
        let stray = s.product(money(99));
        let item = s.item("Fruit", CatalogRef::Category(fruits), money(25));

        let missing = price_selection(&s.composition, &s.catalog, &[SelectionLine::item(item, Decimal::ONE)])
            .unwrap_err();
        assert_eq!(missing.validation_kind(), Some(ValidationKind::MissingSelection));

        let mismatch = price_selection(
            &s.composition,
            &s.catalog,
            &[SelectionLine::item(item, Decimal::ONE).choosing(stray.id)],
        )
        .unwrap_err();
        assert_eq!(mismatch.validation_kind(), Some(ValidationKind::CategoryMismatch));

        let ok = price_selection(
            &s.composition,
            &s.catalog,
            &[SelectionLine::item(item, Decimal::from(3)).choosing(apple.id)],
        )
        .unwrap();
        assert_eq!(ok.total, money(385));
        assert_eq!(ok.lines[0].product_id, apple.id);
    }

    #[test]
    fn deactivated_product_is_a_stale_reference() {
        let mut s = Setup::new(ProductKind::Group);
        let p = s.product(money(1000));
        let item = s.item("First", CatalogRef::Product(p.clone()), Decimal::ZERO);
        if let Some(record) = s.catalog.products.get_mut(&p.id) {
            record.state = prodline_core::LifecycleState::Inactive;
        }

        let err = price_selection(&s.composition, &s.catalog, &[SelectionLine::item(item, Decimal::ONE)])
            .unwrap_err();
        assert!(matches!(err, DomainError::StaleReference { entity: "product", .. }));
    }

    #[test]
    fn removed_item_is_a_stale_reference() {
        let mut s = Setup::new(ProductKind::Group);
        let p = s.product(money(1000));
        let item = s.item("First", CatalogRef::Product(p), Decimal::ZERO);
        s.run(CompositionAction::RemoveGroupItems { item_ids: vec![item] });

        let err = price_selection(&s.composition, &s.catalog, &[SelectionLine::item(item, Decimal::ONE)])
            .unwrap_err();
        assert!(matches!(err, DomainError::StaleReference { entity: "group item", .. }));
    }

    #[test]
    fn item_quantity_outside_range_is_rejected() {
        let mut s = Setup::new(ProductKind::Group);
        let p = s.product(money(1000));
        let item = s.item("First", CatalogRef::Product(p), Decimal::ZERO);

        let err = price_selection(
            &s.composition,
            &s.catalog,
            &[SelectionLine::item(item, Decimal::from(11))],
        )
        .unwrap_err();
        let v = err.as_validation().unwrap();
        assert_eq!(v.kind, ValidationKind::InvalidQuantity);
        assert_eq!(v.field, "lines[0].quantity");
    }

    #[test]
    fn components_are_priced_without_surcharge() {
        let mut s = Setup::new(ProductKind::Composite);
        let flour = s.product(money(240));
        let component_id = ComponentId::generate();
        s.run(CompositionAction::AttachComponent {
            component_id,
            spec: ComponentSpec {
                component_product_id: flour.id,
                quantity: Decimal::ONE,
                unit: "kg".to_string(),
                is_optional: false,
                assembly_order: 1,
                notes: None,
            },
            component: Some(flour.clone()),
        });

        let breakdown = price_selection(
            &s.composition,
            &s.catalog,
            &[SelectionLine::component(component_id, Decimal::new(15, 1))],
        )
        .unwrap();
        assert_eq!(breakdown.total, money(360));
        assert_eq!(breakdown.lines[0].extra_price, Decimal::ZERO);

        let err = price_selection(
            &s.composition,
            &s.catalog,
            &[SelectionLine::component(component_id, Decimal::ZERO)],
        )
        .unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::InvalidQuantity));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: the total of a selection equals the sum of the totals
            /// of each line priced on its own.
            #[test]
            fn total_is_additive_over_lines(
                spec in prop::collection::vec((1i64..100_000, 1i64..=10, 0i64..10_000), 1..8)
            ) {
                let mut s = Setup::new(ProductKind::Group);
                let mut lines = Vec::new();
                for (n, (price, qty, extra)) in spec.iter().enumerate() {
                    let p = s.product(money(*price));
                    let item = s.item(&format!("Item {n}"), CatalogRef::Product(p), money(*extra));
                    lines.push(SelectionLine::item(item, Decimal::from(*qty)));
                }

                let whole = price_selection(&s.composition, &s.catalog, &lines).unwrap();
                let mut sum = Decimal::ZERO;
                for line in &lines {
                    let single = price_selection(&s.composition, &s.catalog, std::slice::from_ref(line)).unwrap();
                    sum += single.total;
                }
                prop_assert_eq!(whole.total, sum);

                let expected: Decimal = spec
                    .iter()
                    .map(|(price, qty, extra)| money(*price) * Decimal::from(*qty) + money(*extra))
                    .sum();
                prop_assert_eq!(whole.total, expected);
            }
        }
    }
}
