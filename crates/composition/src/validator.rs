//! Constraint validator: the gate every graph mutation passes through.
//!
//! Rules run in a fixed order and the first failure wins:
//!
//! 1. well-formedness (quantities, ranges, selector exclusivity, names)
//! 2. assembly-order uniqueness per composite product, components and
//!    hierarchy links counted together
//! 3. name / identity uniqueness
//! 4. referential sanity (referenced records exist, are active, same group)
//!
//! The `validate_*` functions at the bottom compose the rule checks for one
//! mutation each. They only read; callers commit nothing unless they pass.

use std::collections::HashMap;

use rust_decimal::Decimal;

use prodline_catalog::{CategoryId, ProductId, ProductKind, ProductRecord};
use prodline_core::{Audited, ValidationError, ValidationKind};

use crate::hierarchy::ProductComponentHierarchy;
use crate::model::{
    AssemblyPart, AssemblyPosition, CatalogRef, ComponentSpec, ComponentUpdate, CompositeParts,
    ExchangeRuleId, ExchangeRuleSpec, ExchangeRuleUpdate, GroupItemId, GroupItemSpec,
    GroupItemUpdate, GroupSlots, HierarchyLinkSpec, HierarchyLinkUpdate, ItemSelector,
    QuantityRange,
};

pub type RuleResult<T = ()> = Result<T, ValidationError>;

// --- rule 1: well-formedness -------------------------------------------------

pub fn positive_quantity(quantity: Decimal, field: &str) -> RuleResult {
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::new(
            ValidationKind::InvalidQuantity,
            field,
            format!("quantity must be greater than zero (got {quantity})"),
        ));
    }
    Ok(())
}

pub fn quantity_range(range: &QuantityRange, min_field: &str, max_field: &str) -> RuleResult {
    if range.min.is_sign_negative() {
        return Err(ValidationError::new(
            ValidationKind::InvalidQuantity,
            min_field,
            format!("minimum quantity cannot be negative (got {})", range.min),
        ));
    }
    if range.max.is_sign_negative() {
        return Err(ValidationError::new(
            ValidationKind::InvalidQuantity,
            max_field,
            format!("maximum quantity cannot be negative (got {})", range.max),
        ));
    }
    if !range.is_unbounded() && range.min > range.max {
        return Err(ValidationError::new(
            ValidationKind::InvalidRange,
            min_field,
            format!("minimum {} exceeds maximum {}", range.min, range.max),
        ));
    }
    Ok(())
}

pub fn quantity_within(range: &QuantityRange, quantity: Decimal, field: &str) -> RuleResult {
    if !range.contains(quantity) {
        let upper = if range.is_unbounded() {
            "unbounded".to_string()
        } else {
            range.max.to_string()
        };
        return Err(ValidationError::new(
            ValidationKind::InvalidQuantity,
            field,
            format!("quantity {quantity} outside [{}, {upper}]", range.min),
        ));
    }
    Ok(())
}

pub fn non_negative_amount(amount: Decimal, field: &str) -> RuleResult {
    if amount.is_sign_negative() {
        return Err(ValidationError::new(
            ValidationKind::Malformed,
            field,
            format!("amount cannot be negative (got {amount})"),
        ));
    }
    Ok(())
}

pub fn positive_ratio(ratio: Decimal, field: &str) -> RuleResult {
    if ratio <= Decimal::ZERO {
        return Err(ValidationError::new(
            ValidationKind::InvalidQuantity,
            field,
            format!("exchange ratio must be greater than zero (got {ratio})"),
        ));
    }
    Ok(())
}

pub fn non_blank(value: &str, field: &str) -> RuleResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(
            ValidationKind::Malformed,
            field,
            "value cannot be empty",
        ));
    }
    Ok(())
}

/// Exactly one of product / category.
pub fn exclusive_selector(
    product_id: Option<ProductId>,
    category_id: Option<CategoryId>,
) -> RuleResult<ItemSelector> {
    match (product_id, category_id) {
        (Some(p), None) => Ok(ItemSelector::Product(p)),
        (None, Some(c)) => Ok(ItemSelector::Category(c)),
        (Some(_), Some(_)) => Err(ValidationError::new(
            ValidationKind::AmbiguousSelector,
            "product_id",
            "a group item binds to a product or a category, not both",
        )),
        (None, None) => Err(ValidationError::new(
            ValidationKind::AmbiguousSelector,
            "product_id",
            "a group item must bind to a product or a category",
        )),
    }
}

// --- rule 2: assembly order --------------------------------------------------

/// `order` is not taken by any active part other than `except`.
pub fn assembly_order_free(
    parts: &CompositeParts,
    order: i32,
    except: Option<AssemblyPart>,
) -> RuleResult {
    let taken = parts
        .active_positions()
        .find(|p| p.assembly_order == order && Some(p.part) != except);
    match taken {
        Some(p) => Err(duplicate_order(order, p.part)),
        None => Ok(()),
    }
}

/// No two positions share an order.
pub fn assembly_orders_unique(positions: impl IntoIterator<Item = AssemblyPosition>) -> RuleResult {
    let mut seen: HashMap<i32, AssemblyPart> = HashMap::new();
    for p in positions {
        if let Some(existing) = seen.insert(p.assembly_order, p.part) {
            return Err(duplicate_order(p.assembly_order, existing));
        }
    }
    Ok(())
}

fn duplicate_order(order: i32, holder: AssemblyPart) -> ValidationError {
    ValidationError::new(
        ValidationKind::DuplicateAssemblyOrder,
        "assembly_order",
        format!("assembly order {order} is already used by {holder}"),
    )
}

// --- rule 3: identity uniqueness ---------------------------------------------

/// Names compare trimmed and case-insensitively.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

pub fn option_name_free(slots: &GroupSlots, name: &str, except: Option<GroupItemId>) -> RuleResult {
    let clash = slots
        .active_items()
        .any(|i| Some(i.id) != except && same_name(&i.name, name));
    if clash {
        return Err(ValidationError::new(
            ValidationKind::DuplicateName,
            "name",
            format!("an active option named '{}' already exists in this group", name.trim()),
        ));
    }
    Ok(())
}

pub fn hierarchy_name_free(
    hierarchies: &[ProductComponentHierarchy],
    name: &str,
    except: Option<crate::model::HierarchyId>,
) -> RuleResult {
    let clash = prodline_core::entity::active(hierarchies)
        .any(|h| Some(h.id) != except && same_name(&h.name, name));
    if clash {
        return Err(ValidationError::new(
            ValidationKind::DuplicateName,
            "name",
            format!("an active hierarchy named '{}' already exists", name.trim()),
        ));
    }
    Ok(())
}

pub fn exchange_rule_free(
    slots: &GroupSlots,
    source: GroupItemId,
    target: GroupItemId,
    except: Option<ExchangeRuleId>,
) -> RuleResult {
    let clash = prodline_core::entity::active(&slots.exchange_rules).any(|r| {
        Some(r.id) != except && r.source_item_id == source && r.target_item_id == target
    });
    if clash {
        return Err(ValidationError::new(
            ValidationKind::DuplicateExchangeRule,
            "target_item_id",
            "an exchange rule for this source and target already exists",
        ));
    }
    Ok(())
}

// --- rule 4: referential sanity ----------------------------------------------

fn unknown(field: &str, what: &str, id: impl core::fmt::Display) -> ValidationError {
    ValidationError::new(
        ValidationKind::UnknownReference,
        field,
        format!("{what} {id} does not exist"),
    )
}

fn inactive(field: &str, what: &str, id: impl core::fmt::Display) -> ValidationError {
    ValidationError::new(
        ValidationKind::InactiveReference,
        field,
        format!("{what} {id} is inactive"),
    )
}

/// The resolved catalog record exists, is the one asked for and is active.
pub fn active_product(
    record: Option<&ProductRecord>,
    expected: ProductId,
    field: &str,
) -> RuleResult<ProductKind> {
    match record {
        Some(r) if r.id != expected => Err(unknown(field, "product", expected)),
        Some(r) if !r.is_active() => Err(inactive(field, "product", expected)),
        Some(r) => Ok(r.kind),
        None => Err(unknown(field, "product", expected)),
    }
}

pub fn active_catalog_target(target: Option<&CatalogRef>, selector: ItemSelector) -> RuleResult {
    match (selector, target) {
        (ItemSelector::Product(id), Some(CatalogRef::Product(r))) => {
            active_product(Some(r), id, "product_id").map(|_| ())
        }
        (ItemSelector::Product(id), _) => Err(unknown("product_id", "product", id)),
        (ItemSelector::Category(id), Some(CatalogRef::Category(c))) if c.id == id => {
            if c.is_active() {
                Ok(())
            } else {
                Err(inactive("category_id", "category", id))
            }
        }
        (ItemSelector::Category(id), _) => Err(unknown("category_id", "category", id)),
    }
}

pub fn active_hierarchy(
    hierarchy: Option<&ProductComponentHierarchy>,
    expected: crate::model::HierarchyId,
) -> RuleResult {
    match hierarchy {
        Some(h) if h.id == expected && h.is_active() => Ok(()),
        Some(h) if h.id == expected => Err(inactive("hierarchy_id", "hierarchy", expected)),
        _ => Err(unknown("hierarchy_id", "hierarchy", expected)),
    }
}

/// Both items belong to this group and are active.
pub fn same_group_items(slots: &GroupSlots, source: GroupItemId, target: GroupItemId) -> RuleResult {
    for (field, id) in [("source_item_id", source), ("target_item_id", target)] {
        match slots.item(id) {
            None => {
                return Err(ValidationError::new(
                    ValidationKind::GroupMismatch,
                    field,
                    format!("group item {id} does not belong to this product group"),
                ));
            }
            Some(item) if !item.is_active() => return Err(inactive(field, "group item", id)),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Owners of a composition graph must be composite or group products.
pub fn graph_owner(record: Option<&ProductRecord>, expected: ProductId) -> RuleResult<ProductKind> {
    let kind = active_product(record, expected, "product_id")?;
    if !kind.owns_graph() {
        return Err(ValidationError::new(
            ValidationKind::KindMismatch,
            "product_id",
            format!("product {expected} is a simple product and cannot own a composition"),
        ));
    }
    Ok(kind)
}

// --- composed gates, one per mutation -----------------------------------------

pub fn validate_new_component(
    owner: ProductId,
    parts: &CompositeParts,
    spec: &ComponentSpec,
    component: Option<&ProductRecord>,
) -> RuleResult {
    positive_quantity(spec.quantity, "quantity")?;
    if spec.component_product_id == owner {
        return Err(ValidationError::new(
            ValidationKind::Malformed,
            "component_product_id",
            "a composite product cannot contain itself",
        ));
    }
    assembly_order_free(parts, spec.assembly_order, None)?;
    active_product(component, spec.component_product_id, "component_product_id")?;
    Ok(())
}

pub fn validate_component_update(update: &ComponentUpdate) -> RuleResult {
    positive_quantity(update.quantity, "quantity")
}

pub fn validate_new_hierarchy_link(
    parts: &CompositeParts,
    spec: &HierarchyLinkSpec,
    hierarchy: Option<&ProductComponentHierarchy>,
) -> RuleResult {
    let range = QuantityRange::new(spec.min_quantity, spec.max_quantity);
    quantity_range(&range, "min_quantity", "max_quantity")?;
    assembly_order_free(parts, spec.assembly_order, None)?;
    active_hierarchy(hierarchy, spec.hierarchy_id)?;
    Ok(())
}

pub fn validate_hierarchy_link_update(update: &HierarchyLinkUpdate) -> RuleResult {
    let range = QuantityRange::new(update.min_quantity, update.max_quantity);
    quantity_range(&range, "min_quantity", "max_quantity")
}

/// Returns the selector and effective default quantity on success.
pub fn validate_new_group_item(
    slots: &GroupSlots,
    spec: &GroupItemSpec,
    target: Option<&CatalogRef>,
) -> RuleResult<(ItemSelector, Decimal)> {
    let selector = exclusive_selector(spec.product_id, spec.category_id)?;
    non_blank(&spec.name, "name")?;
    let range = QuantityRange::new(spec.min_quantity, spec.max_quantity);
    quantity_range(&range, "min_quantity", "max_quantity")?;
    let default = spec.default_quantity.unwrap_or(range.min);
    quantity_within(&range, default, "default_quantity")?;
    non_negative_amount(spec.extra_price, "extra_price")?;
    option_name_free(slots, &spec.name, None)?;
    active_catalog_target(target, selector)?;
    Ok((selector, default))
}

/// Returns the effective default quantity on success.
pub fn validate_group_item_update(
    slots: &GroupSlots,
    item_id: GroupItemId,
    update: &GroupItemUpdate,
) -> RuleResult<Decimal> {
    non_blank(&update.name, "name")?;
    let range = QuantityRange::new(update.min_quantity, update.max_quantity);
    quantity_range(&range, "min_quantity", "max_quantity")?;
    let default = update.default_quantity.unwrap_or(range.min);
    quantity_within(&range, default, "default_quantity")?;
    non_negative_amount(update.extra_price, "extra_price")?;
    option_name_free(slots, &update.name, Some(item_id))?;
    Ok(default)
}

pub fn validate_new_exchange_rule(slots: &GroupSlots, spec: &ExchangeRuleSpec) -> RuleResult {
    positive_ratio(spec.ratio, "ratio")?;
    if spec.source_item_id == spec.target_item_id {
        return Err(ValidationError::new(
            ValidationKind::Malformed,
            "target_item_id",
            "an item cannot be exchanged for itself",
        ));
    }
    exchange_rule_free(slots, spec.source_item_id, spec.target_item_id, None)?;
    same_group_items(slots, spec.source_item_id, spec.target_item_id)?;
    Ok(())
}

pub fn validate_exchange_rule_update(
    slots: &GroupSlots,
    source: GroupItemId,
    target: GroupItemId,
    update: &ExchangeRuleUpdate,
) -> RuleResult {
    positive_ratio(update.ratio, "ratio")?;
    if update.is_active {
        same_group_items(slots, source, target)?;
    }
    Ok(())
}
