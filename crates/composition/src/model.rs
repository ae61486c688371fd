//! Entities and value objects of the composition graph.
//!
//! A composite product decomposes into components and hierarchy links; a group
//! product into selectable items and the exchange rules between them. The graph
//! is one level deep: hierarchies do not nest.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use prodline_catalog::{CategoryId, CategoryRecord, ProductId, ProductRecord};
use prodline_core::{Audited, AuditStamp, Entity, EntityId, LifecycleState, ValueObject};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub EntityId);

        impl $name {
            pub fn new(id: EntityId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(EntityId::new())
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

entity_id!(
    /// Identifier of a direct composite-to-component relation.
    ComponentId
);
entity_id!(
    /// Identifier of a reusable hierarchy template.
    HierarchyId
);
entity_id!(
    /// Identifier of a composite-to-hierarchy link.
    HierarchyLinkId
);
entity_id!(
    /// Identifier of a selectable slot in a group product.
    GroupItemId
);
entity_id!(
    /// Identifier of an exchange rule between two group items.
    ExchangeRuleId
);

/// Inclusive quantity bounds. A zero `max` means "no upper bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl ValueObject for QuantityRange {}

impl QuantityRange {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max.is_zero()
    }

    /// `min >= 0`, `max >= 0` and `min <= max` unless unbounded.
    pub fn is_well_formed(&self) -> bool {
        !self.min.is_sign_negative()
            && !self.max.is_sign_negative()
            && (self.is_unbounded() || self.min <= self.max)
    }

    pub fn contains(&self, quantity: Decimal) -> bool {
        quantity >= self.min && (self.is_unbounded() || quantity <= self.max)
    }
}

/// Direct composite → component relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductComponent {
    pub id: ComponentId,
    pub component_product_id: ProductId,
    pub quantity: Decimal,
    pub unit: String,
    pub is_optional: bool,
    pub assembly_order: i32,
    pub notes: Option<String>,
    pub state: LifecycleState,
    pub audit: AuditStamp,
}

/// Composite → hierarchy template link (`CompositeProductXHierarchy`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLink {
    pub id: HierarchyLinkId,
    pub hierarchy_id: HierarchyId,
    pub range: QuantityRange,
    pub is_optional: bool,
    pub assembly_order: i32,
    pub notes: Option<String>,
    pub state: LifecycleState,
    pub audit: AuditStamp,
}

/// What a group item binds to: one concrete product or a whole category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSelector {
    Product(ProductId),
    Category(CategoryId),
}

/// One selectable slot within a group product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductGroupItem {
    pub id: GroupItemId,
    pub name: String,
    pub selector: ItemSelector,
    pub range: QuantityRange,
    pub default_quantity: Decimal,
    pub is_optional: bool,
    /// Flat surcharge, not scaled by quantity.
    pub extra_price: Decimal,
    pub state: LifecycleState,
    pub audit: AuditStamp,
}

/// Declared substitution of one group item for another within the same group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRule {
    pub id: ExchangeRuleId,
    pub group_id: ProductId,
    pub source_item_id: GroupItemId,
    pub target_item_id: GroupItemId,
    /// Source units per one target unit.
    pub ratio: Decimal,
    pub is_active: bool,
    pub state: LifecycleState,
    pub audit: AuditStamp,
}

impl ExchangeRule {
    /// Gated on both the business flag and the soft lifecycle.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.state.is_active()
    }
}

macro_rules! audited_entity {
    ($t:ty, $id:ty) => {
        impl Entity for $t {
            type Id = $id;

            fn id(&self) -> &Self::Id {
                &self.id
            }
        }

        impl Audited for $t {
            fn audit(&self) -> &AuditStamp {
                &self.audit
            }

            fn state(&self) -> LifecycleState {
                self.state
            }
        }
    };
}

audited_entity!(ProductComponent, ComponentId);
audited_entity!(HierarchyLink, HierarchyLinkId);
audited_entity!(ProductGroupItem, GroupItemId);
audited_entity!(ExchangeRule, ExchangeRuleId);

/// A part of a composite product that occupies an assembly position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyPart {
    Component(ComponentId),
    Hierarchy(HierarchyLinkId),
}

impl core::fmt::Display for AssemblyPart {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AssemblyPart::Component(id) => write!(f, "component {id}"),
            AssemblyPart::Hierarchy(id) => write!(f, "hierarchy link {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyPosition {
    pub part: AssemblyPart,
    pub assembly_order: i32,
}

/// Parts of a composite product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeParts {
    pub components: Vec<ProductComponent>,
    pub hierarchy_links: Vec<HierarchyLink>,
}

impl CompositeParts {
    pub fn component(&self, id: ComponentId) -> Option<&ProductComponent> {
        prodline_core::entity::find_by_id(&self.components, &id)
    }

    pub fn hierarchy_link(&self, id: HierarchyLinkId) -> Option<&HierarchyLink> {
        prodline_core::entity::find_by_id(&self.hierarchy_links, &id)
    }

    /// Lifecycle state of a part, `None` if it is not part of this product.
    pub fn part_state(&self, part: AssemblyPart) -> Option<LifecycleState> {
        match part {
            AssemblyPart::Component(id) => self.component(id).map(|c| c.state),
            AssemblyPart::Hierarchy(id) => self.hierarchy_link(id).map(|l| l.state),
        }
    }

    /// Every active part with its assembly order, components first.
    pub fn active_positions(&self) -> impl Iterator<Item = AssemblyPosition> + '_ {
        let components = prodline_core::entity::active(&self.components).map(|c| AssemblyPosition {
            part: AssemblyPart::Component(c.id),
            assembly_order: c.assembly_order,
        });
        let links = prodline_core::entity::active(&self.hierarchy_links).map(|l| AssemblyPosition {
            part: AssemblyPart::Hierarchy(l.id),
            assembly_order: l.assembly_order,
        });
        components.chain(links)
    }

    /// Active parts sorted by build sequence.
    pub fn build_sequence(&self) -> Vec<AssemblyPosition> {
        let mut positions: Vec<_> = self.active_positions().collect();
        positions.sort_by_key(|p| p.assembly_order);
        positions
    }
}

/// Slots and exchange rules of a group product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSlots {
    pub items: Vec<ProductGroupItem>,
    pub exchange_rules: Vec<ExchangeRule>,
}

impl GroupSlots {
    pub fn item(&self, id: GroupItemId) -> Option<&ProductGroupItem> {
        prodline_core::entity::find_by_id(&self.items, &id)
    }

    pub fn exchange_rule(&self, id: ExchangeRuleId) -> Option<&ExchangeRule> {
        prodline_core::entity::find_by_id(&self.exchange_rules, &id)
    }

    pub fn active_items(&self) -> impl Iterator<Item = &ProductGroupItem> {
        prodline_core::entity::active(&self.items)
    }
}

/// Kind-specific decomposition of an owning product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionGraph {
    Composite(CompositeParts),
    Group(GroupSlots),
}

impl CompositionGraph {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CompositionGraph::Composite(_) => "composite",
            CompositionGraph::Group(_) => "group",
        }
    }
}

/// Input for attaching a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub component_product_id: ProductId,
    pub quantity: Decimal,
    pub unit: String,
    pub is_optional: bool,
    pub assembly_order: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    pub quantity: Decimal,
    pub unit: String,
    pub is_optional: bool,
    pub notes: Option<String>,
}

/// Input for linking a hierarchy template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLinkSpec {
    pub hierarchy_id: HierarchyId,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub is_optional: bool,
    pub assembly_order: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLinkUpdate {
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub is_optional: bool,
    pub notes: Option<String>,
}

/// Input for adding a group item. Exactly one of `product_id` / `category_id`
/// must be set; this is checked by the validator, not by the type, because
/// the caller's raw input is what gets rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupItemSpec {
    pub name: String,
    pub product_id: Option<ProductId>,
    pub category_id: Option<CategoryId>,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    /// Falls back to `min_quantity` when absent.
    pub default_quantity: Option<Decimal>,
    pub is_optional: bool,
    pub extra_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupItemUpdate {
    pub name: String,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub default_quantity: Option<Decimal>,
    pub is_optional: bool,
    pub extra_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRuleSpec {
    pub source_item_id: GroupItemId,
    pub target_item_id: GroupItemId,
    pub ratio: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRuleUpdate {
    pub ratio: Decimal,
    pub is_active: bool,
}

/// Catalog record resolved for a group item's selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogRef {
    Product(ProductRecord),
    Category(CategoryRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn zero_max_is_unbounded() {
        let range = QuantityRange::new(d(3), d(0));
        assert!(range.is_unbounded());
        assert!(range.is_well_formed());
        assert!(range.contains(d(1_000)));
        assert!(!range.contains(d(2)));
    }

    #[test]
    fn bounded_range_is_inclusive() {
        let range = QuantityRange::new(d(2), d(5));
        assert!(range.contains(d(2)));
        assert!(range.contains(d(5)));
        assert!(!range.contains(d(6)));
        assert!(!range.contains(Decimal::new(19, 1)));
    }

    #[test]
    fn inverted_or_negative_ranges_are_malformed() {
        assert!(!QuantityRange::new(d(5), d(2)).is_well_formed());
        assert!(!QuantityRange::new(d(-1), d(2)).is_well_formed());
        assert!(!QuantityRange::new(d(0), d(-2)).is_well_formed());
    }

    #[test]
    fn assembly_part_serializes_with_tag() {
        let id = ComponentId::generate();
        let json = serde_json::to_value(AssemblyPart::Component(id)).unwrap();
        assert_eq!(json["component"], id.to_string());
    }
}
