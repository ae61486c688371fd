//! Product composition and substitution engine.
//!
//! Business rules for composite and group products, implemented as
//! deterministic domain logic (no IO, no storage):
//!
//! - [`composition`]: the `ProductComposition` aggregate (one per composite/group product)
//! - [`hierarchy`]: the per-tenant catalog of reusable hierarchy templates
//! - [`validator`]: the ordered rule gate every mutation passes through
//! - [`substitution`]: exchange-rule resolution for group items
//! - [`pricing`]: price aggregation for a customer's selection

pub mod composition;
pub mod hierarchy;
pub mod model;
pub mod pricing;
pub mod substitution;
pub mod validator;

pub use composition::{
    CompositionAction, CompositionChange, CompositionCommand, CompositionEvent, ProductComposition,
};
pub use hierarchy::{
    HierarchyAction, HierarchyCatalog, HierarchyChange, HierarchyCommand, HierarchyEvent,
    ProductComponentHierarchy,
};
pub use model::{
    AssemblyPart, AssemblyPosition, CatalogRef, ComponentId, ComponentSpec, ComponentUpdate,
    CompositeParts, CompositionGraph, ExchangeRule, ExchangeRuleId, ExchangeRuleSpec,
    ExchangeRuleUpdate, GroupItemId, GroupItemSpec, GroupItemUpdate, GroupSlots, HierarchyId,
    HierarchyLink, HierarchyLinkId, HierarchyLinkSpec, HierarchyLinkUpdate, ItemSelector,
    ProductComponent, ProductGroupItem, QuantityRange,
};
pub use pricing::{PriceBreakdown, PricedLine, SelectedPart, SelectionLine, price_selection};
pub use substitution::{
    DriftReason, DriftedRule, Substitute, Substitution, SubstitutionQuery, resolve_substitutes,
};
