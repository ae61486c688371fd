use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use prodline_catalog::{ProductId, ProductKind, ProductRecord};
use prodline_core::{
    Aggregate, AggregateRoot, Audited, AuditStamp, DomainError, DomainResult, LifecycleState,
    TenantId, UserId, ValidationError, ValidationKind,
};
use prodline_events::Event;

use crate::hierarchy::ProductComponentHierarchy;
use crate::model::{
    AssemblyPart, AssemblyPosition, CatalogRef, ComponentId, ComponentSpec, ComponentUpdate,
    CompositeParts, CompositionGraph, ExchangeRule, ExchangeRuleId, ExchangeRuleSpec,
    ExchangeRuleUpdate, GroupItemId, GroupItemSpec, GroupItemUpdate, GroupSlots, HierarchyLink,
    HierarchyLinkId, HierarchyLinkSpec, HierarchyLinkUpdate, ProductComponent, ProductGroupItem,
    QuantityRange,
};
use crate::validator;

/// Aggregate root: the composition graph owned by one composite or group product.
///
/// The stream id is the owning product's id. Every mutation goes through
/// `handle`, which runs the constraint validator against the current graph
/// and either rejects the whole command or returns the events that apply it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductComposition {
    id: ProductId,
    tenant_id: Option<TenantId>,
    graph: Option<CompositionGraph>,
    audit: Option<AuditStamp>,
    version: u64,
}

impl ProductComposition {
    /// Create an empty, not-yet-defined aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            graph: None,
            audit: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_defined(&self) -> bool {
        self.graph.is_some()
    }

    pub fn graph(&self) -> Option<&CompositionGraph> {
        self.graph.as_ref()
    }

    pub fn audit(&self) -> Option<&AuditStamp> {
        self.audit.as_ref()
    }

    pub fn kind(&self) -> Option<ProductKind> {
        self.graph.as_ref().map(|g| match g {
            CompositionGraph::Composite(_) => ProductKind::Composite,
            CompositionGraph::Group(_) => ProductKind::Group,
        })
    }

    /// Parts of a composite product; fails for undefined or group compositions.
    pub fn composite_parts(&self) -> DomainResult<&CompositeParts> {
        match &self.graph {
            Some(CompositionGraph::Composite(parts)) => Ok(parts),
            Some(CompositionGraph::Group(_)) => Err(self.wrong_kind("composite")),
            None => Err(DomainError::not_found()),
        }
    }

    /// Slots of a group product; fails for undefined or composite compositions.
    pub fn group_slots(&self) -> DomainResult<&GroupSlots> {
        match &self.graph {
            Some(CompositionGraph::Group(slots)) => Ok(slots),
            Some(CompositionGraph::Composite(_)) => Err(self.wrong_kind("group")),
            None => Err(DomainError::not_found()),
        }
    }

    fn wrong_kind(&self, expected: &str) -> DomainError {
        let actual = self.graph.as_ref().map(|g| g.kind_name()).unwrap_or("undefined");
        DomainError::validation(
            ValidationKind::KindMismatch,
            "product_id",
            format!("product {} is a {actual} product, expected {expected}", self.id),
        )
    }

    fn composite_mut(&mut self) -> Option<&mut CompositeParts> {
        match &mut self.graph {
            Some(CompositionGraph::Composite(parts)) => Some(parts),
            _ => None,
        }
    }

    fn group_mut(&mut self) -> Option<&mut GroupSlots> {
        match &mut self.graph {
            Some(CompositionGraph::Group(slots)) => Some(slots),
            _ => None,
        }
    }
}

impl AggregateRoot for ProductComposition {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A mutation request against one product's composition graph.
///
/// Catalog and hierarchy records the mutation refers to are resolved by the
/// caller and carried in the action, which keeps `handle` free of IO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionCommand {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
    pub action: CompositionAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositionAction {
    Define {
        owner: Option<ProductRecord>,
    },
    AttachComponent {
        component_id: ComponentId,
        spec: ComponentSpec,
        component: Option<ProductRecord>,
    },
    UpdateComponent {
        component_id: ComponentId,
        update: ComponentUpdate,
    },
    AttachHierarchy {
        link_id: HierarchyLinkId,
        spec: HierarchyLinkSpec,
        hierarchy: Option<ProductComponentHierarchy>,
    },
    UpdateHierarchyLink {
        link_id: HierarchyLinkId,
        update: HierarchyLinkUpdate,
    },
    /// Atomic reorder; uniqueness is checked on the final positions only.
    ReorderAssembly {
        positions: Vec<AssemblyPosition>,
    },
    RemoveParts {
        parts: Vec<AssemblyPart>,
    },
    RestoreParts {
        parts: Vec<AssemblyPart>,
    },
    AddGroupItem {
        item_id: GroupItemId,
        spec: GroupItemSpec,
        target: Option<CatalogRef>,
    },
    UpdateGroupItem {
        item_id: GroupItemId,
        update: GroupItemUpdate,
    },
    RemoveGroupItems {
        item_ids: Vec<GroupItemId>,
    },
    RestoreGroupItems {
        item_ids: Vec<GroupItemId>,
    },
    AddExchangeRule {
        rule_id: ExchangeRuleId,
        spec: ExchangeRuleSpec,
    },
    UpdateExchangeRule {
        rule_id: ExchangeRuleId,
        update: ExchangeRuleUpdate,
    },
    RemoveExchangeRules {
        rule_ids: Vec<ExchangeRuleId>,
    },
    /// Deactivates every active rule of the group and adds `rules`, atomically.
    ReplaceExchangeRules {
        rules: Vec<(ExchangeRuleId, ExchangeRuleSpec)>,
    },
}

impl CompositionAction {
    /// Member count of batch actions, `None` for single-entity actions.
    pub fn batch_len(&self) -> Option<usize> {
        match self {
            CompositionAction::ReorderAssembly { positions } => Some(positions.len()),
            CompositionAction::RemoveParts { parts } | CompositionAction::RestoreParts { parts } => {
                Some(parts.len())
            }
            CompositionAction::RemoveGroupItems { item_ids }
            | CompositionAction::RestoreGroupItems { item_ids } => Some(item_ids.len()),
            CompositionAction::RemoveExchangeRules { rule_ids } => Some(rule_ids.len()),
            CompositionAction::ReplaceExchangeRules { rules } => Some(rules.len()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompositionAction::Define { .. } => "define",
            CompositionAction::AttachComponent { .. } => "attach_component",
            CompositionAction::UpdateComponent { .. } => "update_component",
            CompositionAction::AttachHierarchy { .. } => "attach_hierarchy",
            CompositionAction::UpdateHierarchyLink { .. } => "update_hierarchy_link",
            CompositionAction::ReorderAssembly { .. } => "reorder_assembly",
            CompositionAction::RemoveParts { .. } => "remove_parts",
            CompositionAction::RestoreParts { .. } => "restore_parts",
            CompositionAction::AddGroupItem { .. } => "add_group_item",
            CompositionAction::UpdateGroupItem { .. } => "update_group_item",
            CompositionAction::RemoveGroupItems { .. } => "remove_group_items",
            CompositionAction::RestoreGroupItems { .. } => "restore_group_items",
            CompositionAction::AddExchangeRule { .. } => "add_exchange_rule",
            CompositionAction::UpdateExchangeRule { .. } => "update_exchange_rule",
            CompositionAction::RemoveExchangeRules { .. } => "remove_exchange_rules",
            CompositionAction::ReplaceExchangeRules { .. } => "replace_exchange_rules",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionEvent {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
    pub change: CompositionChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositionChange {
    Defined {
        kind: ProductKind,
    },
    ComponentAttached(ProductComponent),
    ComponentUpdated {
        component_id: ComponentId,
        update: ComponentUpdate,
    },
    HierarchyAttached(HierarchyLink),
    HierarchyLinkUpdated {
        link_id: HierarchyLinkId,
        update: HierarchyLinkUpdate,
    },
    AssemblyReordered {
        positions: Vec<AssemblyPosition>,
    },
    PartsDeactivated {
        parts: Vec<AssemblyPart>,
    },
    PartsReactivated {
        parts: Vec<AssemblyPart>,
    },
    GroupItemAdded(ProductGroupItem),
    GroupItemUpdated {
        item_id: GroupItemId,
        name: String,
        range: QuantityRange,
        default_quantity: Decimal,
        is_optional: bool,
        extra_price: Decimal,
    },
    GroupItemsDeactivated {
        item_ids: Vec<GroupItemId>,
    },
    GroupItemsReactivated {
        item_ids: Vec<GroupItemId>,
    },
    ExchangeRuleAdded(ExchangeRule),
    ExchangeRuleUpdated {
        rule_id: ExchangeRuleId,
        update: ExchangeRuleUpdate,
    },
    ExchangeRulesDeactivated {
        rule_ids: Vec<ExchangeRuleId>,
    },
}

impl Event for CompositionEvent {
    fn event_type(&self) -> &'static str {
        match self.change {
            CompositionChange::Defined { .. } => "composition.defined",
            CompositionChange::ComponentAttached(_) => "composition.component.attached",
            CompositionChange::ComponentUpdated { .. } => "composition.component.updated",
            CompositionChange::HierarchyAttached(_) => "composition.hierarchy_link.attached",
            CompositionChange::HierarchyLinkUpdated { .. } => "composition.hierarchy_link.updated",
            CompositionChange::AssemblyReordered { .. } => "composition.assembly.reordered",
            CompositionChange::PartsDeactivated { .. } => "composition.parts.deactivated",
            CompositionChange::PartsReactivated { .. } => "composition.parts.reactivated",
            CompositionChange::GroupItemAdded(_) => "composition.group_item.added",
            CompositionChange::GroupItemUpdated { .. } => "composition.group_item.updated",
            CompositionChange::GroupItemsDeactivated { .. } => "composition.group_items.deactivated",
            CompositionChange::GroupItemsReactivated { .. } => "composition.group_items.reactivated",
            CompositionChange::ExchangeRuleAdded(_) => "composition.exchange_rule.added",
            CompositionChange::ExchangeRuleUpdated { .. } => "composition.exchange_rule.updated",
            CompositionChange::ExchangeRulesDeactivated { .. } => {
                "composition.exchange_rules.deactivated"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Aggregate for ProductComposition {
    type Command = CompositionCommand;
    type Event = CompositionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        let (actor, at) = (event.actor, event.occurred_at);
        match &event.change {
            CompositionChange::Defined { kind } => {
                self.id = event.product_id;
                self.tenant_id = Some(event.tenant_id);
                self.graph = Some(match kind {
                    ProductKind::Group => CompositionGraph::Group(GroupSlots::default()),
                    _ => CompositionGraph::Composite(CompositeParts::default()),
                });
                self.audit = Some(AuditStamp::created(actor, at));
            }
            CompositionChange::ComponentAttached(c) => {
                if let Some(parts) = self.composite_mut() {
                    parts.components.push(c.clone());
                }
            }
            CompositionChange::ComponentUpdated {
                component_id,
                update,
            } => {
                if let Some(c) = self
                    .composite_mut()
                    .and_then(|p| p.components.iter_mut().find(|c| c.id == *component_id))
                {
                    c.quantity = update.quantity;
                    c.unit = update.unit.clone();
                    c.is_optional = update.is_optional;
                    c.notes = update.notes.clone();
                    c.audit.touch(actor, at);
                }
            }
            CompositionChange::HierarchyAttached(link) => {
                if let Some(parts) = self.composite_mut() {
                    parts.hierarchy_links.push(link.clone());
                }
            }
            CompositionChange::HierarchyLinkUpdated { link_id, update } => {
                if let Some(l) = self
                    .composite_mut()
                    .and_then(|p| p.hierarchy_links.iter_mut().find(|l| l.id == *link_id))
                {
                    l.range = QuantityRange::new(update.min_quantity, update.max_quantity);
                    l.is_optional = update.is_optional;
                    l.notes = update.notes.clone();
                    l.audit.touch(actor, at);
                }
            }
            CompositionChange::AssemblyReordered { positions } => {
                if let Some(parts) = self.composite_mut() {
                    for p in positions {
                        set_part(parts, p.part, actor, at, |order, _| {
                            *order = p.assembly_order;
                        });
                    }
                }
            }
            CompositionChange::PartsDeactivated { parts: changed } => {
                if let Some(parts) = self.composite_mut() {
                    for part in changed {
                        set_part(parts, *part, actor, at, |_, state| {
                            *state = LifecycleState::Inactive;
                        });
                    }
                }
            }
            CompositionChange::PartsReactivated { parts: changed } => {
                if let Some(parts) = self.composite_mut() {
                    for part in changed {
                        set_part(parts, *part, actor, at, |_, state| {
                            *state = LifecycleState::Active;
                        });
                    }
                }
            }
            CompositionChange::GroupItemAdded(item) => {
                if let Some(slots) = self.group_mut() {
                    slots.items.push(item.clone());
                }
            }
            CompositionChange::GroupItemUpdated {
                item_id,
                name,
                range,
                default_quantity,
                is_optional,
                extra_price,
            } => {
                if let Some(i) = self
                    .group_mut()
                    .and_then(|s| s.items.iter_mut().find(|i| i.id == *item_id))
                {
                    i.name = name.clone();
                    i.range = *range;
                    i.default_quantity = *default_quantity;
                    i.is_optional = *is_optional;
                    i.extra_price = *extra_price;
                    i.audit.touch(actor, at);
                }
            }
            CompositionChange::GroupItemsDeactivated { item_ids } => {
                self.set_item_states(item_ids, LifecycleState::Inactive, actor, at);
            }
            CompositionChange::GroupItemsReactivated { item_ids } => {
                self.set_item_states(item_ids, LifecycleState::Active, actor, at);
            }
            CompositionChange::ExchangeRuleAdded(rule) => {
                if let Some(slots) = self.group_mut() {
                    slots.exchange_rules.push(rule.clone());
                }
            }
            CompositionChange::ExchangeRuleUpdated { rule_id, update } => {
                if let Some(r) = self
                    .group_mut()
                    .and_then(|s| s.exchange_rules.iter_mut().find(|r| r.id == *rule_id))
                {
                    r.ratio = update.ratio;
                    r.is_active = update.is_active;
                    r.audit.touch(actor, at);
                }
            }
            CompositionChange::ExchangeRulesDeactivated { rule_ids } => {
                if let Some(slots) = self.group_mut() {
                    for r in slots.exchange_rules.iter_mut().filter(|r| rule_ids.contains(&r.id)) {
                        r.state = LifecycleState::Inactive;
                        r.audit.touch(actor, at);
                    }
                }
            }
        }

        if let Some(audit) = self.audit.as_mut() {
            audit.touch(actor, at);
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_product_id(command.product_id)?;
        self.ensure_tenant(command.tenant_id)?;

        let changes = match &command.action {
            CompositionAction::Define { owner } => self.handle_define(owner.as_ref())?,
            CompositionAction::AttachComponent {
                component_id,
                spec,
                component,
            } => self.handle_attach_component(*component_id, spec, component.as_ref(), command)?,
            CompositionAction::UpdateComponent {
                component_id,
                update,
            } => self.handle_update_component(*component_id, update)?,
            CompositionAction::AttachHierarchy {
                link_id,
                spec,
                hierarchy,
            } => self.handle_attach_hierarchy(*link_id, spec, hierarchy.as_ref(), command)?,
            CompositionAction::UpdateHierarchyLink { link_id, update } => {
                self.handle_update_hierarchy_link(*link_id, update)?
            }
            CompositionAction::ReorderAssembly { positions } => self.handle_reorder(positions)?,
            CompositionAction::RemoveParts { parts } => self.handle_remove_parts(parts)?,
            CompositionAction::RestoreParts { parts } => self.handle_restore_parts(parts)?,
            CompositionAction::AddGroupItem {
                item_id,
                spec,
                target,
            } => self.handle_add_group_item(*item_id, spec, target.as_ref(), command)?,
            CompositionAction::UpdateGroupItem { item_id, update } => {
                self.handle_update_group_item(*item_id, update)?
            }
            CompositionAction::RemoveGroupItems { item_ids } => {
                self.handle_remove_group_items(item_ids)?
            }
            CompositionAction::RestoreGroupItems { item_ids } => {
                self.handle_restore_group_items(item_ids)?
            }
            CompositionAction::AddExchangeRule { rule_id, spec } => {
                vec![self.new_exchange_rule(self.group_slots()?, *rule_id, spec, command)?]
            }
            CompositionAction::UpdateExchangeRule { rule_id, update } => {
                self.handle_update_exchange_rule(*rule_id, update)?
            }
            CompositionAction::RemoveExchangeRules { rule_ids } => {
                self.handle_remove_exchange_rules(rule_ids)?
            }
            CompositionAction::ReplaceExchangeRules { rules } => {
                self.handle_replace_exchange_rules(rules, command)?
            }
        };

        Ok(changes
            .into_iter()
            .map(|change| event_for(command, change))
            .collect())
    }
}

fn event_for(command: &CompositionCommand, change: CompositionChange) -> CompositionEvent {
    CompositionEvent {
        tenant_id: command.tenant_id,
        product_id: command.product_id,
        actor: command.actor,
        occurred_at: command.occurred_at,
        change,
    }
}

fn set_part(
    parts: &mut CompositeParts,
    part: AssemblyPart,
    actor: UserId,
    at: DateTime<Utc>,
    f: impl FnOnce(&mut i32, &mut LifecycleState),
) {
    match part {
        AssemblyPart::Component(id) => {
            if let Some(c) = parts.components.iter_mut().find(|c| c.id == id) {
                f(&mut c.assembly_order, &mut c.state);
                c.audit.touch(actor, at);
            }
        }
        AssemblyPart::Hierarchy(id) => {
            if let Some(l) = parts.hierarchy_links.iter_mut().find(|l| l.id == id) {
                f(&mut l.assembly_order, &mut l.state);
                l.audit.touch(actor, at);
            }
        }
    }
}

/// Re-point a validation failure at the batch member that caused it.
fn in_batch(err: ValidationError, member: String) -> DomainError {
    DomainError::Validation(ValidationError::new(err.kind, member, err.message))
}

fn unknown_member(field: String, what: &str, id: impl core::fmt::Display) -> DomainError {
    DomainError::validation(
        ValidationKind::UnknownReference,
        field,
        format!("{what} {id} is not part of this product"),
    )
}

fn inactive_member(field: String, what: &str, id: impl core::fmt::Display) -> DomainError {
    DomainError::validation(
        ValidationKind::InactiveReference,
        field,
        format!("{what} {id} is inactive"),
    )
}

impl ProductComposition {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(DomainError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn set_item_states(
        &mut self,
        ids: &[GroupItemId],
        state: LifecycleState,
        actor: UserId,
        at: DateTime<Utc>,
    ) {
        if let Some(slots) = self.group_mut() {
            for i in slots.items.iter_mut().filter(|i| ids.contains(&i.id)) {
                i.state = state;
                i.audit.touch(actor, at);
            }
        }
    }

    fn handle_define(&self, owner: Option<&ProductRecord>) -> DomainResult<Vec<CompositionChange>> {
        if self.graph.is_some() {
            return Err(DomainError::conflict("composition already defined"));
        }
        let kind = validator::graph_owner(owner, self.id)?;
        Ok(vec![CompositionChange::Defined { kind }])
    }

    fn handle_attach_component(
        &self,
        component_id: ComponentId,
        spec: &ComponentSpec,
        component: Option<&ProductRecord>,
        command: &CompositionCommand,
    ) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;
        if parts.component(component_id).is_some() {
            return Err(DomainError::conflict(format!("component {component_id} already exists")));
        }
        validator::validate_new_component(self.id, parts, spec, component)?;

        Ok(vec![CompositionChange::ComponentAttached(ProductComponent {
            id: component_id,
            component_product_id: spec.component_product_id,
            quantity: spec.quantity,
            unit: spec.unit.trim().to_string(),
            is_optional: spec.is_optional,
            assembly_order: spec.assembly_order,
            notes: spec.notes.clone(),
            state: LifecycleState::Active,
            audit: AuditStamp::created(command.actor, command.occurred_at),
        })])
    }

    fn handle_update_component(
        &self,
        component_id: ComponentId,
        update: &ComponentUpdate,
    ) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;
        let existing = parts
            .component(component_id)
            .ok_or_else(|| unknown_member("component_id".into(), "component", component_id))?;
        if !existing.is_active() {
            return Err(inactive_member("component_id".into(), "component", component_id));
        }
        validator::validate_component_update(update)?;

        Ok(vec![CompositionChange::ComponentUpdated {
            component_id,
            update: update.clone(),
        }])
    }

    fn handle_attach_hierarchy(
        &self,
        link_id: HierarchyLinkId,
        spec: &HierarchyLinkSpec,
        hierarchy: Option<&ProductComponentHierarchy>,
        command: &CompositionCommand,
    ) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;
        if parts.hierarchy_link(link_id).is_some() {
            return Err(DomainError::conflict(format!("hierarchy link {link_id} already exists")));
        }
        validator::validate_new_hierarchy_link(parts, spec, hierarchy)?;

        Ok(vec![CompositionChange::HierarchyAttached(HierarchyLink {
            id: link_id,
            hierarchy_id: spec.hierarchy_id,
            range: QuantityRange::new(spec.min_quantity, spec.max_quantity),
            is_optional: spec.is_optional,
            assembly_order: spec.assembly_order,
            notes: spec.notes.clone(),
            state: LifecycleState::Active,
            audit: AuditStamp::created(command.actor, command.occurred_at),
        })])
    }

    fn handle_update_hierarchy_link(
        &self,
        link_id: HierarchyLinkId,
        update: &HierarchyLinkUpdate,
    ) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;
        let existing = parts
            .hierarchy_link(link_id)
            .ok_or_else(|| unknown_member("link_id".into(), "hierarchy link", link_id))?;
        if !existing.is_active() {
            return Err(inactive_member("link_id".into(), "hierarchy link", link_id));
        }
        validator::validate_hierarchy_link_update(update)?;

        Ok(vec![CompositionChange::HierarchyLinkUpdated {
            link_id,
            update: update.clone(),
        }])
    }

    /// Every listed part must exist, be active and appear once; the resulting
    /// build sequence must be free of duplicate orders.
    fn handle_reorder(&self, positions: &[AssemblyPosition]) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;

        let mut listed = HashSet::new();
        for (idx, p) in positions.iter().enumerate() {
            let field = format!("positions[{idx}]");
            match parts.part_state(p.part) {
                None => return Err(unknown_member(field, "part", p.part)),
                Some(LifecycleState::Inactive) => return Err(inactive_member(field, "part", p.part)),
                Some(LifecycleState::Active) => {}
            }
            if !listed.insert(p.part) {
                return Err(DomainError::validation(
                    ValidationKind::Malformed,
                    field,
                    format!("{} is listed more than once", p.part),
                ));
            }
        }

        let final_positions = parts.active_positions().map(|current| {
            positions
                .iter()
                .find(|p| p.part == current.part)
                .copied()
                .unwrap_or(current)
        });
        validator::assembly_orders_unique(final_positions)?;

        let changed: Vec<AssemblyPosition> = positions
            .iter()
            .filter(|p| {
                parts
                    .active_positions()
                    .any(|c| c.part == p.part && c.assembly_order != p.assembly_order)
            })
            .copied()
            .collect();
        if changed.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![CompositionChange::AssemblyReordered { positions: changed }])
    }

    fn handle_remove_parts(&self, requested: &[AssemblyPart]) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;
        let mut pending = Vec::new();
        for (idx, part) in requested.iter().enumerate() {
            match parts.part_state(*part) {
                None => return Err(unknown_member(format!("parts[{idx}]"), "part", part)),
                Some(LifecycleState::Active) if !pending.contains(part) => pending.push(*part),
                Some(_) => {}
            }
        }

        if pending.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![CompositionChange::PartsDeactivated { parts: pending }])
    }

    fn handle_restore_parts(&self, requested: &[AssemblyPart]) -> DomainResult<Vec<CompositionChange>> {
        let parts = self.composite_parts()?;
        let mut pending = Vec::new();
        for (idx, part) in requested.iter().enumerate() {
            match parts.part_state(*part) {
                None => return Err(unknown_member(format!("parts[{idx}]"), "part", part)),
                Some(LifecycleState::Inactive) if !pending.contains(part) => pending.push(*part),
                Some(_) => {}
            }
        }
        if pending.is_empty() {
            return Ok(vec![]);
        }

        let restored = pending.iter().filter_map(|part| {
            let assembly_order = match part {
                AssemblyPart::Component(id) => parts.component(*id)?.assembly_order,
                AssemblyPart::Hierarchy(id) => parts.hierarchy_link(*id)?.assembly_order,
            };
            Some(AssemblyPosition {
                part: *part,
                assembly_order,
            })
        });
        validator::assembly_orders_unique(parts.active_positions().chain(restored))?;

        Ok(vec![CompositionChange::PartsReactivated { parts: pending }])
    }

    fn handle_add_group_item(
        &self,
        item_id: GroupItemId,
        spec: &GroupItemSpec,
        target: Option<&CatalogRef>,
        command: &CompositionCommand,
    ) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        if slots.item(item_id).is_some() {
            return Err(DomainError::conflict(format!("group item {item_id} already exists")));
        }
        let (selector, default_quantity) = validator::validate_new_group_item(slots, spec, target)?;

        Ok(vec![CompositionChange::GroupItemAdded(ProductGroupItem {
            id: item_id,
            name: spec.name.trim().to_string(),
            selector,
            range: QuantityRange::new(spec.min_quantity, spec.max_quantity),
            default_quantity,
            is_optional: spec.is_optional,
            extra_price: spec.extra_price,
            state: LifecycleState::Active,
            audit: AuditStamp::created(command.actor, command.occurred_at),
        })])
    }

    fn handle_update_group_item(
        &self,
        item_id: GroupItemId,
        update: &GroupItemUpdate,
    ) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        let existing = slots
            .item(item_id)
            .ok_or_else(|| unknown_member("item_id".into(), "group item", item_id))?;
        if !existing.is_active() {
            return Err(inactive_member("item_id".into(), "group item", item_id));
        }
        let default_quantity = validator::validate_group_item_update(slots, item_id, update)?;

        Ok(vec![CompositionChange::GroupItemUpdated {
            item_id,
            name: update.name.trim().to_string(),
            range: QuantityRange::new(update.min_quantity, update.max_quantity),
            default_quantity,
            is_optional: update.is_optional,
            extra_price: update.extra_price,
        }])
    }

    /// Removing an item leaves the exchange rules that mention it untouched;
    /// the substitution resolver reports them as drifted.
    fn handle_remove_group_items(&self, ids: &[GroupItemId]) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        let mut pending = Vec::new();
        for (idx, id) in ids.iter().enumerate() {
            let item = slots
                .item(*id)
                .ok_or_else(|| unknown_member(format!("item_ids[{idx}]"), "group item", id))?;
            if item.is_active() && !pending.contains(id) {
                pending.push(*id);
            }
        }

        if pending.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![CompositionChange::GroupItemsDeactivated { item_ids: pending }])
    }

    fn handle_restore_group_items(&self, ids: &[GroupItemId]) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        let mut scratch = slots.clone();
        let mut pending = Vec::new();
        for (idx, id) in ids.iter().enumerate() {
            let field = format!("item_ids[{idx}]");
            let item = slots
                .item(*id)
                .ok_or_else(|| unknown_member(field.clone(), "group item", id))?;
            if item.is_active() || pending.contains(id) {
                continue;
            }
            validator::option_name_free(&scratch, &item.name, Some(*id))
                .map_err(|e| in_batch(e, field))?;
            if let Some(s) = scratch.items.iter_mut().find(|s| s.id == *id) {
                s.state = LifecycleState::Active;
            }
            pending.push(*id);
        }

        if pending.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![CompositionChange::GroupItemsReactivated { item_ids: pending }])
    }

    fn new_exchange_rule(
        &self,
        slots: &GroupSlots,
        rule_id: ExchangeRuleId,
        spec: &ExchangeRuleSpec,
        command: &CompositionCommand,
    ) -> DomainResult<CompositionChange> {
        if slots.exchange_rule(rule_id).is_some() {
            return Err(DomainError::conflict(format!("exchange rule {rule_id} already exists")));
        }
        validator::validate_new_exchange_rule(slots, spec)?;

        Ok(CompositionChange::ExchangeRuleAdded(ExchangeRule {
            id: rule_id,
            group_id: self.id,
            source_item_id: spec.source_item_id,
            target_item_id: spec.target_item_id,
            ratio: spec.ratio,
            is_active: spec.is_active,
            state: LifecycleState::Active,
            audit: AuditStamp::created(command.actor, command.occurred_at),
        }))
    }

    fn handle_update_exchange_rule(
        &self,
        rule_id: ExchangeRuleId,
        update: &ExchangeRuleUpdate,
    ) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        let rule = slots
            .exchange_rule(rule_id)
            .ok_or_else(|| unknown_member("rule_id".into(), "exchange rule", rule_id))?;
        if !rule.is_active() {
            return Err(inactive_member("rule_id".into(), "exchange rule", rule_id));
        }
        validator::validate_exchange_rule_update(
            slots,
            rule.source_item_id,
            rule.target_item_id,
            update,
        )?;

        Ok(vec![CompositionChange::ExchangeRuleUpdated {
            rule_id,
            update: update.clone(),
        }])
    }

    fn handle_remove_exchange_rules(
        &self,
        ids: &[ExchangeRuleId],
    ) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        let mut pending = Vec::new();
        for (idx, id) in ids.iter().enumerate() {
            let rule = slots
                .exchange_rule(*id)
                .ok_or_else(|| unknown_member(format!("rule_ids[{idx}]"), "exchange rule", id))?;
            if rule.is_active() && !pending.contains(id) {
                pending.push(*id);
            }
        }

        if pending.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![CompositionChange::ExchangeRulesDeactivated { rule_ids: pending }])
    }

    /// Validated against a scratch copy that already reflects the earlier
    /// changes of the same batch, so the batch is judged on its final state.
    fn handle_replace_exchange_rules(
        &self,
        rules: &[(ExchangeRuleId, ExchangeRuleSpec)],
        command: &CompositionCommand,
    ) -> DomainResult<Vec<CompositionChange>> {
        let slots = self.group_slots()?;
        let mut scratch = self.clone();
        let mut changes = Vec::new();

        let retired: Vec<ExchangeRuleId> = prodline_core::entity::active(&slots.exchange_rules)
            .map(|r| r.id)
            .collect();
        if !retired.is_empty() {
            let change = CompositionChange::ExchangeRulesDeactivated { rule_ids: retired };
            scratch.apply(&event_for(command, change.clone()));
            changes.push(change);
        }

        for (idx, (rule_id, spec)) in rules.iter().enumerate() {
            let change = scratch
                .new_exchange_rule(scratch.group_slots()?, *rule_id, spec, command)
                .map_err(|e| match e {
                    DomainError::Validation(v) => {
                        let field = format!("rules[{idx}].{}", v.field);
                        in_batch(v, field)
                    }
                    other => other,
                })?;
            scratch.apply(&event_for(command, change.clone()));
            changes.push(change);
        }

        Ok(changes)
    }
}
