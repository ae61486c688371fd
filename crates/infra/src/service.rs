//! Application facade over the composition engine.
//!
//! Resolves catalog and hierarchy references, wraps each mutation in a
//! command, sends it through the [`CommandDispatcher`] and logs the outcome.
//! Reads rehydrate the aggregate and run the resolver or the aggregator on it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use prodline_catalog::{CatalogReader, ProductId};
use prodline_composition::{
    AssemblyPart, AssemblyPosition, CatalogRef, ComponentId, ComponentSpec, ComponentUpdate,
    CompositionAction, CompositionCommand, ExchangeRuleId, ExchangeRuleSpec, ExchangeRuleUpdate,
    GroupItemId, GroupItemSpec, GroupItemUpdate, HierarchyAction, HierarchyCatalog,
    HierarchyCommand, HierarchyId, HierarchyLinkId, HierarchyLinkSpec, HierarchyLinkUpdate,
    PriceBreakdown, ProductComponentHierarchy, ProductComposition, ProductGroupItem, SelectionLine,
    Substitution, SubstitutionQuery, price_selection, resolve_substitutes,
};
use prodline_core::{DomainError, TenantId, UserId, ValidationKind};
use prodline_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::EngineConfig;
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::read_model::InMemoryCatalog;

pub const COMPOSITION_AGGREGATE: &str = "composition.product";
pub const HIERARCHY_CATALOG_AGGREGATE: &str = "composition.hierarchy_catalog";

/// Who mutates what, and when. The engine never reads the clock itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationContext {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl MutationContext {
    pub fn new(tenant_id: TenantId, actor: UserId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            actor,
            occurred_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{action} carries {size} members, the limit is {max}")]
    BatchTooLarge {
        action: &'static str,
        size: usize,
        max: usize,
    },
}

impl ServiceError {
    /// The domain rejection behind this error, whether raised while reading
    /// or while dispatching.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Dispatch(e) => e.as_domain(),
            ServiceError::BatchTooLarge { .. } => None,
        }
    }

    pub fn validation_kind(&self) -> Option<ValidationKind> {
        self.domain().and_then(DomainError::validation_kind)
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, ServiceError::Dispatch(DispatchError::Concurrency(_)))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub type InMemoryCompositionService = CompositionService<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    Arc<InMemoryCatalog>,
>;

/// Build a service on the in-memory store and bus.
pub fn in_memory(catalog: Arc<InMemoryCatalog>, config: EngineConfig) -> InMemoryCompositionService {
    let dispatcher = CommandDispatcher::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
    );
    CompositionService::new(dispatcher, catalog, config)
}

#[derive(Debug)]
pub struct CompositionService<S, B, C> {
    dispatcher: CommandDispatcher<S, B>,
    catalog: C,
    config: EngineConfig,
}

impl<S, B, C> CompositionService<S, B, C> {
    pub fn new(dispatcher: CommandDispatcher<S, B>, catalog: C, config: EngineConfig) -> Self {
        Self {
            dispatcher,
            catalog,
            config,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }
}

impl<S, B, C> CompositionService<S, B, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: CatalogReader,
{
    // --- composition graph -------------------------------------------------

    /// Start the graph of a composite or group product.
    pub fn define_composition(&self, ctx: MutationContext, product_id: ProductId) -> ServiceResult<()> {
        let owner = self.catalog.product(ctx.tenant_id, product_id);
        self.execute(ctx, product_id, CompositionAction::Define { owner })?;
        Ok(())
    }

    pub fn attach_component(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        spec: ComponentSpec,
    ) -> ServiceResult<ComponentId> {
        let component_id = ComponentId::generate();
        let component = self.catalog.product(ctx.tenant_id, spec.component_product_id);
        self.execute(
            ctx,
            product_id,
            CompositionAction::AttachComponent {
                component_id,
                spec,
                component,
            },
        )?;
        Ok(component_id)
    }

    pub fn update_component(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        component_id: ComponentId,
        update: ComponentUpdate,
    ) -> ServiceResult<()> {
        self.execute(
            ctx,
            product_id,
            CompositionAction::UpdateComponent {
                component_id,
                update,
            },
        )?;
        Ok(())
    }

    pub fn attach_hierarchy(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        spec: HierarchyLinkSpec,
    ) -> ServiceResult<HierarchyLinkId> {
        let link_id = HierarchyLinkId::generate();
        let hierarchy = self
            .hierarchy_catalog(ctx.tenant_id)?
            .get(spec.hierarchy_id)
            .cloned();
        self.execute(
            ctx,
            product_id,
            CompositionAction::AttachHierarchy {
                link_id,
                spec,
                hierarchy,
            },
        )?;
        Ok(link_id)
    }

    pub fn update_hierarchy_link(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        link_id: HierarchyLinkId,
        update: HierarchyLinkUpdate,
    ) -> ServiceResult<()> {
        self.execute(ctx, product_id, CompositionAction::UpdateHierarchyLink { link_id, update })?;
        Ok(())
    }

    /// Move several parts at once; orders are checked on the final layout.
    pub fn reorder_assembly(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        positions: Vec<AssemblyPosition>,
    ) -> ServiceResult<()> {
        self.execute(ctx, product_id, CompositionAction::ReorderAssembly { positions })?;
        Ok(())
    }

    pub fn remove_parts(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        parts: Vec<AssemblyPart>,
    ) -> ServiceResult<()> {
        self.execute(ctx, product_id, CompositionAction::RemoveParts { parts })?;
        Ok(())
    }

    pub fn restore_parts(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        parts: Vec<AssemblyPart>,
    ) -> ServiceResult<()> {
        self.execute(ctx, product_id, CompositionAction::RestoreParts { parts })?;
        Ok(())
    }

    pub fn add_group_item(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        spec: GroupItemSpec,
    ) -> ServiceResult<GroupItemId> {
        let item_id = GroupItemId::generate();
        let target = match (spec.product_id, spec.category_id) {
            (Some(product_id), None) => self
                .catalog
                .product(ctx.tenant_id, product_id)
                .map(CatalogRef::Product),
            (None, Some(category_id)) => self
                .catalog
                .category(ctx.tenant_id, category_id)
                .map(CatalogRef::Category),
            _ => None,
        };
        self.execute(
            ctx,
            group_id,
            CompositionAction::AddGroupItem {
                item_id,
                spec,
                target,
            },
        )?;
        Ok(item_id)
    }

    pub fn update_group_item(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        item_id: GroupItemId,
        update: GroupItemUpdate,
    ) -> ServiceResult<()> {
        self.execute(ctx, group_id, CompositionAction::UpdateGroupItem { item_id, update })?;
        Ok(())
    }

    pub fn remove_group_items(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        item_ids: Vec<GroupItemId>,
    ) -> ServiceResult<()> {
        self.execute(ctx, group_id, CompositionAction::RemoveGroupItems { item_ids })?;
        Ok(())
    }

    pub fn restore_group_items(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        item_ids: Vec<GroupItemId>,
    ) -> ServiceResult<()> {
        self.execute(ctx, group_id, CompositionAction::RestoreGroupItems { item_ids })?;
        Ok(())
    }

    pub fn add_exchange_rule(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        spec: ExchangeRuleSpec,
    ) -> ServiceResult<ExchangeRuleId> {
        let rule_id = ExchangeRuleId::generate();
        self.execute(ctx, group_id, CompositionAction::AddExchangeRule { rule_id, spec })?;
        Ok(rule_id)
    }

    pub fn update_exchange_rule(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        rule_id: ExchangeRuleId,
        update: ExchangeRuleUpdate,
    ) -> ServiceResult<()> {
        self.execute(ctx, group_id, CompositionAction::UpdateExchangeRule { rule_id, update })?;
        Ok(())
    }

    pub fn remove_exchange_rules(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        rule_ids: Vec<ExchangeRuleId>,
    ) -> ServiceResult<()> {
        self.execute(ctx, group_id, CompositionAction::RemoveExchangeRules { rule_ids })?;
        Ok(())
    }

    /// Swap the group's whole rule set in one commit.
    pub fn replace_exchange_rules(
        &self,
        ctx: MutationContext,
        group_id: ProductId,
        specs: Vec<ExchangeRuleSpec>,
    ) -> ServiceResult<Vec<ExchangeRuleId>> {
        let rules: Vec<(ExchangeRuleId, ExchangeRuleSpec)> = specs
            .into_iter()
            .map(|spec| (ExchangeRuleId::generate(), spec))
            .collect();
        let ids = rules.iter().map(|(id, _)| *id).collect();
        self.execute(ctx, group_id, CompositionAction::ReplaceExchangeRules { rules })?;
        Ok(ids)
    }

    // --- hierarchy templates -----------------------------------------------

    pub fn define_hierarchy(
        &self,
        ctx: MutationContext,
        name: impl Into<String>,
        description: Option<String>,
    ) -> ServiceResult<HierarchyId> {
        let hierarchy_id = HierarchyId::generate();
        self.execute_hierarchy(
            ctx,
            HierarchyAction::Define {
                hierarchy_id,
                name: name.into(),
                description,
            },
        )?;
        Ok(hierarchy_id)
    }

    pub fn update_hierarchy(
        &self,
        ctx: MutationContext,
        hierarchy_id: HierarchyId,
        name: impl Into<String>,
        description: Option<String>,
    ) -> ServiceResult<()> {
        self.execute_hierarchy(
            ctx,
            HierarchyAction::Update {
                hierarchy_id,
                name: name.into(),
                description,
            },
        )?;
        Ok(())
    }

    pub fn deactivate_hierarchies(
        &self,
        ctx: MutationContext,
        hierarchy_ids: Vec<HierarchyId>,
    ) -> ServiceResult<()> {
        self.check_batch("deactivate_hierarchies", hierarchy_ids.len())?;
        self.execute_hierarchy(ctx, HierarchyAction::Deactivate { hierarchy_ids })?;
        Ok(())
    }

    pub fn reactivate_hierarchies(
        &self,
        ctx: MutationContext,
        hierarchy_ids: Vec<HierarchyId>,
    ) -> ServiceResult<()> {
        self.check_batch("reactivate_hierarchies", hierarchy_ids.len())?;
        self.execute_hierarchy(ctx, HierarchyAction::Reactivate { hierarchy_ids })?;
        Ok(())
    }

    // --- reads -------------------------------------------------------------

    /// The composition graph of a product; `NotFound` until it is defined.
    pub fn composition(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<ProductComposition> {
        let composition = self
            .dispatcher
            .load(tenant_id, product_id.0, |_, _| ProductComposition::empty(product_id))?;
        if !composition.is_defined() {
            return Err(DomainError::not_found().into());
        }
        Ok(composition)
    }

    /// Active parts of a composite product in build order.
    pub fn build_sequence(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<Vec<AssemblyPosition>> {
        let composition = self.composition(tenant_id, product_id)?;
        Ok(composition.composite_parts()?.build_sequence())
    }

    /// Active option slots of a group product.
    pub fn group_items(&self, tenant_id: TenantId, group_id: ProductId) -> ServiceResult<Vec<ProductGroupItem>> {
        let composition = self.composition(tenant_id, group_id)?;
        Ok(composition.group_slots()?.active_items().cloned().collect())
    }

    pub fn hierarchies(&self, tenant_id: TenantId) -> ServiceResult<Vec<ProductComponentHierarchy>> {
        Ok(self.hierarchy_catalog(tenant_id)?.active().cloned().collect())
    }

    pub fn resolve_substitutes(
        &self,
        tenant_id: TenantId,
        group_id: ProductId,
        query: SubstitutionQuery,
    ) -> ServiceResult<Substitution> {
        let composition = self.composition(tenant_id, group_id)?;
        // Drifted rules are logged per rule by the resolver.
        Ok(resolve_substitutes(&composition, &query)?)
    }

    pub fn price_selection(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        lines: &[SelectionLine],
    ) -> ServiceResult<PriceBreakdown> {
        let composition = self.composition(tenant_id, product_id)?;
        let breakdown = price_selection(&composition, &self.catalog, lines).inspect_err(|e| {
            if let DomainError::StaleReference { entity, id } = e {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    product_id = %product_id,
                    entity = *entity,
                    id = %id,
                    "pricing hit a stale reference"
                );
            }
        })?;
        Ok(breakdown)
    }

    // --- plumbing ----------------------------------------------------------

    fn hierarchy_catalog(&self, tenant_id: TenantId) -> ServiceResult<HierarchyCatalog> {
        Ok(self
            .dispatcher
            .load(tenant_id, HierarchyCatalog::stream_id(), |_, _| HierarchyCatalog::empty())?)
    }

    fn check_batch(&self, action: &'static str, size: usize) -> ServiceResult<()> {
        let max = self.config.max_batch_size;
        if size > max {
            tracing::debug!(action, size, max, "batch rejected before dispatch");
            return Err(ServiceError::BatchTooLarge { action, size, max });
        }
        Ok(())
    }

    fn execute(
        &self,
        ctx: MutationContext,
        product_id: ProductId,
        action: CompositionAction,
    ) -> ServiceResult<Vec<StoredEvent>> {
        let name = action.name();
        if let Some(size) = action.batch_len() {
            self.check_batch(name, size)?;
        }

        let command = CompositionCommand {
            tenant_id: ctx.tenant_id,
            product_id,
            actor: ctx.actor,
            occurred_at: ctx.occurred_at,
            action,
        };
        let result = self.dispatcher.dispatch(
            ctx.tenant_id,
            product_id.0,
            COMPOSITION_AGGREGATE,
            command,
            |_, _| ProductComposition::empty(product_id),
        );
        log_outcome(ctx, &product_id, name, &result);
        Ok(result?)
    }

    fn execute_hierarchy(&self, ctx: MutationContext, action: HierarchyAction) -> ServiceResult<Vec<StoredEvent>> {
        let name = action.name();
        let command = HierarchyCommand {
            tenant_id: ctx.tenant_id,
            actor: ctx.actor,
            occurred_at: ctx.occurred_at,
            action,
        };
        let result = self.dispatcher.dispatch(
            ctx.tenant_id,
            HierarchyCatalog::stream_id(),
            HIERARCHY_CATALOG_AGGREGATE,
            command,
            |_, _| HierarchyCatalog::empty(),
        );
        log_outcome(ctx, &"hierarchy_catalog", name, &result);
        Ok(result?)
    }
}

fn log_outcome(
    ctx: MutationContext,
    stream: &dyn core::fmt::Display,
    action: &'static str,
    result: &Result<Vec<StoredEvent>, DispatchError>,
) {
    match result {
        Ok(committed) if committed.is_empty() => tracing::debug!(
            tenant_id = %ctx.tenant_id,
            stream = %stream,
            action,
            "mutation changed nothing"
        ),
        Ok(committed) => tracing::info!(
            tenant_id = %ctx.tenant_id,
            actor = %ctx.actor,
            stream = %stream,
            action,
            events = committed.len(),
            version = committed.last().map(StoredEvent::stream_version).unwrap_or(0),
            "mutation committed"
        ),
        Err(DispatchError::Domain(DomainError::Validation(v))) => tracing::debug!(
            tenant_id = %ctx.tenant_id,
            stream = %stream,
            action,
            rule = %v.rule,
            kind = ?v.kind,
            field = %v.field,
            "mutation rejected"
        ),
        Err(err) => tracing::debug!(
            tenant_id = %ctx.tenant_id,
            stream = %stream,
            action,
            error = %err,
            "mutation failed"
        ),
    }
}
