//! Reusable hierarchy templates ("Cake Base", "Filling", ...).
//!
//! All templates of a tenant live in one aggregate so that the active-name
//! uniqueness check and the write it guards hit the same event stream.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use prodline_core::{
    Aggregate, AggregateId, AggregateRoot, Audited, AuditStamp, DomainError, Entity,
    LifecycleState, TenantId, UserId, ValidationError, ValidationKind,
};
use prodline_events::Event;

use crate::model::HierarchyId;
use crate::validator;

/// Fixed stream id of the per-tenant hierarchy catalog ("hierarchy" in ASCII).
const CATALOG_STREAM: u128 = 0x0000_0000_0000_0068_6965_7261_7263_6879;

/// A named, reusable composition template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductComponentHierarchy {
    pub id: HierarchyId,
    pub name: String,
    pub description: Option<String>,
    pub state: LifecycleState,
    pub audit: AuditStamp,
}

impl Entity for ProductComponentHierarchy {
    type Id = HierarchyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Audited for ProductComponentHierarchy {
    fn audit(&self) -> &AuditStamp {
        &self.audit
    }

    fn state(&self) -> LifecycleState {
        self.state
    }
}

/// Aggregate root: the hierarchy templates of one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyCatalog {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    hierarchies: Vec<ProductComponentHierarchy>,
    version: u64,
}

impl HierarchyCatalog {
    /// Stream id shared by every tenant's catalog; streams are keyed by tenant too.
    pub fn stream_id() -> AggregateId {
        AggregateId::from_uuid(Uuid::from_u128(CATALOG_STREAM))
    }

    /// Create an empty instance for rehydration.
    pub fn empty() -> Self {
        Self {
            id: Self::stream_id(),
            tenant_id: None,
            hierarchies: Vec::new(),
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn hierarchies(&self) -> &[ProductComponentHierarchy] {
        &self.hierarchies
    }

    pub fn get(&self, id: HierarchyId) -> Option<&ProductComponentHierarchy> {
        prodline_core::entity::find_by_id(&self.hierarchies, &id)
    }

    pub fn active(&self) -> impl Iterator<Item = &ProductComponentHierarchy> {
        prodline_core::entity::active(&self.hierarchies)
    }

    fn get_mut(&mut self, id: HierarchyId) -> Option<&mut ProductComponentHierarchy> {
        self.hierarchies.iter_mut().find(|h| h.id == id)
    }
}

impl AggregateRoot for HierarchyCatalog {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyCommand {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
    pub action: HierarchyAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyAction {
    Define {
        hierarchy_id: HierarchyId,
        name: String,
        description: Option<String>,
    },
    Update {
        hierarchy_id: HierarchyId,
        name: String,
        description: Option<String>,
    },
    Deactivate {
        hierarchy_ids: Vec<HierarchyId>,
    },
    Reactivate {
        hierarchy_ids: Vec<HierarchyId>,
    },
}

impl HierarchyAction {
    pub fn name(&self) -> &'static str {
        match self {
            HierarchyAction::Define { .. } => "define_hierarchy",
            HierarchyAction::Update { .. } => "update_hierarchy",
            HierarchyAction::Deactivate { .. } => "deactivate_hierarchies",
            HierarchyAction::Reactivate { .. } => "reactivate_hierarchies",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEvent {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
    pub change: HierarchyChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyChange {
    Defined(ProductComponentHierarchy),
    Updated {
        hierarchy_id: HierarchyId,
        name: String,
        description: Option<String>,
    },
    Deactivated {
        hierarchy_ids: Vec<HierarchyId>,
    },
    Reactivated {
        hierarchy_ids: Vec<HierarchyId>,
    },
}

impl Event for HierarchyEvent {
    fn event_type(&self) -> &'static str {
        match self.change {
            HierarchyChange::Defined(_) => "composition.hierarchy.defined",
            HierarchyChange::Updated { .. } => "composition.hierarchy.updated",
            HierarchyChange::Deactivated { .. } => "composition.hierarchy.deactivated",
            HierarchyChange::Reactivated { .. } => "composition.hierarchy.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Aggregate for HierarchyCatalog {
    type Command = HierarchyCommand;
    type Event = HierarchyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.tenant_id = Some(event.tenant_id);
        match &event.change {
            HierarchyChange::Defined(h) => self.hierarchies.push(h.clone()),
            HierarchyChange::Updated {
                hierarchy_id,
                name,
                description,
            } => {
                if let Some(h) = self.get_mut(*hierarchy_id) {
                    h.name = name.clone();
                    h.description = description.clone();
                    h.audit.touch(event.actor, event.occurred_at);
                }
            }
            HierarchyChange::Deactivated { hierarchy_ids } => {
                self.set_state(hierarchy_ids, LifecycleState::Inactive, event);
            }
            HierarchyChange::Reactivated { hierarchy_ids } => {
                self.set_state(hierarchy_ids, LifecycleState::Active, event);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_tenant(command.tenant_id)?;

        let change = match &command.action {
            HierarchyAction::Define {
                hierarchy_id,
                name,
                description,
            } => self.handle_define(*hierarchy_id, name, description, command)?,
            HierarchyAction::Update {
                hierarchy_id,
                name,
                description,
            } => self.handle_update(*hierarchy_id, name, description)?,
            HierarchyAction::Deactivate { hierarchy_ids } => self.handle_deactivate(hierarchy_ids)?,
            HierarchyAction::Reactivate { hierarchy_ids } => self.handle_reactivate(hierarchy_ids)?,
        };

        Ok(change
            .map(|change| HierarchyEvent {
                tenant_id: command.tenant_id,
                actor: command.actor,
                occurred_at: command.occurred_at,
                change,
            })
            .into_iter()
            .collect())
    }
}

impl HierarchyCatalog {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(DomainError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn set_state(&mut self, ids: &[HierarchyId], state: LifecycleState, event: &HierarchyEvent) {
        for id in ids {
            if let Some(h) = self.get_mut(*id) {
                h.state = state;
                h.audit.touch(event.actor, event.occurred_at);
            }
        }
    }

    fn existing(&self, id: HierarchyId, field: &str) -> Result<&ProductComponentHierarchy, DomainError> {
        self.get(id).ok_or_else(|| {
            DomainError::validation(
                ValidationKind::UnknownReference,
                field,
                format!("hierarchy {id} does not exist"),
            )
        })
    }

    fn handle_define(
        &self,
        hierarchy_id: HierarchyId,
        name: &str,
        description: &Option<String>,
        command: &HierarchyCommand,
    ) -> Result<Option<HierarchyChange>, DomainError> {
        validator::non_blank(name, "name")?;
        validator::hierarchy_name_free(&self.hierarchies, name, None)?;
        if self.get(hierarchy_id).is_some() {
            return Err(DomainError::conflict(format!("hierarchy {hierarchy_id} already exists")));
        }

        Ok(Some(HierarchyChange::Defined(ProductComponentHierarchy {
            id: hierarchy_id,
            name: name.trim().to_string(),
            description: description.clone(),
            state: LifecycleState::Active,
            audit: AuditStamp::created(command.actor, command.occurred_at),
        })))
    }

    fn handle_update(
        &self,
        hierarchy_id: HierarchyId,
        name: &str,
        description: &Option<String>,
    ) -> Result<Option<HierarchyChange>, DomainError> {
        let existing = self.existing(hierarchy_id, "hierarchy_id")?;
        if !existing.is_active() {
            return Err(DomainError::validation(
                ValidationKind::InactiveReference,
                "hierarchy_id",
                format!("hierarchy {hierarchy_id} is inactive"),
            ));
        }
        validator::non_blank(name, "name")?;
        validator::hierarchy_name_free(&self.hierarchies, name, Some(hierarchy_id))?;

        Ok(Some(HierarchyChange::Updated {
            hierarchy_id,
            name: name.trim().to_string(),
            description: description.clone(),
        }))
    }

    /// Unknown ids fail the whole batch; already inactive ones are skipped.
    fn handle_deactivate(&self, ids: &[HierarchyId]) -> Result<Option<HierarchyChange>, DomainError> {
        let mut pending = Vec::new();
        let mut seen = BTreeSet::new();
        for (idx, id) in ids.iter().enumerate() {
            let h = self.existing(*id, &format!("hierarchy_ids[{idx}]"))?;
            if h.is_active() && seen.insert(*id) {
                pending.push(*id);
            }
        }

        if pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(HierarchyChange::Deactivated {
            hierarchy_ids: pending,
        }))
    }

    /// Reactivated names must not clash with active ones, nor with each other.
    fn handle_reactivate(&self, ids: &[HierarchyId]) -> Result<Option<HierarchyChange>, DomainError> {
        let mut scratch = self.hierarchies.clone();
        let mut pending = Vec::new();
        for (idx, id) in ids.iter().enumerate() {
            let h = self.existing(*id, &format!("hierarchy_ids[{idx}]"))?;
            if h.is_active() || pending.contains(id) {
                continue;
            }
            validator::hierarchy_name_free(&scratch, &h.name, Some(*id)).map_err(|e| {
                DomainError::Validation(ValidationError::new(
                    e.kind,
                    format!("hierarchy_ids[{idx}]"),
                    e.message,
                ))
            })?;
            if let Some(s) = scratch.iter_mut().find(|s| s.id == *id) {
                s.state = LifecycleState::Active;
            }
            pending.push(*id);
        }

        if pending.is_empty() {
            return Ok(None);
        }
        Ok(Some(HierarchyChange::Reactivated {
            hierarchy_ids: pending,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new()
    }

    fn cmd(tenant_id: TenantId, action: HierarchyAction) -> HierarchyCommand {
        HierarchyCommand {
            tenant_id,
            actor: UserId::new(),
            occurred_at: Utc::now(),
            action,
        }
    }

    fn define(catalog: &mut HierarchyCatalog, tenant_id: TenantId, name: &str) -> HierarchyId {
        let id = HierarchyId::generate();
        let events = catalog
            .handle(&cmd(
                tenant_id,
                HierarchyAction::Define {
                    hierarchy_id: id,
                    name: name.to_string(),
                    description: None,
                },
            ))
            .unwrap();
        for e in &events {
            catalog.apply(e);
        }
        id
    }

    #[test]
    fn define_emits_defined_event_with_creation_stamp() {
        let catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        let command = cmd(
            tenant_id,
            HierarchyAction::Define {
                hierarchy_id: HierarchyId::generate(),
                name: "  Cake Base ".to_string(),
                description: Some("sponge + syrup".to_string()),
            },
        );

        let events = catalog.handle(&command).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].change {
            HierarchyChange::Defined(h) => {
                assert_eq!(h.name, "Cake Base");
                assert_eq!(h.state, LifecycleState::Active);
                assert_eq!(h.audit.created_by, command.actor);
            }
            other => panic!("Expected Defined, got {other:?}"),
        }
        assert_eq!(events[0].event_type(), "composition.hierarchy.defined");
    }

    #[test]
    fn active_names_are_unique() {
        let mut catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        define(&mut catalog, tenant_id, "Cake Base");

        let err = catalog
            .handle(&cmd(
                tenant_id,
                HierarchyAction::Define {
                    hierarchy_id: HierarchyId::generate(),
                    name: "cake base".to_string(),
                    description: None,
                },
            ))
            .unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::DuplicateName));
    }

    #[test]
    fn updating_an_unknown_hierarchy_fails_before_name_checks() {
        let mut catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        define(&mut catalog, tenant_id, "Cake Base");

        let err = catalog
            .handle(&cmd(
                tenant_id,
                HierarchyAction::Update {
                    hierarchy_id: HierarchyId::generate(),
                    name: "cake base".to_string(),
                    description: None,
                },
            ))
            .unwrap_err();
        let v = err.as_validation().unwrap();
        assert_eq!(v.kind, ValidationKind::UnknownReference);
        assert_eq!(v.field, "hierarchy_id");
    }

    #[test]
    fn inactive_names_can_be_reused_but_not_reactivated_into_a_clash() {
        let mut catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        let old = define(&mut catalog, tenant_id, "Filling");

        let events = catalog
            .handle(&cmd(tenant_id, HierarchyAction::Deactivate { hierarchy_ids: vec![old] }))
            .unwrap();
        catalog.apply(&events[0]);
        define(&mut catalog, tenant_id, "Filling");

        let err = catalog
            .handle(&cmd(tenant_id, HierarchyAction::Reactivate { hierarchy_ids: vec![old] }))
            .unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::DuplicateName));
        assert_eq!(catalog.active().count(), 1);
    }

    #[test]
    fn deactivating_inactive_hierarchies_is_a_successful_no_op() {
        let mut catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        let id = define(&mut catalog, tenant_id, "Topping");
        let deactivate = cmd(tenant_id, HierarchyAction::Deactivate { hierarchy_ids: vec![id, id] });

        let events = catalog.handle(&deactivate).unwrap();
        assert_eq!(events.len(), 1);
        catalog.apply(&events[0]);
        assert_eq!(catalog.get(id).unwrap().state, LifecycleState::Inactive);

        let again = catalog.handle(&deactivate).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn batch_with_unknown_member_changes_nothing() {
        let mut catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        let known = define(&mut catalog, tenant_id, "Glaze");

        let err = catalog
            .handle(&cmd(
                tenant_id,
                HierarchyAction::Deactivate {
                    hierarchy_ids: vec![known, HierarchyId::generate()],
                },
            ))
            .unwrap_err();
        assert_eq!(err.validation_kind(), Some(ValidationKind::UnknownReference));
        assert!(catalog.get(known).unwrap().is_active());
    }

    #[test]
    fn update_refreshes_modification_stamp() {
        let mut catalog = HierarchyCatalog::empty();
        let tenant_id = tenant();
        let id = define(&mut catalog, tenant_id, "Base");
        let update = cmd(
            tenant_id,
            HierarchyAction::Update {
                hierarchy_id: id,
                name: "Cake Base".to_string(),
                description: Some("two layers".to_string()),
            },
        );

        let events = catalog.handle(&update).unwrap();
        catalog.apply(&events[0]);

        let h = catalog.get(id).unwrap();
        assert_eq!(h.name, "Cake Base");
        assert_eq!(h.audit.modified_by, update.actor);
        assert_ne!(h.audit.created_by, update.actor);
        assert_eq!(catalog.version(), 2);
    }

    #[test]
    fn other_tenants_are_rejected() {
        let mut catalog = HierarchyCatalog::empty();
        define(&mut catalog, tenant(), "Base");

        let err = catalog
            .handle(&cmd(
                tenant(),
                HierarchyAction::Define {
                    hierarchy_id: HierarchyId::generate(),
                    name: "Other".to_string(),
                    description: None,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
