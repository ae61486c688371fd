//! Exchange-rule resolution for group items.
//!
//! A rule lets a customer trade `ratio` units of its source item for one unit
//! of its target item. Resolution re-checks group membership on every call, so
//! rules left pointing at removed or foreign items are reported as drifted
//! instead of producing substitutes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use prodline_catalog::ProductId;
use prodline_core::{DomainError, DomainResult, ValidationKind};

use crate::composition::ProductComposition;
use crate::model::{ExchangeRule, ExchangeRuleId, GroupItemId, GroupSlots};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionQuery {
    pub source_item_id: GroupItemId,
    pub source_quantity: Decimal,
}

/// A valid exchange: `target_quantity` units of the target replace the
/// requested source quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitute {
    pub rule_id: ExchangeRuleId,
    pub target_item_id: GroupItemId,
    pub target_quantity: Decimal,
    pub exchange_ratio: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftReason {
    /// Target item is not (or no longer) part of the group.
    TargetMissing,
    TargetInactive,
    /// Rule is recorded against another group.
    ForeignGroup,
    /// Stored ratio is not positive.
    ZeroRatio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftedRule {
    pub rule_id: ExchangeRuleId,
    pub target_item_id: GroupItemId,
    pub reason: DriftReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub source_item_id: GroupItemId,
    pub substitutes: Vec<Substitute>,
    pub drifted: Vec<DriftedRule>,
}

impl Substitution {
    pub fn is_empty(&self) -> bool {
        self.substitutes.is_empty()
    }
}

/// Resolve every usable exchange for `query` in the given group composition.
///
/// Rules whose derived target quantity falls outside the target's range are
/// left out silently; that is a normal outcome of the customer's quantity.
pub fn resolve_substitutes(
    group: &ProductComposition,
    query: &SubstitutionQuery,
) -> DomainResult<Substitution> {
    let slots = group.group_slots()?;
    let group_id = group.id_typed();

    if query.source_quantity <= Decimal::ZERO {
        return Err(DomainError::validation(
            ValidationKind::InvalidQuantity,
            "source_quantity",
            format!(
                "requested quantity must be greater than zero (got {})",
                query.source_quantity
            ),
        ));
    }
    match slots.item(query.source_item_id) {
        Some(item) if item.state.is_active() => {}
        _ => return Err(DomainError::stale("group item", query.source_item_id)),
    }

    let mut substitution = Substitution {
        source_item_id: query.source_item_id,
        substitutes: Vec::new(),
        drifted: Vec::new(),
    };

    let candidates = slots
        .exchange_rules
        .iter()
        .filter(|r| r.source_item_id == query.source_item_id && r.is_usable());

    for rule in candidates {
        if let Some(reason) = drift(slots, group_id, rule) {
            tracing::warn!(
                group_id = %group_id,
                rule_id = %rule.id,
                target_item_id = %rule.target_item_id,
                reason = ?reason,
                "exchange rule no longer resolvable"
            );
            substitution.drifted.push(DriftedRule {
                rule_id: rule.id,
                target_item_id: rule.target_item_id,
                reason,
            });
            continue;
        }

        let target_quantity = query.source_quantity.checked_div(rule.ratio).ok_or_else(|| {
            DomainError::invariant(format!(
                "target quantity for rule {} is out of decimal range",
                rule.id
            ))
        })?;

        let in_range = slots
            .item(rule.target_item_id)
            .is_some_and(|target| target.range.contains(target_quantity));
        if !in_range {
            continue;
        }

        substitution.substitutes.push(Substitute {
            rule_id: rule.id,
            target_item_id: rule.target_item_id,
            target_quantity: target_quantity.normalize(),
            exchange_ratio: rule.ratio,
        });
    }

    Ok(substitution)
}

fn drift(slots: &GroupSlots, group_id: ProductId, rule: &ExchangeRule) -> Option<DriftReason> {
    if rule.group_id != group_id {
        return Some(DriftReason::ForeignGroup);
    }
    if rule.ratio <= Decimal::ZERO {
        return Some(DriftReason::ZeroRatio);
    }
    match slots.item(rule.target_item_id) {
        None => Some(DriftReason::TargetMissing),
        Some(target) if !target.state.is_active() => Some(DriftReason::TargetInactive),
        Some(_) => None,
    }
}
