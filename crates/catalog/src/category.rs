use serde::{Deserialize, Serialize};

use prodline_core::{AggregateId, LifecycleState};

/// Product category identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub AggregateId);

impl CategoryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    pub state: LifecycleState,
}

impl CategoryRecord {
    pub fn new(id: CategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: LifecycleState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}
