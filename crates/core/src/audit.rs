//! Audit stamps and the soft-delete lifecycle shared by every entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Soft lifecycle state. Deletion is a transition to `Inactive`, never removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Active,
    Inactive,
}

impl LifecycleState {
    pub fn is_active(self) -> bool {
        self == LifecycleState::Active
    }
}

/// Creation and last-modification stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub modified_at: DateTime<Utc>,
    pub modified_by: UserId,
}

impl AuditStamp {
    pub fn created(by: UserId, at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            created_by: by,
            modified_at: at,
            modified_by: by,
        }
    }

    /// Refresh the modification stamp; creation fields never change.
    pub fn touch(&mut self, by: UserId, at: DateTime<Utc>) {
        self.modified_at = at;
        self.modified_by = by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn touch_keeps_creation_fields() {
        let creator = UserId::new();
        let editor = UserId::new();
        let t0 = Utc::now();
        let mut stamp = AuditStamp::created(creator, t0);

        stamp.touch(editor, t0 + Duration::seconds(5));

        assert_eq!(stamp.created_by, creator);
        assert_eq!(stamp.created_at, t0);
        assert_eq!(stamp.modified_by, editor);
        assert_eq!(stamp.modified_at, t0 + Duration::seconds(5));
    }
}
