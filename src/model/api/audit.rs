use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{common::AuditAction, db::audit::AuditEntry, mongodb::Id};

/// Audit log entry details, for the admin listing.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntryDescription {
    pub id: Id,
    pub user_id: Id,
    pub action: AuditAction,
    #[serde(default)]
    pub detail: Option<String>,
    pub logged_at: DateTime<Utc>,
}

impl From<AuditEntry> for AuditEntryDescription {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.entry.user_id,
            action: entry.entry.action,
            detail: entry.entry.detail,
            logged_at: entry.entry.logged_at,
        }
    }
}
