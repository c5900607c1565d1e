use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::AuditAction, mongodb::Id};

/// An append-only audit log entry.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntryCore {
    /// Acting user.
    pub user_id: Id,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Free-form reference, e.g. the ID of the vote a `VoteCast` entry records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub logged_at: DateTime<Utc>,
}

impl AuditEntryCore {
    pub fn new(
        user_id: Id,
        action: AuditAction,
        election_id: impl Into<Option<Id>>,
        org_id: impl Into<Option<String>>,
        detail: impl Into<Option<String>>,
    ) -> Self {
        Self {
            user_id,
            action,
            election_id: election_id.into(),
            org_id: org_id.into(),
            detail: detail.into(),
            logged_at: Utc::now(),
        }
    }
}

/// An audit entry without an ID.
pub type NewAuditEntry = AuditEntryCore;

/// An audit entry from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub entry: AuditEntryCore,
}

// Append-only, so no `DerefMut`.
impl Deref for AuditEntry {
    type Target = AuditEntryCore;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}
