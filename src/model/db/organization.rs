use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core organization data, as stored in the database.
///
/// Organizations are created implicitly by the first workspace request that
/// names them (idempotent upsert keyed on `org_id`).
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationCore {
    /// Human-chosen unique slug, e.g. "warwick-su".
    pub org_id: String,
    pub name: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl OrganizationCore {
    pub fn new(org_id: String, name: String) -> Self {
        Self {
            org_id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// An organization without an ID.
pub type NewOrganization = OrganizationCore;

/// An organization from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Organization {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub organization: OrganizationCore,
}

impl Deref for Organization {
    type Target = OrganizationCore;

    fn deref(&self) -> &Self::Target {
        &self.organization
    }
}

impl DerefMut for Organization {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.organization
    }
}
