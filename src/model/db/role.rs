use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime},
    error::Error as DbError,
};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{RoleKind, RoleStatus},
    db::user::NewUser,
    mongodb::{opt_chrono_datetime_as_bson_datetime, Coll, Id},
};

/// Core role data, as stored in the database.
///
/// A role binds a user to an election with a permission level and an
/// approval state. The unique index on `(user_id, election_id)` guarantees
/// at most one role per pair. Roles are never deleted; status only moves
/// `Pending -> Approved | Rejected`.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCore {
    pub user_id: Id,
    /// Absent for system-wide (super-admin) roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_id: Option<Id>,
    pub org_id: String,
    pub kind: RoleKind,
    pub status: RoleStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    /// Admin or super-admin who decided this role, once decided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<Id>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub decided_at: Option<DateTime<Utc>>,
}

impl RoleCore {
    /// An approved voter role, as created by joining an election.
    pub fn voter(user_id: Id, election_id: Id, org_id: String) -> Self {
        Self {
            user_id,
            election_id: Some(election_id),
            org_id,
            kind: RoleKind::Voter,
            status: RoleStatus::Approved,
            created_at: Utc::now(),
            decided_by: None,
            decided_at: None,
        }
    }

    /// A pending admin role, as created by a workspace request.
    pub fn pending_admin(user_id: Id, election_id: Id, org_id: String) -> Self {
        Self {
            user_id,
            election_id: Some(election_id),
            org_id,
            kind: RoleKind::Admin,
            status: RoleStatus::Pending,
            created_at: Utc::now(),
            decided_by: None,
            decided_at: None,
        }
    }

    /// A system-wide super-admin role.
    pub fn super_admin(user_id: Id) -> Self {
        Self {
            user_id,
            election_id: None,
            org_id: "SYSTEM".to_string(),
            kind: RoleKind::SuperAdmin,
            status: RoleStatus::Approved,
            created_at: Utc::now(),
            decided_by: None,
            decided_at: None,
        }
    }
}

/// A role without an ID.
pub type NewRole = RoleCore;

/// A role from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub role: RoleCore,
}

impl Deref for Role {
    type Target = RoleCore;

    fn deref(&self) -> &Self::Target {
        &self.role
    }
}

impl DerefMut for Role {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.role
    }
}

/// Ensure at least one approved super admin exists, creating the bootstrap
/// identity named in the config if necessary. Without one, no workspace
/// could ever be approved.
///
/// This operation is idempotent.
pub async fn ensure_super_admin_exists(
    users: &Coll<NewUser>,
    roles: &Coll<NewRole>,
    display_name: &str,
) -> Result<(), DbError> {
    let filter = doc! {
        "kind": RoleKind::SuperAdmin,
        "status": RoleStatus::Approved,
    };
    if roles.find_one(filter, None).await?.is_some() {
        return Ok(());
    }

    let user = NewUser {
        display_name: display_name.to_string(),
        anonymous: false,
        created_at: Utc::now(),
    };
    let user_id: Id = users
        .insert_one(&user, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Safe because the ID comes directly from the database.
        .into();
    roles.insert_one(RoleCore::super_admin(user_id), None).await?;
    warn!("Created bootstrap super admin '{display_name}' with ID {user_id}");
    Ok(())
}
