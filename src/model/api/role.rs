use serde::{Deserialize, Serialize};

use crate::model::{
    common::{RoleKind, RoleStatus},
    db::role::Role,
    mongodb::Id,
};

/// Role details.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescription {
    pub id: Id,
    pub user_id: Id,
    #[serde(default)]
    pub election_id: Option<Id>,
    pub kind: RoleKind,
    pub status: RoleStatus,
}

impl From<Role> for RoleDescription {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            user_id: role.role.user_id,
            election_id: role.role.election_id,
            kind: role.role.kind,
            status: role.role.status,
        }
    }
}

/// An admin's decision on a pending role.
/// `Pending` is not a decision and is rejected at validation.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoleDecision {
    pub decision: RoleStatus,
}
