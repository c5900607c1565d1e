use std::fmt::Display;

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Permission level a role grants within its election.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleKind {
    /// May cast votes in the bound election.
    Voter,
    /// May manage positions, candidates, voting tokens and results
    /// visibility for the bound election.
    Admin,
    /// System-wide; may approve or reject election workspaces.
    /// Not bound to any election.
    SuperAdmin,
}

impl Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
                Self::SuperAdmin => "super admin",
            }
        )
    }
}

impl From<RoleKind> for Bson {
    fn from(kind: RoleKind) -> Self {
        to_bson(&kind).expect("Serialisation is infallible")
    }
}

/// Approval state of a role.
///
/// `Pending` may move to `Approved` or `Rejected` exactly once;
/// both of those are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleStatus {
    Pending,
    Approved,
    Rejected,
}

impl From<RoleStatus> for Bson {
    fn from(status: RoleStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
