use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Approval, ElectionPhase},
    db::election::Election,
    mongodb::Id,
};

/// A request for a new election workspace.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkspaceRequest {
    pub title: String,
    pub description: String,
    /// Organization slug; the organization is created on first use.
    pub org_id: String,
    /// Display name for a newly created organization. Defaults to the slug.
    #[serde(default)]
    pub org_name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub total_voters: Option<u32>,
}

/// Full election details.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub org_id: String,
    pub join_code: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub phase: ElectionPhase,
    pub approval: Approval,
    pub results_visible: bool,
    #[serde(default)]
    pub total_voters: Option<u32>,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        let phase = election.phase(Utc::now());
        Self {
            id: election.id,
            title: election.election.title,
            description: election.election.description,
            org_id: election.election.org_id,
            join_code: election.election.join_code,
            start: election.election.start,
            end: election.election.end,
            phase,
            approval: election.election.approval,
            results_visible: election.election.results_visible,
            total_voters: election.election.total_voters,
        }
    }
}

/// Top-level election metadata, for listings.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: Id,
    pub title: String,
    pub org_id: String,
    pub join_code: String,
    pub phase: ElectionPhase,
    pub approval: Approval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<Election> for ElectionSummary {
    fn from(election: Election) -> Self {
        let phase = election.phase(Utc::now());
        Self {
            id: election.id,
            title: election.election.title,
            org_id: election.election.org_id,
            join_code: election.election.join_code,
            phase,
            approval: election.election.approval,
            start: election.election.start,
            end: election.election.end,
        }
    }
}

/// A request to join an election as a voter.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub join_code: String,
}

/// A super-admin's rejection of a workspace request.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RejectionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}
