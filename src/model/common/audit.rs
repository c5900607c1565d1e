use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// The set of actions recorded in the audit log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    VoteCast,
    JoinElection,
    RequestWorkspace,
    ApproveElection,
    RejectElection,
    ApproveResults,
    DisapproveResults,
    DecideRole,
    IssueVotingTokens,
    RedeemVotingToken,
}

impl From<AuditAction> for Bson {
    fn from(action: AuditAction) -> Self {
        to_bson(&action).expect("Serialisation is infallible")
    }
}
