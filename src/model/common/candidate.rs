use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a candidate.
///
/// `Deleted` is a soft delete: the document stays behind for audit purposes
/// but every read path filters it out at the query level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    Active,
    Inactive,
    Deleted,
}

impl From<CandidateStatus> for Bson {
    fn from(status: CandidateStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// Lifecycle state of a position. Soft delete, as for candidates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Active,
    Deleted,
}

impl From<PositionStatus> for Bson {
    fn from(status: PositionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
