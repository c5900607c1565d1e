use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{db::vote::Vote, mongodb::Id};

/// A vote the caller wishes to cast: a specific candidate for a specific
/// position.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSpec {
    pub position_id: Id,
    pub candidate_id: Id,
}

/// Acknowledgement of a stored vote.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub id: Id,
    pub position_id: Id,
    pub candidate_id: Id,
    pub cast_at: DateTime<Utc>,
}

impl From<Vote> for VoteReceipt {
    fn from(vote: Vote) -> Self {
        Self {
            id: vote.id,
            position_id: vote.vote.position_id,
            candidate_id: vote.vote.candidate_id,
            cast_at: vote.vote.cast_at,
        }
    }
}

/// The caller's voting progress in an election: their votes so far, newest
/// first, and whether they have covered every position.
#[derive(Debug, Serialize, Deserialize)]
pub struct VotingProgress {
    pub votes: Vec<VoteReceipt>,
    pub positions: u64,
    pub complete: bool,
}

impl VotingProgress {
    pub fn new(votes: Vec<VoteReceipt>, positions: u64) -> Self {
        let complete = votes.len() as u64 == positions;
        Self {
            votes,
            positions,
            complete,
        }
    }
}
