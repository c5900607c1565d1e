use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// An immutable vote fact, as stored in the database.
///
/// The unique index on `(voter_id, election_id, position_id)` is what makes
/// "at most one vote per voter per position" hold under concurrent casts.
/// Votes are never updated or deleted; there is deliberately no API for
/// either, and tallies are recomputed from these rows alone.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub voter_id: Id,
    pub election_id: Id,
    pub position_id: Id,
    pub candidate_id: Id,
    pub org_id: String,
    /// Server-assigned at insert time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl VoteCore {
    pub fn new(
        voter_id: Id,
        election_id: Id,
        position_id: Id,
        candidate_id: Id,
        org_id: String,
    ) -> Self {
        Self {
            voter_id,
            election_id,
            position_id,
            candidate_id,
            org_id,
            cast_at: Utc::now(),
        }
    }
}

/// A vote without an ID.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

// No `DerefMut`: votes are read-only once stored.
impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}
