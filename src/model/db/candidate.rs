use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::CandidateStatus, mongodb::Id};

/// Core candidate data, as stored in the database.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub election_id: Id,
    pub position_id: Id,
    pub name: String,
    pub description: String,
    /// URL of a photo in the external object store, if one was uploaded.
    /// Replacing it orphans the old asset; that is the store's problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub status: CandidateStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl CandidateCore {
    pub fn new(
        election_id: Id,
        position_id: Id,
        name: String,
        description: String,
        image: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            election_id,
            position_id,
            name,
            description,
            image,
            status: CandidateStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}
