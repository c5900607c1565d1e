use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::PositionStatus, mongodb::Id};

/// Core position data, as stored in the database.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCore {
    pub election_id: Id,
    pub title: String,
    pub description: String,
    /// Candidate capacity; at least 1.
    pub max_candidates: u32,
    /// Current number of non-deleted candidates. Capacity is enforced with
    /// an atomic conditional increment on this field, so it must only ever
    /// be changed through those conditional updates.
    pub candidate_count: u32,
    pub status: PositionStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl PositionCore {
    pub fn new(election_id: Id, title: String, description: String, max_candidates: u32) -> Self {
        Self {
            election_id,
            title,
            description,
            max_candidates,
            candidate_count: 0,
            status: PositionStatus::Active,
            created_at: Utc::now(),
        }
    }
}

/// A position without an ID.
pub type NewPosition = PositionCore;

/// A position from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub position: PositionCore,
}

impl Deref for Position {
    type Target = PositionCore;

    fn deref(&self) -> &Self::Target {
        &self.position
    }
}

impl DerefMut for Position {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.position
    }
}
