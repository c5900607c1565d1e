use serde::{Deserialize, Serialize};

use crate::model::{db::position::Position, mongodb::Id};

/// A new position to add to an election.
#[derive(Debug, Serialize, Deserialize)]
pub struct PositionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Candidate capacity; must be at least 1.
    pub max_candidates: u32,
}

/// Position details.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDescription {
    pub id: Id,
    pub election_id: Id,
    pub title: String,
    pub description: String,
    pub max_candidates: u32,
    pub candidate_count: u32,
}

impl From<Position> for PositionDescription {
    fn from(position: Position) -> Self {
        Self {
            id: position.id,
            election_id: position.position.election_id,
            title: position.position.title,
            description: position.position.description,
            max_candidates: position.position.max_candidates,
            candidate_count: position.position.candidate_count,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl PositionSpec {
        pub fn example() -> Self {
            Self {
                title: "President".to_string(),
                description: "Leads the society".to_string(),
                max_candidates: 2,
            }
        }
    }
}
