use serde::{Deserialize, Serialize};

use crate::model::{common::CandidateStatus, db::candidate::Candidate, mongodb::Id};

/// A new candidate to stand for a position.
///
/// The image, if any, is the URL of an asset already uploaded to the
/// external object store; an upload failure on the client simply omits it
/// and never blocks candidate creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub position_id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// A partial update to an existing candidate.
/// Setting `image` replaces the bound asset; the old one is orphaned.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CandidateUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub status: Option<CandidateStatus>,
}

/// Candidate details.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: Id,
    pub election_id: Id,
    pub position_id: Id,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub status: CandidateStatus,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            election_id: candidate.candidate.election_id,
            position_id: candidate.candidate.position_id,
            name: candidate.candidate.name,
            description: candidate.candidate.description,
            image: candidate.candidate.image,
            status: candidate.candidate.status,
        }
    }
}
