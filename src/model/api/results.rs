use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    db::{candidate::Candidate, position::Position, vote::Vote},
    mongodb::Id,
};

/// Aggregated results for one election.
///
/// Always derived by a full scan over the election's votes at read time;
/// no incremental counters are maintained anywhere. Elections are bounded
/// (hundreds to low thousands of voters), so the O(votes) read is cheap and
/// the write path stays a plain insert.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: Id,
    /// Whether full counts are included. When false, per-candidate counts
    /// and winners are withheld but the structure is still returned.
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_votes: Option<u64>,
    pub positions: Vec<PositionTally>,
}

/// Per-position slice of the results.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionTally {
    pub position_id: Id,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tallies: Option<Vec<CandidateTally>>,
    /// Candidates with the (strictly positive) maximum count.
    /// Ties yield several winners; zero votes yield none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<Id>>,
}

/// One candidate's count within a position.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: Id,
    pub name: String,
    pub votes: u64,
}

impl ElectionResults {
    /// Group the election's votes by (position, candidate) and count them.
    ///
    /// Every non-deleted candidate appears in its position's tally, zero or
    /// not. A vote whose candidate has since been soft-deleted still counts
    /// (votes are immutable facts); its name falls back to the candidate ID.
    pub fn tabulate(
        election_id: Id,
        positions: &[Position],
        candidates: &[Candidate],
        votes: &[Vote],
    ) -> Self {
        // counts[position][candidate]
        let mut counts: HashMap<Id, HashMap<Id, u64>> = HashMap::new();
        for vote in votes {
            *counts
                .entry(vote.position_id)
                .or_default()
                .entry(vote.candidate_id)
                .or_default() += 1;
        }

        let position_tallies = positions
            .iter()
            .map(|position| {
                let mut position_counts = counts.remove(&position.id).unwrap_or_default();

                let mut tallies = candidates
                    .iter()
                    .filter(|c| c.position_id == position.id)
                    .map(|c| CandidateTally {
                        candidate_id: c.id,
                        name: c.name.clone(),
                        votes: position_counts.remove(&c.id).unwrap_or(0),
                    })
                    .collect::<Vec<_>>();
                // Whatever is left belongs to candidates no longer in the registry.
                for (candidate_id, votes) in position_counts {
                    tallies.push(CandidateTally {
                        candidate_id,
                        name: candidate_id.to_string(),
                        votes,
                    });
                }

                let winners = winners(&tallies);
                PositionTally {
                    position_id: position.id,
                    title: position.title.clone(),
                    tallies: Some(tallies),
                    winners: Some(winners),
                }
            })
            .collect();

        Self {
            election_id,
            visible: true,
            total_votes: Some(votes.len() as u64),
            positions: position_tallies,
        }
    }

    /// Withhold all counts, keeping only the structure.
    pub fn redacted(mut self) -> Self {
        self.visible = false;
        self.total_votes = None;
        for position in &mut self.positions {
            position.tallies = None;
            position.winners = None;
        }
        self
    }
}

/// All candidates sharing the maximum count, provided it is positive.
fn winners(tallies: &[CandidateTally]) -> Vec<Id> {
    let max = tallies.iter().map(|t| t.votes).max().unwrap_or(0);
    if max == 0 {
        return Vec::new();
    }
    tallies
        .iter()
        .filter(|t| t.votes == max)
        .map(|t| t.candidate_id)
        .collect()
}
