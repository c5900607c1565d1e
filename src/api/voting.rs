use chrono::Utc;
use mongodb::{bson::doc, options::FindOptions};
use rocket::{
    futures::TryStreamExt,
    response::status,
    serde::json::Json,
    Route,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            vote::{VoteReceipt, VoteSpec, VotingProgress},
        },
        common::{AuditAction, CandidateStatus, PositionStatus},
        db::{
            audit::NewAuditEntry,
            candidate::Candidate,
            election::Election,
            position::Position,
            role::Role,
            vote::{NewVote, Vote},
        },
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
};

use super::common::{election_by_id, log_action, require_voter};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, my_votes]
}

/// Cast a vote: one voter, one position, one candidate, once.
///
/// The check-then-insert race of a naive implementation is closed by the
/// unique index on `(voter_id, election_id, position_id)`: the insert *is*
/// the uniqueness check, and of any number of concurrent casts for the same
/// key exactly one can land. There is deliberately no update or retraction
/// route anywhere in the API; a stored vote is final.
#[post("/elections/<election_id>/votes", data = "<spec>", format = "json")]
async fn cast_vote(
    token: AuthToken,
    election_id: Id,
    spec: Json<VoteSpec>,
    elections: Coll<Election>,
    roles: Coll<Role>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
    votes: Coll<NewVote>,
    audit: Coll<NewAuditEntry>,
) -> Result<status::Created<Json<VoteReceipt>>> {
    // The phase check comes first: a closed, not-yet-open or unapproved
    // election rejects before anything touches the ledger.
    let election = election_by_id(election_id, &elections).await?;
    if !election.is_open(Utc::now()) {
        return Err(Error::forbidden(format!(
            "Election {} is not open for voting",
            election_id
        )));
    }

    // Only approved voters may cast.
    require_voter(token.user_id, election_id, &roles).await?;

    // The position must be live in this election...
    let position_filter = doc! {
        "_id": *spec.position_id,
        "election_id": *election_id,
        "status": PositionStatus::Active,
    };
    positions
        .find_one(position_filter, None)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Position {} in election {}",
                spec.position_id, election_id
            ))
        })?;

    // ...and the candidate an active runner for that position.
    let candidate_filter = doc! {
        "_id": *spec.candidate_id,
        "election_id": *election_id,
        "position_id": *spec.position_id,
        "status": CandidateStatus::Active,
    };
    candidates
        .find_one(candidate_filter, None)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Candidate {} for position {}",
                spec.candidate_id, spec.position_id
            ))
        })?;

    // Insert the vote. A duplicate key here means this voter has already
    // voted for this position, now or in a race; either way it's a
    // conflict, never an overwrite.
    let vote = NewVote::new(
        token.user_id,
        election_id,
        spec.position_id,
        spec.candidate_id,
        election.org_id.clone(),
    );
    let vote_id: Id = match votes.insert_one(&vote, None).await {
        Ok(result) => result.inserted_id.as_object_id().unwrap().into(),
        Err(err) if is_duplicate_key_error(&err) => {
            return Err(Error::conflict(format!(
                "User {} has already voted for position {}",
                token.user_id, spec.position_id
            )));
        }
        Err(err) => return Err(err.into()),
    };

    // Audit entry referencing the stored vote.
    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::VoteCast,
            election_id,
            election.org_id.clone(),
            vote_id.to_string(),
        ),
    )
    .await;

    let receipt = VoteReceipt {
        id: vote_id,
        position_id: vote.position_id,
        candidate_id: vote.candidate_id,
        cast_at: vote.cast_at,
    };
    let location = format!("/elections/{}/votes/{}", election_id, vote_id);
    Ok(status::Created::new(location).body(Json(receipt)))
}

/// The caller's votes in this election, newest first, with a completeness
/// flag (voted on every live position).
#[get("/elections/<election_id>/votes/mine")]
async fn my_votes(
    token: AuthToken,
    election_id: Id,
    roles: Coll<Role>,
    votes: Coll<Vote>,
    positions: Coll<Position>,
) -> Result<Json<VotingProgress>> {
    require_voter(token.user_id, election_id, &roles).await?;

    let filter = doc! {
        "voter_id": *token.user_id,
        "election_id": *election_id,
    };
    let options = FindOptions::builder().sort(doc! { "cast_at": -1 }).build();
    let receipts = votes
        .find(filter, options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;

    let position_count = positions
        .count_documents(
            doc! { "election_id": *election_id, "status": PositionStatus::Active },
            None,
        )
        .await?;

    Ok(Json(VotingProgress::new(receipts, position_count)))
}
