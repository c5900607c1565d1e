use chrono::Utc;
use mongodb::{
    bson::{doc, DateTime, Document},
    options::FindOptions,
    Client,
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            audit::AuditEntryDescription,
            auth::AuthToken,
            candidate::{CandidateDescription, CandidateSpec, CandidateUpdate},
            pagination::{Paginated, PaginationRequest},
            position::{PositionDescription, PositionSpec},
            role::{RoleDecision, RoleDescription},
            voting_token::{IssuedTokens, TokenBatchSpec, VotingTokenDescription, MAX_TOKEN_BATCH},
        },
        common::{AuditAction, CandidateStatus, PositionStatus, RoleStatus},
        db::{
            audit::{AuditEntry, NewAuditEntry},
            candidate::{Candidate, NewCandidate},
            election::Election,
            position::{NewPosition, Position, PositionCore},
            role::Role,
            voting_token::{NewVotingToken, VotingToken, VotingTokenCore},
        },
        mongodb::{
            is_duplicate_key_error, is_transient_transaction_error, Coll, Id,
        },
    },
};

use super::common::{election_by_id, log_action, require_election_admin, TXN_RETRIES};

pub fn routes() -> Vec<Route> {
    routes![
        add_position,
        delete_position,
        add_candidate,
        update_candidate,
        delete_candidate,
        issue_voting_tokens,
        list_voting_tokens,
        list_roles,
        decide_role,
        approve_results,
        disapprove_results,
        audit_log,
    ]
}

#[post("/elections/<election_id>/positions", data = "<spec>", format = "json")]
async fn add_position(
    token: AuthToken,
    election_id: Id,
    spec: Json<PositionSpec>,
    roles: Coll<Role>,
    elections: Coll<Election>,
    new_positions: Coll<NewPosition>,
) -> Result<Json<PositionDescription>> {
    require_election_admin(token.user_id, election_id, &roles).await?;
    election_by_id(election_id, &elections).await?;

    let spec = spec.0;
    if spec.title.trim().is_empty() {
        return Err(Error::validation("Position title must not be empty"));
    }
    if spec.max_candidates == 0 {
        return Err(Error::validation(
            "A position must allow at least one candidate",
        ));
    }

    let position = PositionCore::new(election_id, spec.title, spec.description, spec.max_candidates);
    let position_id: Id = new_positions
        .insert_one(&position, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Safe because the ID comes directly from the database.
        .into();

    Ok(Json(
        Position {
            id: position_id,
            position,
        }
        .into(),
    ))
}

/// Soft-delete a position. Refused while any non-deleted candidate still
/// references it.
#[delete("/elections/<election_id>/positions/<position_id>")]
async fn delete_position(
    token: AuthToken,
    election_id: Id,
    position_id: Id,
    roles: Coll<Role>,
    positions: Coll<Position>,
) -> Result<()> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let filter = doc! {
        "_id": *position_id,
        "election_id": *election_id,
        "status": PositionStatus::Active,
    };
    let position = positions
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Position {}", position_id)))?;
    if position.candidate_count > 0 {
        return Err(Error::conflict(format!(
            "Position {} still has {} candidate(s)",
            position_id, position.candidate_count
        )));
    }

    // Conditional on the count still being zero, in case a candidate
    // arrived since the check above.
    let delete_filter = doc! {
        "_id": *position_id,
        "status": PositionStatus::Active,
        "candidate_count": 0,
    };
    let update = doc! { "$set": { "status": PositionStatus::Deleted } };
    let result = positions.update_one(delete_filter, update, None).await?;
    if result.modified_count != 1 {
        return Err(Error::conflict(format!(
            "Position {} gained a candidate concurrently",
            position_id
        )));
    }
    Ok(())
}

/// Add a candidate to a position.
///
/// Capacity is enforced by an atomic conditional increment of the
/// position's candidate counter, never by counting and then inserting;
/// concurrent adds at the boundary cannot both reserve a slot.
#[post("/elections/<election_id>/candidates", data = "<spec>", format = "json")]
async fn add_candidate(
    token: AuthToken,
    election_id: Id,
    spec: Json<CandidateSpec>,
    roles: Coll<Role>,
    elections: Coll<Election>,
    positions: Coll<Position>,
    new_candidates: Coll<NewCandidate>,
    db_client: &State<Client>,
) -> Result<Json<CandidateDescription>> {
    require_election_admin(token.user_id, election_id, &roles).await?;
    election_by_id(election_id, &elections).await?;

    let spec = spec.0;
    if spec.name.trim().is_empty() {
        return Err(Error::validation("Candidate name must not be empty"));
    }

    // Distinguish a missing position from a full one.
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

    let mut attempt = 0;
    let candidate = loop {
        match add_candidate_once(election_id, &spec, &positions, &new_candidates, db_client.inner())
            .await
        {
            Ok(candidate) => break candidate,
            Err(Error::Db(ref db_err))
                if is_transient_transaction_error(db_err) && attempt < TXN_RETRIES =>
            {
                attempt += 1;
                debug!("Retrying candidate creation (attempt {attempt})");
            }
            Err(err) => return Err(err),
        }
    };

    Ok(Json(candidate.into()))
}

#[put(
    "/elections/<election_id>/candidates/<candidate_id>",
    data = "<update>",
    format = "json"
)]
async fn update_candidate(
    token: AuthToken,
    election_id: Id,
    candidate_id: Id,
    update: Json<CandidateUpdate>,
    roles: Coll<Role>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let filter = doc! {
        "_id": *candidate_id,
        "election_id": *election_id,
        "status": { "$ne": CandidateStatus::Deleted },
    };
    candidates
        .find_one(filter.clone(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate {}", candidate_id)))?;

    let update = update.0;
    if update.status == Some(CandidateStatus::Deleted) {
        return Err(Error::validation(
            "Candidates are deleted via DELETE, not status updates",
        ));
    }

    let mut set = Document::new();
    if let Some(name) = update.name {
        if name.trim().is_empty() {
            return Err(Error::validation("Candidate name must not be empty"));
        }
        set.insert("name", name);
    }
    if let Some(description) = update.description {
        set.insert("description", description);
    }
    if let Some(image) = update.image {
        // Replaces any previous image; the orphaned asset stays in the
        // external store.
        set.insert("image", image);
    }
    if let Some(status) = update.status {
        set.insert("status", status);
    }
    set.insert("updated_at", DateTime::now());

    candidates
        .update_one(filter.clone(), doc! { "$set": set }, None)
        .await?;

    let candidate = candidates
        .find_one(doc! { "_id": *candidate_id }, None)
        .await?
        .unwrap(); // Presence checked above; deletion has no other path.
    Ok(Json(candidate.into()))
}

/// Soft-delete a candidate, freeing a capacity slot on its position.
#[delete("/elections/<election_id>/candidates/<candidate_id>")]
async fn delete_candidate(
    token: AuthToken,
    election_id: Id,
    candidate_id: Id,
    roles: Coll<Role>,
    candidates: Coll<Candidate>,
    positions: Coll<Position>,
    db_client: &State<Client>,
) -> Result<()> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let filter = doc! {
        "_id": *candidate_id,
        "election_id": *election_id,
        "status": { "$ne": CandidateStatus::Deleted },
    };
    let candidate = candidates
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate {}", candidate_id)))?;

    let mut attempt = 0;
    loop {
        match delete_candidate_once(&candidate, &candidates, &positions, db_client.inner()).await {
            Ok(()) => break,
            Err(Error::Db(ref db_err))
                if is_transient_transaction_error(db_err) && attempt < TXN_RETRIES =>
            {
                attempt += 1;
                debug!("Retrying candidate deletion (attempt {attempt})");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Issue a batch of single-use voting tokens for anonymous voting.
#[post(
    "/elections/<election_id>/voting-tokens",
    data = "<spec>",
    format = "json"
)]
async fn issue_voting_tokens(
    token: AuthToken,
    election_id: Id,
    spec: Json<TokenBatchSpec>,
    roles: Coll<Role>,
    elections: Coll<Election>,
    tokens: Coll<NewVotingToken>,
    audit: Coll<NewAuditEntry>,
) -> Result<Json<IssuedTokens>> {
    require_election_admin(token.user_id, election_id, &roles).await?;
    let election = election_by_id(election_id, &elections).await?;

    let spec = spec.0;
    if spec.count == 0 || spec.count > MAX_TOKEN_BATCH {
        return Err(Error::validation(format!(
            "Token batch size must be between 1 and {}",
            MAX_TOKEN_BATCH
        )));
    }
    if spec.expires_at <= Utc::now() {
        return Err(Error::validation("Token expiry must be in the future"));
    }

    let mut issued = Vec::with_capacity(spec.count as usize);
    for _ in 0..spec.count {
        // The unique (election, token) index turns a generator collision
        // into a retry rather than a duplicate secret.
        let secret = loop {
            let candidate =
                VotingTokenCore::new(election_id, election.org_id.clone(), spec.expires_at);
            match tokens.insert_one(&candidate, None).await {
                Ok(_) => break candidate.token,
                Err(err) if is_duplicate_key_error(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        };
        issued.push(secret);
    }

    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::IssueVotingTokens,
            election_id,
            election.org_id.clone(),
            format!("count={}", issued.len()),
        ),
    )
    .await;

    Ok(Json(IssuedTokens {
        tokens: issued,
        expires_at: spec.expires_at,
    }))
}

#[get("/elections/<election_id>/voting-tokens?<pagination..>")]
async fn list_voting_tokens(
    token: AuthToken,
    election_id: Id,
    pagination: PaginationRequest,
    roles: Coll<Role>,
    tokens: Coll<VotingToken>,
) -> Result<Json<Paginated<VotingTokenDescription>>> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let filter = doc! { "election_id": *election_id };
    let options = FindOptions::builder()
        .sort(doc! { "issued_at": -1 })
        .skip(u64::from(pagination.skip()))
        .limit(i64::from(pagination.page_size()))
        .build();
    let page = tokens
        .find(filter.clone(), options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;
    let total = tokens.count_documents(filter, None).await?;

    Ok(Json(pagination.to_paginated(total, page)))
}

#[get("/elections/<election_id>/roles?<pagination..>")]
async fn list_roles(
    token: AuthToken,
    election_id: Id,
    pagination: PaginationRequest,
    roles: Coll<Role>,
) -> Result<Json<Paginated<RoleDescription>>> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let filter = doc! { "election_id": *election_id };
    let options = FindOptions::builder()
        .sort(doc! { "created_at": 1 })
        .skip(u64::from(pagination.skip()))
        .limit(i64::from(pagination.page_size()))
        .build();
    let page = roles
        .find(filter.clone(), options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;
    let total = roles.count_documents(filter, None).await?;

    Ok(Json(pagination.to_paginated(total, page)))
}

/// Decide a pending role. `Pending -> Approved | Rejected` is the only
/// legal transition; deciding an already-decided role is a conflict, not a
/// silent overwrite.
#[post(
    "/elections/<election_id>/roles/<role_id>",
    data = "<decision>",
    format = "json"
)]
async fn decide_role(
    token: AuthToken,
    election_id: Id,
    role_id: Id,
    decision: Json<RoleDecision>,
    roles: Coll<Role>,
    audit: Coll<NewAuditEntry>,
) -> Result<Json<RoleDescription>> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let decision = decision.0.decision;
    if decision == RoleStatus::Pending {
        return Err(Error::validation("A decision must approve or reject"));
    }

    let filter = doc! {
        "_id": *role_id,
        "election_id": *election_id,
        "status": RoleStatus::Pending,
    };
    let update = doc! {
        "$set": {
            "status": decision,
            "decided_by": *token.user_id,
            "decided_at": DateTime::now(),
        }
    };
    let result = roles.update_one(filter, update, None).await?;
    if result.modified_count != 1 {
        let exists = roles
            .find_one(doc! { "_id": *role_id, "election_id": *election_id }, None)
            .await?;
        return Err(match exists {
            Some(_) => Error::conflict(format!("Role {} has already been decided", role_id)),
            None => Error::not_found(format!("Role {} in election {}", role_id, election_id)),
        });
    }

    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::DecideRole,
            election_id,
            None,
            role_id.to_string(),
        ),
    )
    .await;

    let role = roles.find_one(role_id.as_doc(), None).await?.unwrap();
    Ok(Json(role.into()))
}

/// Make full tallies visible to non-admins (once the election has ended).
#[post("/elections/<election_id>/results/approve")]
async fn approve_results(
    token: AuthToken,
    election_id: Id,
    roles: Coll<Role>,
    elections: Coll<Election>,
    audit: Coll<NewAuditEntry>,
) -> Result<()> {
    set_results_visibility(token, election_id, true, &roles, &elections, &audit).await
}

/// Hide full tallies from non-admins again.
#[post("/elections/<election_id>/results/disapprove")]
async fn disapprove_results(
    token: AuthToken,
    election_id: Id,
    roles: Coll<Role>,
    elections: Coll<Election>,
    audit: Coll<NewAuditEntry>,
) -> Result<()> {
    set_results_visibility(token, election_id, false, &roles, &elections, &audit).await
}

#[get("/elections/<election_id>/audit?<pagination..>")]
async fn audit_log(
    token: AuthToken,
    election_id: Id,
    pagination: PaginationRequest,
    roles: Coll<Role>,
    audit: Coll<AuditEntry>,
) -> Result<Json<Paginated<AuditEntryDescription>>> {
    require_election_admin(token.user_id, election_id, &roles).await?;

    let filter = doc! { "election_id": *election_id };
    let options = FindOptions::builder()
        .sort(doc! { "logged_at": -1 })
        .skip(u64::from(pagination.skip()))
        .limit(i64::from(pagination.page_size()))
        .build();
    let page = audit
        .find(filter.clone(), options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;
    let total = audit.count_documents(filter, None).await?;

    Ok(Json(pagination.to_paginated(total, page)))
}

/// Flip exactly the `results_visible` field, nothing else.
async fn set_results_visibility(
    token: AuthToken,
    election_id: Id,
    visible: bool,
    roles: &Coll<Role>,
    elections: &Coll<Election>,
    audit: &Coll<NewAuditEntry>,
) -> Result<()> {
    require_election_admin(token.user_id, election_id, roles).await?;

    let update = doc! { "$set": { "results_visible": visible } };
    let result = elections
        .update_one(election_id.as_doc(), update, None)
        .await?;
    if result.matched_count != 1 {
        return Err(Error::not_found(format!("Election {}", election_id)));
    }

    let action = if visible {
        AuditAction::ApproveResults
    } else {
        AuditAction::DisapproveResults
    };
    log_action(
        audit,
        NewAuditEntry::new(token.user_id, action, election_id, None, None),
    )
    .await;

    Ok(())
}

/// One attempt at the candidate creation transaction: reserve a capacity
/// slot with a conditional increment, then insert the candidate.
async fn add_candidate_once(
    election_id: Id,
    spec: &CandidateSpec,
    positions: &Coll<Position>,
    candidates: &Coll<NewCandidate>,
    db_client: &Client,
) -> Result<Candidate> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    let reserve_filter = doc! {
        "_id": *spec.position_id,
        "election_id": *election_id,
        "status": PositionStatus::Active,
        "$expr": { "$lt": ["$candidate_count", "$max_candidates"] },
    };
    let reserved = positions
        .find_one_and_update_with_session(
            reserve_filter,
            doc! { "$inc": { "candidate_count": 1 } },
            None,
            &mut session,
        )
        .await?;
    let position = match reserved {
        Some(position) => position,
        None => {
            // Existence was checked by the caller, so the position is full.
            return Err(Error::capacity(format!(
                "Position {} already has its maximum number of candidates",
                spec.position_id
            )));
        }
    };

    let candidate = NewCandidate::new(
        election_id,
        position.id,
        spec.name.clone(),
        spec.description.clone(),
        spec.image.clone(),
    );
    let candidate_id: Id = candidates
        .insert_one_with_session(&candidate, None, &mut session)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Safe because the ID comes directly from the database.
        .into();

    session.commit_transaction().await?;
    Ok(Candidate {
        id: candidate_id,
        candidate,
    })
}

/// One attempt at the candidate deletion transaction: soft-delete the
/// candidate and release its capacity slot.
async fn delete_candidate_once(
    candidate: &Candidate,
    candidates: &Coll<Candidate>,
    positions: &Coll<Position>,
    db_client: &Client,
) -> Result<()> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    let filter = doc! {
        "_id": *candidate.id,
        "status": { "$ne": CandidateStatus::Deleted },
    };
    let update = doc! {
        "$set": {
            "status": CandidateStatus::Deleted,
            "updated_at": DateTime::now(),
        }
    };
    let result = candidates
        .update_one_with_session(filter, update, None, &mut session)
        .await?;
    if result.modified_count != 1 {
        return Err(Error::conflict(format!(
            "Candidate {} was already deleted",
            candidate.id
        )));
    }

    // The guard keeps a lost double-delete race from driving the counter
    // below zero.
    positions
        .update_one_with_session(
            doc! { "_id": *candidate.position_id, "candidate_count": { "$gt": 0 } },
            doc! { "$inc": { "candidate_count": -1 } },
            None,
            &mut session,
        )
        .await?;

    session.commit_transaction().await?;
    Ok(())
}
