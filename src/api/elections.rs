use chrono::Utc;
use mongodb::{
    bson::{doc, to_document},
    options::{FindOptions, UpdateOptions},
    Client,
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            candidate::CandidateDescription,
            election::{ElectionDescription, ElectionSummary, JoinRequest, WorkspaceRequest},
            position::PositionDescription,
            results::ElectionResults,
            role::RoleDescription,
        },
        common::{Approval, AuditAction, CandidateStatus, PositionStatus},
        db::{
            audit::NewAuditEntry,
            candidate::Candidate,
            election::{Election, ElectionCore, NewElection},
            organization::NewOrganization,
            position::Position,
            role::{NewRole, Role, RoleCore},
            vote::Vote,
        },
        mongodb::{is_duplicate_key_error, is_transient_transaction_error, Coll, Id},
    },
};

use super::common::{
    approved_election_by_join_code, election_by_id, is_election_admin, log_action, require_member,
    TXN_RETRIES,
};

pub fn routes() -> Vec<Route> {
    routes![
        my_elections,
        lookup_election,
        join_election,
        request_workspace,
        election_details,
        election_positions,
        election_candidates,
        election_results,
    ]
}

/// Elections the caller belongs to, in any role and any status.
#[get("/elections")]
async fn my_elections(
    token: AuthToken,
    roles: Coll<Role>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionSummary>>> {
    let election_ids = roles
        .find(doc! { "user_id": *token.user_id }, None)
        .await?
        .try_collect::<Vec<_>>()
        .await?
        .into_iter()
        .filter_map(|role| role.election_id)
        .map(|id| *id)
        .collect::<Vec<_>>();

    let summaries = elections
        .find(doc! { "_id": { "$in": election_ids } }, None)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(Json(summaries))
}

/// Pre-join discovery: resolve a join code to an approved election.
#[get("/elections/lookup/<join_code>")]
async fn lookup_election(
    join_code: &str,
    elections: Coll<Election>,
) -> Result<Json<ElectionSummary>> {
    let election = approved_election_by_join_code(join_code, &elections).await?;
    Ok(Json(election.into()))
}

/// Join an approved election as a voter.
///
/// The unique index on `(user_id, election_id)` is what rejects a double
/// join; there is no racy existence pre-check.
#[post("/elections/join", data = "<request>", format = "json")]
async fn join_election(
    token: AuthToken,
    request: Json<JoinRequest>,
    elections: Coll<Election>,
    roles: Coll<NewRole>,
    audit: Coll<NewAuditEntry>,
) -> Result<Json<RoleDescription>> {
    let election = approved_election_by_join_code(&request.join_code, &elections).await?;

    let role = RoleCore::voter(token.user_id, election.id, election.org_id.clone());
    let role_id: Id = match roles.insert_one(&role, None).await {
        Ok(result) => result.inserted_id.as_object_id().unwrap().into(),
        Err(err) if is_duplicate_key_error(&err) => {
            return Err(Error::conflict(format!(
                "User {} is already registered for election {}",
                token.user_id, election.id
            )));
        }
        Err(err) => return Err(err.into()),
    };

    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::JoinElection,
            election.id,
            election.org_id.clone(),
            election.join_code.clone(),
        ),
    )
    .await;

    Ok(Json(Role { id: role_id, role }.into()))
}

/// Request a new election workspace.
///
/// Creates the organization on first use, the election in `Pending`
/// approval, and a pending admin role for the requester, atomically.
#[post("/elections", data = "<request>", format = "json")]
async fn request_workspace(
    token: AuthToken,
    request: Json<WorkspaceRequest>,
    orgs: Coll<NewOrganization>,
    new_elections: Coll<NewElection>,
    new_roles: Coll<NewRole>,
    elections: Coll<Election>,
    audit: Coll<NewAuditEntry>,
    db_client: &State<Client>,
) -> Result<Json<ElectionDescription>> {
    let request = request.0;
    if request.title.trim().is_empty() {
        return Err(Error::validation("Election title must not be empty"));
    }
    if request.org_id.trim().is_empty() {
        return Err(Error::validation("Organization ID must not be empty"));
    }
    if request.start >= request.end {
        return Err(Error::validation("Election must end after it starts"));
    }

    let mut attempt = 0;
    let election_id = loop {
        match workspace_once(
            token.user_id,
            &request,
            &orgs,
            &new_elections,
            &new_roles,
            db_client.inner(),
        )
        .await
        {
            Ok(id) => break id,
            // A transient abort, or the freak event of a join code collision;
            // both are safe to re-run (the code is regenerated each attempt).
            Err(Error::Db(ref db_err))
                if (is_transient_transaction_error(db_err) || is_duplicate_key_error(db_err))
                    && attempt < TXN_RETRIES =>
            {
                attempt += 1;
                debug!("Retrying workspace creation (attempt {attempt})");
            }
            Err(err) => return Err(err),
        }
    };

    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::RequestWorkspace,
            election_id,
            request.org_id.clone(),
            request.title.clone(),
        ),
    )
    .await;

    let election = election_by_id(election_id, &elections).await?;
    Ok(Json(election.into()))
}

/// Full details of an election the caller belongs to.
#[get("/elections/<election_id>")]
async fn election_details(
    token: AuthToken,
    election_id: Id,
    elections: Coll<Election>,
    roles: Coll<Role>,
) -> Result<Json<ElectionDescription>> {
    require_member(token.user_id, election_id, &roles).await?;
    let election = election_by_id(election_id, &elections).await?;
    Ok(Json(election.into()))
}

/// The election's positions, oldest first. Deleted positions are filtered
/// out here, not by the caller.
#[get("/elections/<election_id>/positions")]
async fn election_positions(
    token: AuthToken,
    election_id: Id,
    roles: Coll<Role>,
    positions: Coll<Position>,
) -> Result<Json<Vec<PositionDescription>>> {
    require_member(token.user_id, election_id, &roles).await?;

    let filter = doc! {
        "election_id": *election_id,
        "status": PositionStatus::Active,
    };
    let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
    let position_list = positions
        .find(filter, options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(Json(position_list))
}

/// The election's candidates, oldest first, soft-deleted ones excluded.
#[get("/elections/<election_id>/candidates")]
async fn election_candidates(
    token: AuthToken,
    election_id: Id,
    roles: Coll<Role>,
    candidates: Coll<Candidate>,
) -> Result<Json<Vec<CandidateDescription>>> {
    require_member(token.user_id, election_id, &roles).await?;

    let filter = doc! {
        "election_id": *election_id,
        "status": { "$ne": CandidateStatus::Deleted },
    };
    let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
    let candidate_list = candidates
        .find(filter, options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(Json(candidate_list))
}

/// Aggregated results, recomputed from the vote ledger on every call.
///
/// Admins of the election always see full counts. Everyone else sees them
/// only once the results are approved AND the election has ended; until
/// then the counts are withheld.
#[get("/elections/<election_id>/results")]
async fn election_results(
    token: Option<AuthToken>,
    election_id: Id,
    elections: Coll<Election>,
    roles: Coll<Role>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
) -> Result<Json<ElectionResults>> {
    let election = election_by_id(election_id, &elections).await?;

    let is_admin = match token {
        Some(token) => is_election_admin(token.user_id, election_id, &roles).await?,
        None => false,
    };

    // Unapproved elections are invisible to non-admins.
    if !is_admin && election.approval != Approval::Approved {
        return Err(Error::not_found(format!("Election {}", election_id)));
    }

    let position_list = positions
        .find(
            doc! { "election_id": *election_id, "status": PositionStatus::Active },
            FindOptions::builder().sort(doc! { "created_at": 1 }).build(),
        )
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    let candidate_list = candidates
        .find(
            doc! { "election_id": *election_id, "status": { "$ne": CandidateStatus::Deleted } },
            None,
        )
        .await?
        .try_collect::<Vec<_>>()
        .await?;
    let vote_list = votes
        .find(doc! { "election_id": *election_id }, None)
        .await?
        .try_collect::<Vec<_>>()
        .await?;

    let results =
        ElectionResults::tabulate(election_id, &position_list, &candidate_list, &vote_list);

    let full = is_admin || (election.results_visible && election.has_ended(Utc::now()));
    if full {
        Ok(Json(results))
    } else {
        Ok(Json(results.redacted()))
    }
}

/// One attempt at the workspace creation transaction.
/// Dropping the session without committing rolls everything back.
async fn workspace_once(
    user_id: Id,
    request: &WorkspaceRequest,
    orgs: &Coll<NewOrganization>,
    elections: &Coll<NewElection>,
    roles: &Coll<NewRole>,
    db_client: &Client,
) -> Result<Id> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    // Create the organization on first use; an existing one is left alone.
    let org_name = request
        .org_name
        .clone()
        .unwrap_or_else(|| request.org_id.clone());
    let org = NewOrganization::new(request.org_id.clone(), org_name);
    let upsert = UpdateOptions::builder().upsert(true).build();
    orgs.update_one_with_session(
        doc! { "org_id": &request.org_id },
        doc! { "$setOnInsert": to_document(&org).expect("Serialisation is infallible") },
        upsert,
        &mut session,
    )
    .await?;

    // Create the election, pending approval.
    let election = ElectionCore::new(
        request.title.clone(),
        request.description.clone(),
        request.org_id.clone(),
        request.start,
        request.end,
        request.total_voters,
        user_id,
    );
    let election_id: Id = elections
        .insert_one_with_session(&election, None, &mut session)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Safe because the ID comes directly from the database.
        .into();

    // The requester becomes the election's admin, pending approval.
    let role = RoleCore::pending_admin(user_id, election_id, request.org_id.clone());
    roles
        .insert_one_with_session(&role, None, &mut session)
        .await?;

    session.commit_transaction().await?;
    Ok(election_id)
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json, serde_json::json},
    };

    use crate::api::common::testing::{
        harness_user_id, insert_election_with_admin, insert_user, insert_voter, login_as,
    };
    use crate::model::{
        common::{RoleKind, RoleStatus},
        db::organization::Organization,
    };

    use super::*;

    #[backend_test(user)]
    async fn join_creates_an_approved_voter_role(client: Client, db: Database) {
        let admin_id = insert_user(&db, "Admin").await;
        let election = insert_election_with_admin(&db, admin_id).await;

        let response = client
            .post(uri!(join_election))
            .header(ContentType::JSON)
            .body(json!({ "join_code": election.join_code }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let role: RoleDescription = serde_json::from_str(&raw_response).unwrap();
        assert_eq!(role.kind, RoleKind::Voter);
        assert_eq!(role.status, RoleStatus::Approved);
        assert_eq!(role.election_id, Some(election.id));
        assert_eq!(role.user_id, harness_user_id(&db).await);
    }

    #[backend_test(user)]
    async fn joining_twice_conflicts(client: Client, db: Database) {
        let admin_id = insert_user(&db, "Admin").await;
        let election = insert_election_with_admin(&db, admin_id).await;

        let body = json!({ "join_code": election.join_code }).to_string();
        let response = client
            .post(uri!(join_election))
            .header(ContentType::JSON)
            .body(body.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .post(uri!(join_election))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test(user)]
    async fn joining_an_unknown_or_unapproved_election_fails(client: Client, db: Database) {
        // Unknown join code.
        let response = client
            .post(uri!(join_election))
            .header(ContentType::JSON)
            .body(json!({ "join_code": "no-such-code" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        // A pending (unapproved) election is just as invisible.
        let requester = insert_user(&db, "Requester").await;
        let pending = ElectionCore::pending_example(requester);
        let join_code = pending.join_code.clone();
        Coll::<NewElection>::from_db(&db)
            .insert_one(&pending, None)
            .await
            .unwrap();

        let response = client
            .post(uri!(join_election))
            .header(ContentType::JSON)
            .body(json!({ "join_code": join_code }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(user)]
    async fn workspace_request_creates_election_org_and_admin_role(client: Client, db: Database) {
        let response = client
            .post(uri!(request_workspace))
            .header(ContentType::JSON)
            .body(json!(WorkspaceRequest::example()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let election: ElectionDescription = serde_json::from_str(&raw_response).unwrap();
        assert_eq!(election.approval, Approval::Pending);
        assert!(!election.results_visible);
        assert!(election
            .join_code
            .starts_with(&WorkspaceRequest::example().org_id));

        // The organization was created.
        let org = Coll::<Organization>::from_db(&db)
            .find_one(doc! { "org_id": &WorkspaceRequest::example().org_id }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(org.name, WorkspaceRequest::example().org_name.unwrap());

        // The requester holds a pending admin role.
        let requester = harness_user_id(&db).await;
        let role = Coll::<Role>::from_db(&db)
            .find_one(
                doc! { "user_id": *requester, "election_id": *election.id },
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.kind, RoleKind::Admin);
        assert_eq!(role.status, RoleStatus::Pending);
    }

    #[backend_test(user)]
    async fn organization_creation_is_idempotent(client: Client, db: Database) {
        for _ in 0..2 {
            let response = client
                .post(uri!(request_workspace))
                .header(ContentType::JSON)
                .body(json!(WorkspaceRequest::example()).to_string())
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
        }

        let org_count = Coll::<Organization>::from_db(&db)
            .count_documents(doc! { "org_id": &WorkspaceRequest::example().org_id }, None)
            .await
            .unwrap();
        assert_eq!(org_count, 1);
    }

    #[backend_test(user)]
    async fn workspace_request_is_validated(client: Client, db: Database) {
        // End before start.
        let mut request = WorkspaceRequest::example();
        std::mem::swap(&mut request.start, &mut request.end);
        let response = client
            .post(uri!(request_workspace))
            .header(ContentType::JSON)
            .body(json!(request).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        // Empty title.
        let mut request = WorkspaceRequest::example();
        request.title = "  ".to_string();
        let response = client
            .post(uri!(request_workspace))
            .header(ContentType::JSON)
            .body(json!(request).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        let _ = &db;
    }

    #[backend_test(user)]
    async fn election_details_require_membership(client: Client, db: Database) {
        let admin_id = insert_user(&db, "Admin").await;
        let election = insert_election_with_admin(&db, admin_id).await;

        // Not a member yet.
        let response = client
            .get(uri!(election_details(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        // Join, then try again.
        let voter = harness_user_id(&db).await;
        insert_voter(&db, voter, &election).await;
        let response = client
            .get(uri!(election_details(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let details: ElectionDescription = serde_json::from_str(&raw_response).unwrap();
        assert_eq!(details.id, election.id);
        assert_eq!(details.join_code, election.join_code);
    }

    #[backend_test(user)]
    async fn my_elections_lists_only_joined(client: Client, db: Database) {
        let admin_id = insert_user(&db, "Admin").await;
        let joined = insert_election_with_admin(&db, admin_id).await;
        let _other = insert_election_with_admin(&db, insert_user(&db, "Other").await).await;

        let voter = harness_user_id(&db).await;
        insert_voter(&db, voter, &joined).await;

        let response = client.get(uri!(my_elections)).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let summaries: Vec<ElectionSummary> = serde_json::from_str(&raw_response).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, joined.id);
    }

    #[backend_test]
    async fn lookup_by_join_code_is_public(client: Client, db: Database) {
        let admin_id = insert_user(&db, "Admin").await;
        let election = insert_election_with_admin(&db, admin_id).await;

        let response = client
            .get(uri!(lookup_election(&election.join_code)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let summary: ElectionSummary = serde_json::from_str(&raw_response).unwrap();
        assert_eq!(summary.id, election.id);

        let response = client
            .get(uri!(lookup_election("missing-code")))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    /// Property: the dual visibility condition. Non-admins see full counts
    /// iff results are approved and the election has ended; admins always do.
    #[backend_test(user)]
    async fn results_visibility_gate(client: Client, db: Database) {
        use crate::model::db::{
            candidate::{CandidateCore, NewCandidate},
            position::{NewPosition, PositionCore},
            vote::{NewVote, VoteCore},
        };

        let admin_id = insert_user(&db, "Admin").await;
        let election = insert_election_with_admin(&db, admin_id).await;
        let voter = harness_user_id(&db).await;
        insert_voter(&db, voter, &election).await;

        // One position, two candidates, one vote for the first.
        let position_id: Id = Coll::<NewPosition>::from_db(&db)
            .insert_one(PositionCore::example(election.id), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        let candidate_a: Id = Coll::<NewCandidate>::from_db(&db)
            .insert_one(
                CandidateCore::new(
                    election.id,
                    position_id,
                    "A".to_string(),
                    String::new(),
                    None,
                ),
                None,
            )
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        Coll::<NewCandidate>::from_db(&db)
            .insert_one(
                CandidateCore::new(
                    election.id,
                    position_id,
                    "B".to_string(),
                    String::new(),
                    None,
                ),
                None,
            )
            .await
            .unwrap();
        Coll::<NewVote>::from_db(&db)
            .insert_one(
                VoteCore::new(
                    voter,
                    election.id,
                    position_id,
                    candidate_a,
                    election.org_id.clone(),
                ),
                None,
            )
            .await
            .unwrap();

        // Voter, before the end: redacted.
        let response = client
            .get(uri!(election_results(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let results: ElectionResults =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(!results.visible);
        assert_eq!(results.total_votes, None);
        assert!(results.positions[0].tallies.is_none());

        // Admin, before the end: full counts.
        login_as(&client, admin_id).await;
        let response = client
            .get(uri!(election_results(election.id)))
            .dispatch()
            .await;
        let results: ElectionResults =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(results.visible);
        assert_eq!(results.total_votes, Some(1));

        // Approve the results while the election is still running: the
        // voter must stay redacted, both conditions are required.
        Coll::<Election>::from_db(&db)
            .update_one(
                election.id.as_doc(),
                doc! { "$set": { "results_visible": true } },
                None,
            )
            .await
            .unwrap();
        login_as(&client, voter).await;
        let response = client
            .get(uri!(election_results(election.id)))
            .dispatch()
            .await;
        let results: ElectionResults =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(!results.visible);

        // Now also end the election.
        let update = doc! {
            "$set": {
                "end": mongodb::bson::DateTime::from_chrono(Utc::now() - chrono::Duration::minutes(1)),
            }
        };
        Coll::<Election>::from_db(&db)
            .update_one(election.id.as_doc(), update, None)
            .await
            .unwrap();

        // Voter, after end + approval: full counts, winner A.
        let response = client
            .get(uri!(election_results(election.id)))
            .dispatch()
            .await;
        let results: ElectionResults =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(results.visible);
        assert_eq!(results.total_votes, Some(1));
        let tallies = results.positions[0].tallies.as_ref().unwrap();
        assert_eq!(
            tallies
                .iter()
                .find(|t| t.candidate_id == candidate_a)
                .unwrap()
                .votes,
            1
        );
        assert_eq!(
            results.positions[0].winners.as_deref(),
            Some(&[candidate_a][..])
        );
    }
}
