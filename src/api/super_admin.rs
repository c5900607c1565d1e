use mongodb::{
    bson::{doc, DateTime},
    options::FindOptions,
    Client,
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            election::{ElectionSummary, RejectionRequest},
        },
        common::{Approval, AuditAction, RoleKind, RoleStatus},
        db::{
            audit::NewAuditEntry,
            election::Election,
            notification::{NewNotification, NotificationCore},
            role::Role,
        },
        mongodb::{is_transient_transaction_error, Coll, Id},
    },
};

use super::common::{election_by_id, log_action, require_super_admin, TXN_RETRIES};

pub fn routes() -> Vec<Route> {
    routes![pending_elections, approve_election, reject_election]
}

/// Workspace requests awaiting a decision, newest first.
#[get("/elections/pending")]
async fn pending_elections(
    token: AuthToken,
    roles: Coll<Role>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionSummary>>> {
    require_super_admin(token.user_id, &roles).await?;

    let filter = doc! { "approval": Approval::Pending };
    let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let pending = elections
        .find(filter, options)
        .await?
        .map_ok(Into::into)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(Json(pending))
}

/// Approve a workspace request, cascading to its pending admin roles.
#[post("/elections/<election_id>/approve")]
async fn approve_election(
    token: AuthToken,
    election_id: Id,
    roles: Coll<Role>,
    elections: Coll<Election>,
    notifications: Coll<NewNotification>,
    audit: Coll<NewAuditEntry>,
    db_client: &State<Client>,
) -> Result<()> {
    require_super_admin(token.user_id, &roles).await?;
    let election = election_by_id(election_id, &elections).await?;

    let admins = decide_election(
        token.user_id,
        &election,
        Approval::Approved,
        &roles,
        &elections,
        db_client.inner(),
    )
    .await?;

    // Tell the admins their workspace is live. Stored records only;
    // delivery is someone else's job.
    for admin in &admins {
        let notification = NotificationCore::new(
            admin.user_id,
            "Election approved",
            format!(
                "Your election '{}' has been approved. Join code: {}",
                election.title, election.join_code
            ),
            election.id,
        );
        notifications.insert_one(&notification, None).await?;
    }

    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::ApproveElection,
            election.id,
            election.org_id.clone(),
            None,
        ),
    )
    .await;

    Ok(())
}

/// Reject a workspace request, cascading to its pending admin roles.
#[post("/elections/<election_id>/reject", data = "<request>", format = "json")]
async fn reject_election(
    token: AuthToken,
    election_id: Id,
    request: Json<RejectionRequest>,
    roles: Coll<Role>,
    elections: Coll<Election>,
    notifications: Coll<NewNotification>,
    audit: Coll<NewAuditEntry>,
    db_client: &State<Client>,
) -> Result<()> {
    require_super_admin(token.user_id, &roles).await?;
    let election = election_by_id(election_id, &elections).await?;

    let admins = decide_election(
        token.user_id,
        &election,
        Approval::Rejected,
        &roles,
        &elections,
        db_client.inner(),
    )
    .await?;

    let reason = request
        .0
        .reason
        .unwrap_or_else(|| "No reason given".to_string());
    for admin in &admins {
        let notification = NotificationCore::new(
            admin.user_id,
            "Election rejected",
            format!(
                "Your election '{}' has been rejected: {}",
                election.title, reason
            ),
            election.id,
        );
        notifications.insert_one(&notification, None).await?;
    }

    log_action(
        &audit,
        NewAuditEntry::new(
            token.user_id,
            AuditAction::RejectElection,
            election.id,
            election.org_id.clone(),
            reason,
        ),
    )
    .await;

    Ok(())
}

/// Set the election's approval and cascade the decision to its pending
/// admin roles, atomically. Returns the affected roles.
async fn decide_election(
    decided_by: Id,
    election: &Election,
    decision: Approval,
    roles: &Coll<Role>,
    elections: &Coll<Election>,
    db_client: &Client,
) -> Result<Vec<Role>> {
    let mut attempt = 0;
    loop {
        match decide_election_once(decided_by, election, decision, roles, elections, db_client)
            .await
        {
            Ok(admins) => return Ok(admins),
            Err(Error::Db(ref db_err))
                if is_transient_transaction_error(db_err) && attempt < TXN_RETRIES =>
            {
                attempt += 1;
                debug!("Retrying election decision (attempt {attempt})");
            }
            Err(err) => return Err(err),
        }
    }
}

/// One attempt at the decision transaction.
async fn decide_election_once(
    decided_by: Id,
    election: &Election,
    decision: Approval,
    roles: &Coll<Role>,
    elections: &Coll<Election>,
    db_client: &Client,
) -> Result<Vec<Role>> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    // Approval is decided once; a second decision conflicts.
    let filter = doc! {
        "_id": *election.id,
        "approval": Approval::Pending,
    };
    let update = doc! { "$set": { "approval": decision } };
    let result = elections
        .update_one_with_session(filter, update, None, &mut session)
        .await?;
    if result.modified_count != 1 {
        return Err(Error::conflict(format!(
            "Election {} has already been decided",
            election.id
        )));
    }

    // Collect the pending admin roles, then cascade the same decision.
    let admin_filter = doc! {
        "election_id": *election.id,
        "kind": RoleKind::Admin,
        "status": RoleStatus::Pending,
    };
    let mut cursor = roles
        .find_with_session(admin_filter.clone(), None, &mut session)
        .await?;
    let mut admins = Vec::new();
    while let Some(role) = cursor.next(&mut session).await {
        admins.push(role?);
    }

    let role_status = match decision {
        Approval::Approved => RoleStatus::Approved,
        _ => RoleStatus::Rejected,
    };
    let role_update = doc! {
        "$set": {
            "status": role_status,
            "decided_by": *decided_by,
            "decided_at": DateTime::now(),
        }
    };
    roles
        .update_many_with_session(admin_filter, role_update, None, &mut session)
        .await?;

    session.commit_transaction().await?;
    Ok(admins)
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json, serde_json::json},
    };

    use crate::api::common::testing::{harness_user_id, insert_user, login_as};
    use crate::model::db::{
        election::{ElectionCore, NewElection},
        notification::Notification,
        role::{NewRole, RoleCore},
    };

    use super::*;

    /// Insert a pending workspace for a fresh requester and return
    /// (election, requester).
    async fn insert_workspace_request(db: &Database) -> (Election, Id) {
        let requester = insert_user(db, "Requester").await;
        let core = ElectionCore::pending_example(requester);
        let election_id: Id = Coll::<NewElection>::from_db(db)
            .insert_one(&core, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        let role = RoleCore::pending_admin(requester, election_id, core.org_id.clone());
        Coll::<NewRole>::from_db(db)
            .insert_one(&role, None)
            .await
            .unwrap();
        let election = Coll::<Election>::from_db(db)
            .find_one(election_id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        (election, requester)
    }

    #[backend_test(super_admin)]
    async fn approving_cascades_to_admin_roles(client: Client, db: Database) {
        let super_admin = harness_user_id(&db).await;
        let (election, requester) = insert_workspace_request(&db).await;

        let response = client
            .post(uri!(approve_election(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // The election is approved.
        let approved = Coll::<Election>::from_db(&db)
            .find_one(election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.approval, Approval::Approved);

        // The requester's admin role followed.
        let role = Coll::<Role>::from_db(&db)
            .find_one(
                doc! { "user_id": *requester, "election_id": *election.id },
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.status, RoleStatus::Approved);
        assert_eq!(role.decided_by, Some(super_admin));

        // And was told about it.
        let notification = Coll::<Notification>::from_db(&db)
            .find_one(doc! { "user_id": *requester }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(notification.message.contains(&election.join_code));
        assert!(!notification.read);
    }

    #[backend_test(super_admin)]
    async fn rejecting_cascades_and_keeps_the_reason(client: Client, db: Database) {
        let _ = harness_user_id(&db).await;
        let (election, requester) = insert_workspace_request(&db).await;

        let response = client
            .post(uri!(reject_election(election.id)))
            .header(ContentType::JSON)
            .body(json!({ "reason": "Duplicate of an existing election" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let rejected = Coll::<Election>::from_db(&db)
            .find_one(election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.approval, Approval::Rejected);

        let role = Coll::<Role>::from_db(&db)
            .find_one(
                doc! { "user_id": *requester, "election_id": *election.id },
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.status, RoleStatus::Rejected);

        let notification = Coll::<Notification>::from_db(&db)
            .find_one(doc! { "user_id": *requester }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(notification.message.contains("Duplicate of an existing"));
    }

    #[backend_test(super_admin)]
    async fn elections_are_decided_exactly_once(client: Client, db: Database) {
        let (election, _) = insert_workspace_request(&db).await;

        let response = client
            .post(uri!(approve_election(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Re-approving or rejecting after the fact conflicts.
        let response = client
            .post(uri!(approve_election(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        let response = client
            .post(uri!(reject_election(election.id)))
            .header(ContentType::JSON)
            .body(json!({}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test(super_admin)]
    async fn pending_listing_shows_undecided_workspaces(client: Client, db: Database) {
        let (election, _) = insert_workspace_request(&db).await;

        let response = client.get(uri!(pending_elections)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let pending: Vec<ElectionSummary> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, election.id);

        // Decided elections drop out.
        client
            .post(uri!(approve_election(election.id)))
            .dispatch()
            .await;
        let response = client.get(uri!(pending_elections)).dispatch().await;
        let pending: Vec<ElectionSummary> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(pending.is_empty());
    }

    #[backend_test(user)]
    async fn election_decisions_are_super_admin_only(client: Client, db: Database) {
        let (election, _) = insert_workspace_request(&db).await;

        // A regular user, even an approved admin of the election itself,
        // cannot decide workspaces.
        let user = harness_user_id(&db).await;
        let mut role = RoleCore::pending_admin(user, election.id, election.org_id.clone());
        role.status = RoleStatus::Approved;
        Coll::<NewRole>::from_db(&db)
            .insert_one(&role, None)
            .await
            .unwrap();

        login_as(&client, user).await;
        let response = client
            .post(uri!(approve_election(election.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }
}
