use mongodb::bson::doc;

use crate::error::{Error, Result};
use crate::model::{
    common::{Approval, RoleKind, RoleStatus},
    db::{
        audit::NewAuditEntry,
        election::Election,
        role::Role,
    },
    mongodb::{Coll, Id},
};

/// How many times to re-run a multi-document transaction that aborted with
/// a transient error (i.e. lost a write conflict to a concurrent request).
pub const TXN_RETRIES: u32 = 3;

/// Look up an election by ID.
pub async fn election_by_id(election_id: Id, elections: &Coll<Election>) -> Result<Election> {
    elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {}", election_id)))
}

/// Look up an approved election by its public join code.
/// An unknown code and a not-yet-approved election are indistinguishable.
pub async fn approved_election_by_join_code(
    join_code: &str,
    elections: &Coll<Election>,
) -> Result<Election> {
    let filter = doc! {
        "join_code": join_code,
        "approval": Approval::Approved,
    };
    elections
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with join code '{}'", join_code)))
}

/// The caller's role in the given election, if any.
pub async fn role_in_election(
    user_id: Id,
    election_id: Id,
    roles: &Coll<Role>,
) -> Result<Option<Role>> {
    let filter = doc! {
        "user_id": *user_id,
        "election_id": *election_id,
    };
    Ok(roles.find_one(filter, None).await?)
}

/// Require an approved role of any kind in the given election
/// (or system-wide super-admin rights).
pub async fn require_member(user_id: Id, election_id: Id, roles: &Coll<Role>) -> Result<()> {
    let member = role_in_election(user_id, election_id, roles)
        .await?
        .map(|role| role.status == RoleStatus::Approved)
        .unwrap_or(false);
    if member || is_super_admin(user_id, roles).await? {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "User {} is not a member of election {}",
            user_id, election_id
        )))
    }
}

/// Require an approved voter role in the given election.
/// This is the gate in front of the vote ledger.
pub async fn require_voter(user_id: Id, election_id: Id, roles: &Coll<Role>) -> Result<Role> {
    role_in_election(user_id, election_id, roles)
        .await?
        .filter(|role| role.kind == RoleKind::Voter && role.status == RoleStatus::Approved)
        .ok_or_else(|| {
            Error::forbidden(format!(
                "User {} has no approved voter role in election {}",
                user_id, election_id
            ))
        })
}

/// Does the user hold approved admin rights over the given election?
/// Super admins administer every election.
pub async fn is_election_admin(user_id: Id, election_id: Id, roles: &Coll<Role>) -> Result<bool> {
    let admin = role_in_election(user_id, election_id, roles)
        .await?
        .map(|role| role.kind == RoleKind::Admin && role.status == RoleStatus::Approved)
        .unwrap_or(false);
    Ok(admin || is_super_admin(user_id, roles).await?)
}

/// Require approved admin rights over the given election.
pub async fn require_election_admin(
    user_id: Id,
    election_id: Id,
    roles: &Coll<Role>,
) -> Result<()> {
    if is_election_admin(user_id, election_id, roles).await? {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "User {} is not an admin of election {}",
            user_id, election_id
        )))
    }
}

/// Does the user hold an approved system-wide super-admin role?
pub async fn is_super_admin(user_id: Id, roles: &Coll<Role>) -> Result<bool> {
    let filter = doc! {
        "user_id": *user_id,
        "kind": RoleKind::SuperAdmin,
        "status": RoleStatus::Approved,
    };
    Ok(roles.find_one(filter, None).await?.is_some())
}

/// Require an approved system-wide super-admin role.
pub async fn require_super_admin(user_id: Id, roles: &Coll<Role>) -> Result<()> {
    if is_super_admin(user_id, roles).await? {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "User {} is not a super admin",
            user_id
        )))
    }
}

/// Append an audit log entry, best-effort.
///
/// A failed audit write must not fail the action it describes, so the error
/// is only logged.
pub async fn log_action(audit: &Coll<NewAuditEntry>, entry: NewAuditEntry) {
    if let Err(e) = audit.insert_one(&entry, None).await {
        error!("Failed to write audit entry for {:?}: {e}", entry.action);
    }
}

/// Shared helpers for route tests.
#[cfg(test)]
pub mod testing {
    use chrono::Utc;
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json::json,
    };

    use crate::model::{
        api::auth::AuthToken,
        common::RoleStatus,
        db::{
            election::{Election, ElectionCore, NewElection},
            role::{NewRole, RoleCore},
            user::NewUser,
        },
        mongodb::{Coll, Id},
    };
    use crate::Config;

    /// Insert a fresh registered identity and return its ID.
    pub async fn insert_user(db: &Database, display_name: &str) -> Id {
        let user = NewUser {
            display_name: display_name.to_string(),
            anonymous: false,
            created_at: Utc::now(),
        };
        Coll::<NewUser>::from_db(db)
            .insert_one(&user, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into()
    }

    /// The identity created by the test harness login.
    pub async fn harness_user_id(db: &Database) -> Id {
        use mongodb::bson::doc;
        Coll::<crate::model::db::user::User>::from_db(db)
            .find_one(
                doc! { "display_name": NewUser::example().display_name },
                None,
            )
            .await
            .unwrap()
            .unwrap()
            .id
    }

    /// Open a session for the given identity, replacing any current one.
    pub async fn login_as(client: &Client, user_id: Id) {
        let config = client.rocket().state::<Config>().unwrap();
        let jwt = AuthToken::new(user_id).into_jwt(config);
        let response = client
            .post(uri!(crate::api::auth::session))
            .header(ContentType::JSON)
            .body(json!({ "token": jwt }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    /// Insert an approved, currently-ongoing election administered by the
    /// given user, and return it.
    pub async fn insert_election_with_admin(db: &Database, admin_id: Id) -> Election {
        let id: Id = Coll::<NewElection>::from_db(db)
            .insert_one(ElectionCore::ongoing_example(admin_id), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        let election = Coll::<Election>::from_db(db)
            .find_one(id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();

        let mut role = RoleCore::pending_admin(admin_id, election.id, election.org_id.clone());
        role.status = RoleStatus::Approved;
        Coll::<NewRole>::from_db(db)
            .insert_one(&role, None)
            .await
            .unwrap();

        election
    }

    /// Grant the given user an approved voter role in the election.
    pub async fn insert_voter(db: &Database, user_id: Id, election: &Election) {
        let role = RoleCore::voter(user_id, election.id, election.org_id.clone());
        Coll::<NewRole>::from_db(db)
            .insert_one(&role, None)
            .await
            .unwrap();
    }
}
