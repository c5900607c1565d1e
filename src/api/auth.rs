use chrono::Utc;
use mongodb::{
    bson::{doc, DateTime},
    Client,
};
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        api::{
            auth::{AuthToken, AUTH_TOKEN_COOKIE},
            voting_token::{RedeemRequest, RedeemResponse},
        },
        common::AuditAction,
        db::{
            audit::NewAuditEntry,
            election::Election,
            role::{NewRole, RoleCore},
            user::{NewUser, User},
            voting_token::VotingToken,
        },
        mongodb::{is_transient_transaction_error, Coll, Id},
    },
};

use super::common::{approved_election_by_join_code, log_action, TXN_RETRIES};

pub fn routes() -> Vec<Route> {
    routes![session, redeem, logout]
}

/// A registered identity's request to open a session, presenting a JWT
/// minted by the external identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionRequest {
    pub token: String,
}

#[post("/auth/session", data = "<request>", format = "json")]
pub async fn session(
    request: Json<SessionRequest>,
    cookies: &CookieJar<'_>,
    users: Coll<User>,
    config: &State<Config>,
) -> Result<()> {
    let token = AuthToken::from_jwt(&request.token, config)?;

    // The provider signs for identities it has provisioned; make sure this
    // one actually exists before handing out a session.
    users
        .find_one(token.user_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Identity {}", token.user_id)))?;

    cookies.add(token.into_cookie(config));
    Ok(())
}

/// Redeem a single-use voting token for an anonymous voter session.
///
/// This is the only path that creates a voter identity without prior
/// registration. On success the identity, its approved voter role and the
/// token burn all land in one transaction; a concurrent redemption of the
/// same token makes the transaction abort and retry, at which point the
/// token reads as used and the loser gets `NotFound`.
#[post("/auth/voting-token", data = "<request>", format = "json")]
pub async fn redeem(
    request: Json<RedeemRequest>,
    cookies: &CookieJar<'_>,
    elections: Coll<Election>,
    tokens: Coll<VotingToken>,
    users: Coll<NewUser>,
    roles: Coll<NewRole>,
    audit: Coll<NewAuditEntry>,
    config: &State<Config>,
    db_client: &State<Client>,
) -> Result<Json<RedeemResponse>> {
    // An unknown join code gets the same error as a bad token.
    let election = approved_election_by_join_code(&request.join_code, &elections).await?;

    let mut attempt = 0;
    let user_id = loop {
        match redeem_once(
            &request.token,
            &election,
            &tokens,
            &users,
            &roles,
            db_client.inner(),
        )
        .await
        {
            Ok(user_id) => break user_id,
            Err(Error::Db(ref db_err))
                if is_transient_transaction_error(db_err) && attempt < TXN_RETRIES =>
            {
                attempt += 1;
                debug!("Retrying voting token redemption (attempt {attempt})");
            }
            Err(err) => return Err(err),
        }
    };

    log_action(
        &audit,
        NewAuditEntry::new(
            user_id,
            AuditAction::RedeemVotingToken,
            election.id,
            election.org_id.clone(),
            None,
        ),
    )
    .await;

    cookies.add(AuthToken::new(user_id).into_cookie(config));
    Ok(Json(RedeemResponse {
        user_id,
        election_id: election.id,
        join_code: election.join_code.clone(),
    }))
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

/// One attempt at the redemption transaction.
/// Dropping the session without committing rolls everything back.
async fn redeem_once(
    token_str: &str,
    election: &Election,
    tokens: &Coll<VotingToken>,
    users: &Coll<NewUser>,
    roles: &Coll<NewRole>,
    db_client: &Client,
) -> Result<Id> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    // A token that is absent, bound to another election, or already used is
    // reported identically, so callers can't probe which secrets exist.
    let filter = doc! {
        "election_id": *election.id,
        "token": token_str,
        "used": false,
    };
    let voting_token = tokens
        .find_one_with_session(filter, None, &mut session)
        .await?
        .ok_or_else(|| Error::not_found("Voting token"))?;
    if voting_token.is_expired(Utc::now()) {
        return Err(Error::expired("Voting token"));
    }

    // Mint the anonymous identity.
    let user = NewUser::anonymous(&voting_token.token);
    let user_id: Id = users
        .insert_one_with_session(&user, None, &mut session)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Safe because the ID comes directly from the database.
        .into();

    // Grant the approved voter role.
    let role = RoleCore::voter(user_id, election.id, election.org_id.clone());
    roles
        .insert_one_with_session(&role, None, &mut session)
        .await?;

    // Burn the token. The `used: false` condition means a redemption that
    // lost a race can never complete with an unburned token.
    let burn_filter = doc! { "_id": *voting_token.id, "used": false };
    let burn = doc! {
        "$set": {
            "used": true,
            "used_by": *user_id,
            "used_at": DateTime::now(),
        }
    };
    let result = tokens
        .update_one_with_session(burn_filter, burn, None, &mut session)
        .await?;
    if result.modified_count != 1 {
        return Err(Error::not_found("Voting token"));
    }

    session.commit_transaction().await?;
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::Database;
    use rocket::{
        futures::future::join_all,
        http::ContentType,
        local::asynchronous::Client,
        serde::json::{serde_json::json, serde_json},
    };

    use crate::model::{
        common::{RoleKind, RoleStatus},
        db::{
            election::{ElectionCore, NewElection},
            role::Role,
            voting_token::{NewVotingToken, VotingTokenCore},
        },
    };

    use super::*;

    async fn insert_ongoing_election(db: &Database) -> Election {
        let id: Id = Coll::<NewElection>::from_db(db)
            .insert_one(ElectionCore::ongoing_example(Id::new()), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        Coll::<Election>::from_db(db)
            .find_one(id.as_doc(), None)
            .await
            .unwrap()
            .unwrap()
    }

    async fn insert_token(db: &Database, election: &Election) -> VotingTokenCore {
        let token = VotingTokenCore::new(
            election.id,
            election.org_id.clone(),
            Utc::now() + Duration::days(1),
        );
        Coll::<NewVotingToken>::from_db(db)
            .insert_one(&token, None)
            .await
            .unwrap();
        token
    }

    fn redeem_body(token: &str, join_code: &str) -> String {
        json!({ "token": token, "join_code": join_code }).to_string()
    }

    #[backend_test]
    async fn redeem_mints_identity_role_and_burns_token(client: Client, db: Database) {
        let election = insert_ongoing_election(&db).await;
        let token = insert_token(&db, &election).await;

        let response = client
            .post(uri!(redeem))
            .header(ContentType::JSON)
            .body(redeem_body(&token.token, &election.join_code))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let raw_response = response.into_string().await.unwrap();
        let redeemed: RedeemResponse = serde_json::from_str(&raw_response).unwrap();
        assert_eq!(redeemed.election_id, election.id);

        // The anonymous identity exists.
        let user = Coll::<User>::from_db(&db)
            .find_one(redeemed.user_id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert!(user.anonymous);

        // It holds an approved voter role.
        let role = Coll::<Role>::from_db(&db)
            .find_one(doc! { "user_id": *redeemed.user_id }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.kind, RoleKind::Voter);
        assert_eq!(role.status, RoleStatus::Approved);
        assert_eq!(role.election_id, Some(election.id));

        // The token is burned and attributed.
        let stored = Coll::<VotingToken>::from_db(&db)
            .find_one(doc! { "token": &token.token }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.used);
        assert_eq!(stored.used_by, Some(redeemed.user_id));
    }

    #[backend_test]
    async fn unknown_used_and_wrong_election_tokens_are_indistinguishable(
        client: Client,
        db: Database,
    ) {
        let election = insert_ongoing_election(&db).await;
        let other = Coll::<NewElection>::from_db(&db)
            .insert_one(ElectionCore::closed_example(Id::new()), None)
            .await
            .unwrap();
        let other_id: Id = other.inserted_id.as_object_id().unwrap().into();

        // Unknown token.
        let response = client
            .post(uri!(redeem))
            .header(ContentType::JSON)
            .body(redeem_body("n0t4real", &election.join_code))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        // Token bound to a different election.
        let mut foreign = VotingTokenCore::new(
            other_id,
            "other-org".to_string(),
            Utc::now() + Duration::days(1),
        );
        Coll::<NewVotingToken>::from_db(&db)
            .insert_one(&foreign, None)
            .await
            .unwrap();
        let response = client
            .post(uri!(redeem))
            .header(ContentType::JSON)
            .body(redeem_body(&foreign.token, &election.join_code))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        // Already-used token.
        foreign.election_id = election.id;
        foreign.used = true;
        Coll::<NewVotingToken>::from_db(&db)
            .insert_one(&foreign, None)
            .await
            .unwrap();
        let response = client
            .post(uri!(redeem))
            .header(ContentType::JSON)
            .body(redeem_body(&foreign.token, &election.join_code))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn expired_tokens_are_rejected_distinctly(client: Client, db: Database) {
        let election = insert_ongoing_election(&db).await;
        let expired = VotingTokenCore {
            expires_at: Utc::now() - Duration::minutes(1),
            ..VotingTokenCore::new(election.id, election.org_id.clone(), Utc::now())
        };
        Coll::<NewVotingToken>::from_db(&db)
            .insert_one(&expired, None)
            .await
            .unwrap();

        let response = client
            .post(uri!(redeem))
            .header(ContentType::JSON)
            .body(redeem_body(&expired.token, &election.join_code))
            .dispatch()
            .await;
        assert_eq!(Status::Gone, response.status());

        // The token must not be burned by a failed redemption.
        let stored = Coll::<VotingToken>::from_db(&db)
            .find_one(doc! { "token": &expired.token }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.used);
    }

    /// Property: concurrent redemptions of one token succeed exactly once.
    #[backend_test]
    async fn concurrent_redemptions_succeed_exactly_once(client: Client, db: Database) {
        const ATTEMPTS: usize = 20;

        let election = insert_ongoing_election(&db).await;
        let token = insert_token(&db, &election).await;

        let requests = (0..ATTEMPTS).map(|_| {
            client
                .post(uri!(redeem))
                .header(ContentType::JSON)
                .body(redeem_body(&token.token, &election.join_code))
                .dispatch()
        });
        let responses = join_all(requests).await;

        let successes = responses
            .iter()
            .filter(|r| r.status() == Status::Ok)
            .count();
        assert_eq!(successes, 1);

        // Exactly one voter role was created, and the token is used once.
        let role_count = Coll::<Role>::from_db(&db)
            .count_documents(doc! { "election_id": *election.id }, None)
            .await
            .unwrap();
        assert_eq!(role_count, 1);
        let token_count = Coll::<VotingToken>::from_db(&db)
            .count_documents(doc! { "token": &token.token, "used": true }, None)
            .await
            .unwrap();
        assert_eq!(token_count, 1);
    }

    #[backend_test]
    async fn session_exchange_and_logout(client: Client, db: Database) {
        let user_id: Id = Coll::<NewUser>::from_db(&db)
            .insert_one(NewUser::example(), None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();

        let config = client.rocket().state::<Config>().unwrap();
        let jwt = AuthToken::new(user_id).into_jwt(config);

        let response = client
            .post(uri!(session))
            .header(ContentType::JSON)
            .body(json!({ "token": jwt }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn session_requires_a_known_identity(client: Client, db: Database) {
        // Signed for an identity that was never provisioned.
        let config = client.rocket().state::<Config>().unwrap();
        let jwt = AuthToken::new(Id::new()).into_jwt(config);
        let response = client
            .post(uri!(session))
            .header(ContentType::JSON)
            .body(json!({ "token": jwt }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        // Not signed at all.
        let response = client
            .post(uri!(session))
            .header(ContentType::JSON)
            .body(json!({ "token": "garbage" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        let _ = &db;
    }
}
