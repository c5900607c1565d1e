use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    audit::{AuditEntry, NewAuditEntry},
    candidate::{Candidate, NewCandidate},
    election::{Election, NewElection},
    notification::{NewNotification, Notification},
    organization::{NewOrganization, Organization},
    position::{NewPosition, Position},
    role::{NewRole, Role},
    user::{NewUser, User},
    vote::{NewVote, Vote},
    voting_token::{NewVotingToken, VotingToken},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `derive(Clone)` would require `T: Clone`, which we don't need.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// User collections
const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}
impl MongoCollection for NewUser {
    const NAME: &'static str = USERS;
}

// Organization collections
const ORGANIZATIONS: &str = "organizations";
impl MongoCollection for Organization {
    const NAME: &'static str = ORGANIZATIONS;
}
impl MongoCollection for NewOrganization {
    const NAME: &'static str = ORGANIZATIONS;
}

// Election collections
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}
impl MongoCollection for NewElection {
    const NAME: &'static str = ELECTIONS;
}

// Role collections
const ROLES: &str = "roles";
impl MongoCollection for Role {
    const NAME: &'static str = ROLES;
}
impl MongoCollection for NewRole {
    const NAME: &'static str = ROLES;
}

// Position collections
const POSITIONS: &str = "positions";
impl MongoCollection for Position {
    const NAME: &'static str = POSITIONS;
}
impl MongoCollection for NewPosition {
    const NAME: &'static str = POSITIONS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// Vote collections
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

// Voting token collections
const VOTING_TOKENS: &str = "voting_tokens";
impl MongoCollection for VotingToken {
    const NAME: &'static str = VOTING_TOKENS;
}
impl MongoCollection for NewVotingToken {
    const NAME: &'static str = VOTING_TOKENS;
}

// Audit log collections
const AUDIT_LOG: &str = "audit_log";
impl MongoCollection for AuditEntry {
    const NAME: &'static str = AUDIT_LOG;
}
impl MongoCollection for NewAuditEntry {
    const NAME: &'static str = AUDIT_LOG;
}

// Notification collections
const NOTIFICATIONS: &str = "notifications";
impl MongoCollection for Notification {
    const NAME: &'static str = NOTIFICATIONS;
}
impl MongoCollection for NewNotification {
    const NAME: &'static str = NOTIFICATIONS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The vote index is what makes `castVote` safe under concurrency: a
/// duplicate (voter, election, position) insert is rejected by the storage
/// engine itself, not by an application-level read-then-write.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Vote collection: at most one vote per (voter, election, position).
    let vote_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "election_id": 1, "position_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Role collection: at most one role per (user, election).
    let role_index = IndexModel::builder()
        .keys(doc! {"user_id": 1, "election_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Role>::from_db(db)
        .create_index(role_index, None)
        .await?;

    // Voting token collection: token strings are unique within an election.
    let token_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "token": 1})
        .options(unique.clone())
        .build();
    Coll::<VotingToken>::from_db(db)
        .create_index(token_index, None)
        .await?;

    // Election collection: join codes are globally unique.
    let election_index = IndexModel::builder()
        .keys(doc! {"join_code": 1})
        .options(unique.clone())
        .build();
    Coll::<Election>::from_db(db)
        .create_index(election_index, None)
        .await?;

    // Organization collection: upserts are keyed by the org slug.
    let org_index = IndexModel::builder()
        .keys(doc! {"org_id": 1})
        .options(unique)
        .build();
    Coll::<Organization>::from_db(db)
        .create_index(org_index, None)
        .await?;

    Ok(())
}
