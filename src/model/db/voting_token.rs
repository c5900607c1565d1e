use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::{opt_chrono_datetime_as_bson_datetime, Id};

/// Length of an issued voting token.
pub const TOKEN_LEN: usize = 8;

/// Core voting token data, as stored in the database.
///
/// A voting token is a single-use secret that can be redeemed for an
/// anonymous approved voter role in its election. `used` flips false to true
/// exactly once, via a conditional update in the same transaction that
/// creates the anonymous identity and role; it is never reversed.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingTokenCore {
    pub election_id: Id,
    pub org_id: String,
    /// The secret handed to a voter, unique within the election.
    pub token: String,
    pub used: bool,
    /// The anonymous identity that redeemed this token, once redeemed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<Id>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub issued_at: DateTime<Utc>,
}

impl VotingTokenCore {
    /// A fresh unused token with a random secret.
    pub fn new(election_id: Id, org_id: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            election_id,
            org_id,
            token: generate_token(),
            used: false,
            used_by: None,
            used_at: None,
            expires_at,
            issued_at: Utc::now(),
        }
    }

    /// Has this token passed its expiry?
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Generate a random token secret.
fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// A voting token without an ID.
pub type NewVotingToken = VotingTokenCore;

/// A voting token from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct VotingToken {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voting_token: VotingTokenCore,
}

impl Deref for VotingToken {
    type Target = VotingTokenCore;

    fn deref(&self) -> &Self::Target {
        &self.voting_token
    }
}

impl DerefMut for VotingToken {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voting_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_fixed_width_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn expiry_is_exclusive_of_the_deadline() {
        let now = Utc::now();
        let token = VotingTokenCore::new(Id::new(), "org".to_string(), now);
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + chrono::Duration::seconds(1)));
    }
}
