use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{db::voting_token::VotingToken, mongodb::Id};

/// Most voting tokens an admin may issue in one batch.
pub const MAX_TOKEN_BATCH: u32 = 1000;

/// A request to issue a batch of voting tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenBatchSpec {
    pub count: u32,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued batch of voting tokens.
/// The secrets are only ever returned here, at issue time.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedTokens {
    pub tokens: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Voting token details, for the admin listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct VotingTokenDescription {
    pub token: String,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl From<VotingToken> for VotingTokenDescription {
    fn from(token: VotingToken) -> Self {
        Self {
            token: token.voting_token.token,
            used: token.voting_token.used,
            expires_at: token.voting_token.expires_at,
            issued_at: token.voting_token.issued_at,
        }
    }
}

/// A request to redeem a voting token for an anonymous voter session.
#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub token: String,
    pub join_code: String,
}

/// The session minted by a successful redemption.
#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResponse {
    pub user_id: Id,
    pub election_id: Id,
    pub join_code: String,
}
