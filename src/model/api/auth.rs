use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use mongodb::Database;
use rocket::{
    http::{Cookie, SameSite, Status},
    outcome::{try_outcome, IntoOutcome},
    request::{FromRequest, Outcome},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    db::user::User,
    mongodb::{Coll, Id},
};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific identity.
///
/// Identity is delegated: the external identity provider signs JWTs with the
/// shared `jwt_secret`, and this service mints its own only when a voting
/// token is redeemed for an anonymous identity. Authorization is *not* in
/// the token; it lives in the roles collection and is checked per election.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "sub")]
    pub user_id: Id,
}

impl AuthToken {
    /// Create a token for the given user.
    pub fn for_user(user: &User) -> Self {
        Self { user_id: user.id }
    }

    /// Create a token for the given user ID.
    pub fn new(user_id: Id) -> Self {
        Self { user_id }
    }

    /// Serialize this token into a session cookie.
    #[allow(clippy::missing_panics_doc)]
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let jwt = self.into_jwt(config);
        Cookie::build(AUTH_TOKEN_COOKIE, jwt)
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Serialize this token into a signed JWT.
    #[allow(clippy::missing_panics_doc)]
    pub fn into_jwt(self, config: &Config) -> String {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings")
    }

    /// Deserialize and verify a token from a JWT string.
    pub fn from_jwt(jwt: &str, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            jwt,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.token)?;
        Ok(token)
    }

    /// Deserialize and verify a token from a session cookie.
    pub fn from_cookie(cookie: &Cookie<'static>, config: &Config) -> Result<Self, Error> {
        Self::from_jwt(cookie.value(), config)
    }
}

/// JWT claims: the subject plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    /// Get an [`AuthToken`] from the session cookie and verify that the
    /// identity it names still exists.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        // Forward to any routes that do not require authentication.
        let cookie = try_outcome!(req.cookies().get(AUTH_TOKEN_COOKIE).or_forward(()));

        // Decode and verify the token.
        let token: Self = try_outcome!(Self::from_cookie(cookie, config).or_forward(()));

        // Check the identity actually exists.
        let db = req.guard::<&State<Database>>().await.unwrap();
        let user = Coll::<User>::from_db(db)
            .find_one(token.user_id.as_doc(), None)
            .await;
        match user {
            Ok(Some(_)) => Outcome::Success(token),
            Ok(None) => Outcome::Forward(()),
            Err(e) => Outcome::Failure((Status::InternalServerError, e.into())),
        }
    }
}
