use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while handling a request.
///
/// Every core operation returns one of these explicitly; handlers never
/// panic their way to a 500. Note that an already-used voting token is
/// reported as `NotFound`, indistinguishable from a token that never
/// existed, so callers can't probe which secrets were valid.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("Expired: {0}")]
    Expired(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid request: {0}")]
    Validation(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn capacity(what: impl Into<String>) -> Self {
        Self::CapacityExceeded(what.into())
    }

    pub fn expired(what: impl Into<String>) -> Self {
        Self::Expired(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        Self::Forbidden(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        warn!("Request failed: {self}");
        Err(match self {
            Self::Db(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.into_kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::CapacityExceeded(_) | Self::Validation(_) => Status::UnprocessableEntity,
            Self::Expired(_) => Status::Gone,
            Self::Forbidden(_) => Status::Forbidden,
        })
    }
}
