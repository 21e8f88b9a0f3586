//! Request gates. They never reject on their own: handlers receive an
//! [`Authorization`] and decide, usually via [`Authorization::require`].

use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::error::ApiError;

/// Caller identity as encoded in a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingToken,
    InvalidToken,
    NotAdmin,
}

impl DenyReason {
    pub fn message(self) -> &'static str {
        match self {
            DenyReason::MissingToken => "No Token",
            DenyReason::InvalidToken => "Invalid Token",
            DenyReason::NotAdmin => "Invalid Admin Token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allowed(Identity),
    Denied(DenyReason),
}

impl Authorization {
    pub fn require(self) -> Result<Identity, ApiError> {
        match self {
            Authorization::Allowed(identity) => Ok(identity),
            Authorization::Denied(reason) => Err(ApiError::Unauthorized(reason.message().into())),
        }
    }
}

/// Resolve the caller from `Authorization: Bearer <jwt>`.
pub fn is_auth(keys: &JwtKeys, headers: &HeaderMap) -> Authorization {
    let Some(header) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Authorization::Denied(DenyReason::MissingToken);
    };

    let Some(token) = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
    else {
        return Authorization::Denied(DenyReason::MissingToken);
    };

    match keys.verify(token) {
        Ok(claims) => Authorization::Allowed(Identity {
            id: claims.sub,
            email: claims.email,
            is_admin: claims.is_admin,
        }),
        Err(e) => {
            warn!(error = %e, "invalid or expired token");
            Authorization::Denied(DenyReason::InvalidToken)
        }
    }
}

/// Narrow an authenticated caller to administrators.
pub fn is_admin(auth: Authorization) -> Authorization {
    match auth {
        Authorization::Allowed(identity) if identity.is_admin => Authorization::Allowed(identity),
        Authorization::Allowed(identity) => {
            warn!(user_id = %identity.id, "admin route denied");
            Authorization::Denied(DenyReason::NotAdmin)
        }
        denied => denied,
    }
}

/// Extractor running [`is_auth`] for the current request.
pub struct Caller(pub Authorization);

impl Caller {
    pub fn admin(self) -> Authorization {
        is_admin(self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        Ok(Caller(is_auth(&keys, &parts.headers)))
    }
}
