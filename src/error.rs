use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by a [`crate::users::repo::UserStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Error returned by every HTTP handler.
///
/// Renders as `{"message": "..."}`. `Internal` never exposes its cause.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Can Not Delete Admin User")]
    ProtectedAccount,
    #[error("Token is invalid or has expired")]
    InvalidResetToken,
    #[error("Error sending email!")]
    MailDelivery,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::ProtectedAccount | Self::InvalidResetToken => {
                StatusCode::BAD_REQUEST
            }
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::MailDelivery | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_not_found() -> Self {
        Self::NotFound("User Not Found".into())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => Self::Conflict("Email already registered".into()),
            StoreError::Database(e) => Self::Internal(anyhow::Error::new(e).context("user store")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!(error = ?e, "internal error");
        }
        let message = self.to_string();
        (self.status(), Json(ErrorBody { message: &message })).into_response()
    }
}
