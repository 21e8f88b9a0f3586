//! Request extractors whose failures render through [`ApiError`].

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, rejection::PathRejection, FromRequest, Path, Request},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;

/// `axum::Json` with a `{"message"}` rejection instead of axum's plain-text one.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // Parser detail stays in the log.
        debug!(error = %rejection.body_text(), "json body rejected");
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::BadRequest("Expected a JSON request body".into())
            }
            _ => ApiError::BadRequest("Invalid request body".into()),
        }
    }
}

/// A `/users/:id` segment that is not a UUID cannot name a user.
pub fn user_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    match path {
        Ok(Path(id)) => Ok(id),
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "user id rejected");
            Err(ApiError::user_not_found())
        }
    }
}
