use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::HeaderMap,
    routing::{get, patch, post, put},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{
        AuthResponse, ForgotPasswordRequest, MessageResponse, ResetPasswordRequest,
        SigninRequest, SignupRequest, StatusResponse, UpdateProfileRequest, UpdateUserRequest,
        UpdatedUserResponse,
    },
    repo_types::User,
    reset::ResetTokenManager,
    services,
};
use crate::{
    auth::guards::Caller,
    error::ApiError,
    extract::{user_id, ApiJson},
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/users/signin", post(signin))
        .route("/users/signup", post(signup))
        .route("/users/forgotpassword", post(forgot_password))
        .route("/users/resetpassword/:token", patch(reset_password))
}

pub fn member_routes() -> Router<AppState> {
    Router::new().route("/users/profile", put(update_profile))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip(state, payload))]
pub async fn signin(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SigninRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    Ok(Json(services::signin(&state, payload).await?))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    Ok(Json(services::signup(&state, payload).await?))
}

/// Base for the emailed link: `PUBLIC_URL`, else the request's own host.
fn link_base(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.config.reset.public_url {
        return url.clone();
    }
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}", host)
}

#[instrument(skip(state, headers, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let email = services::normalize_email(&payload.email);
    let base = link_base(&state, &headers);
    ResetTokenManager::new(&state).issue(&email, &base).await?;
    Ok(Json(StatusResponse::success("Token sent to email!")))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    ResetTokenManager::new(&state)
        .consume(&token, &payload.password)
        .await?;
    Ok(Json(StatusResponse::success("Password changed successfully")))
}

#[instrument(skip(state, caller, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<ApiJson<UpdateProfileRequest>, ApiError>,
) -> Result<Json<AuthResponse>, ApiError> {
    let me = caller.0.require()?;
    let ApiJson(payload) = payload?;
    Ok(Json(services::update_profile(&state, me.id, payload).await?))
}

#[instrument(skip(state, caller))]
pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<User>>, ApiError> {
    caller.admin().require()?;
    Ok(Json(services::list_users(&state).await?))
}

#[instrument(skip(state, caller, id))]
pub async fn get_user(
    State(state): State<AppState>,
    caller: Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<User>, ApiError> {
    caller.admin().require()?;
    let id = user_id(id)?;
    Ok(Json(services::get_user(&state, id).await?))
}

#[instrument(skip(state, caller, id, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    caller: Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<ApiJson<UpdateUserRequest>, ApiError>,
) -> Result<Json<UpdatedUserResponse>, ApiError> {
    let admin = caller.admin().require()?;
    let id = user_id(id)?;
    let ApiJson(payload) = payload?;
    let user = services::update_user(&state, id, payload).await?;
    info!(admin = %admin.email, user_id = %user.id, is_admin = user.is_admin, "user updated");
    Ok(Json(UpdatedUserResponse {
        message: "User Updated",
        user,
    }))
}

#[instrument(skip(state, caller, id))]
pub async fn delete_user(
    State(state): State<AppState>,
    caller: Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = caller.admin().require()?;
    let id = user_id(id)?;
    services::delete_user(&state, id).await?;
    info!(admin = %admin.email, user_id = %id, "user deleted");
    Ok(Json(MessageResponse {
        message: "User Deleted",
    }))
}
