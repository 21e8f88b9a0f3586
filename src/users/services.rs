use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    dto::{AuthResponse, SigninRequest, SignupRequest, UpdateProfileRequest, UpdateUserRequest},
    repo_types::{AccountUpdate, NewUser, ProfileUpdate, User},
};
use crate::{auth::jwt::JwtKeys, error::ApiError, state::AppState};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Supplied value when present and non-blank, otherwise `current`.
fn or_current(new: Option<String>, current: String) -> String {
    match new {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => current,
    }
}

fn or_current_email(new: Option<String>, current: String) -> Result<String, ApiError> {
    match new {
        Some(v) if !v.trim().is_empty() => {
            let email = normalize_email(&v);
            if !is_valid_email(&email) {
                return Err(ApiError::BadRequest("Invalid email".into()));
            }
            Ok(email)
        }
        _ => Ok(current),
    }
}

fn is_protected(st: &AppState, email: &str) -> bool {
    email == st.config.admin.protected_email
}

/// The protected administrator is identified by email, so it may not move.
fn keep_protected_email(st: &AppState, current: &str, next: &str) -> Result<(), ApiError> {
    if is_protected(st, current) && next != current {
        warn!(email = %current, "attempt to change protected account email");
        return Err(ApiError::BadRequest("Can Not Change Admin Email".into()));
    }
    Ok(())
}

fn authenticated(st: &AppState, user: User) -> Result<AuthResponse, ApiError> {
    let token = JwtKeys::from_ref(st).sign(&user)?;
    Ok(AuthResponse::new(user, token))
}

/// Unknown email and wrong password produce the same error.
pub async fn signin(st: &AppState, req: SigninRequest) -> Result<AuthResponse, ApiError> {
    let email = normalize_email(&req.email);

    let Some(user) = st.store.find_by_email(&email).await? else {
        warn!(email = %email, "signin unknown email");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    let ok = st
        .credentials
        .verify(&req.password, &user.password_hash)
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "stored password hash unreadable");
            ApiError::Internal(e)
        })?;
    if !ok {
        warn!(user_id = %user.id, "signin invalid password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    info!(user_id = %user.id, "user signed in");
    authenticated(st, user)
}

pub async fn signup(st: &AppState, req: SignupRequest) -> Result<AuthResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);

    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".into()));
    }

    if st.store.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let password_hash = st.credentials.hash(&req.password)?;
    // The unique index still guards the race between the check and the insert.
    let user = st
        .store
        .create(NewUser {
            name,
            email,
            password_hash,
            is_admin: false,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    authenticated(st, user)
}

pub async fn update_profile(
    st: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> Result<AuthResponse, ApiError> {
    let current = st
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let password_hash = match req.password.as_deref() {
        Some(p) if !p.is_empty() => Some(st.credentials.hash(p)?),
        _ => None,
    };
    let email = or_current_email(req.email, current.email.clone())?;
    keep_protected_email(st, &current.email, &email)?;
    let update = ProfileUpdate {
        name: or_current(req.name, current.name),
        email,
        password_hash,
    };

    let user = st
        .store
        .update_profile(user_id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    info!(user_id = %user.id, "profile updated");
    authenticated(st, user)
}

pub async fn list_users(st: &AppState) -> Result<Vec<User>, ApiError> {
    Ok(st.store.list().await?)
}

pub async fn get_user(st: &AppState, id: Uuid) -> Result<User, ApiError> {
    st.store
        .find_by_id(id)
        .await?
        .ok_or_else(ApiError::user_not_found)
}

/// `is_admin` is taken as sent, defaulting to `false` when omitted. The
/// protected administrator keeps its email and stays an administrator.
pub async fn update_user(
    st: &AppState,
    id: Uuid,
    req: UpdateUserRequest,
) -> Result<User, ApiError> {
    let current = get_user(st, id).await?;
    let email = or_current_email(req.email, current.email.clone())?;
    keep_protected_email(st, &current.email, &email)?;
    let is_admin = is_protected(st, &current.email) || req.is_admin.unwrap_or(false);
    let update = AccountUpdate {
        name: or_current(req.name, current.name),
        email,
        is_admin,
    };
    st.store
        .update_account(id, update)
        .await?
        .ok_or_else(ApiError::user_not_found)
}

/// Refuses the protected administrator regardless of who asks.
pub async fn delete_user(st: &AppState, id: Uuid) -> Result<(), ApiError> {
    let user = get_user(st, id).await?;
    if is_protected(st, &user.email) {
        warn!(user_id = %user.id, "attempt to delete protected account");
        return Err(ApiError::ProtectedAccount);
    }
    if !st.store.delete(id).await? {
        return Err(ApiError::user_not_found());
    }
    Ok(())
}

/// Create the protected administrator when `ADMIN_PASSWORD` is configured
/// and no account holds that email yet.
pub async fn bootstrap_admin(st: &AppState) -> anyhow::Result<()> {
    let Some(password) = st.config.admin.bootstrap_password.as_deref() else {
        return Ok(());
    };
    let email = &st.config.admin.protected_email;
    if st.store.find_by_email(email).await?.is_some() {
        return Ok(());
    }
    let user = st
        .store
        .create(NewUser {
            name: "Admin".into(),
            email: email.clone(),
            password_hash: st.credentials.hash(password)?,
            is_admin: true,
        })
        .await?;
    info!(user_id = %user.id, email = %user.email, "protected admin created");
    Ok(())
}
