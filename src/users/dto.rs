use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::User;

/// Request body for sign-in.
#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

/// Request body for sign-up.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Admin update. Absent or empty name/email keep the current value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_admin: Option<bool>,
}

/// Self-service profile update.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Identity returned after signin, signup and profile update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub token: String,
}

impl AuthResponse {
    pub fn new(user: User, token: String) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            is_admin: user.is_admin,
            token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UpdatedUserResponse {
    pub message: &'static str,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: &'static str,
}

impl StatusResponse {
    pub fn success(message: &'static str) -> Self {
        Self {
            status: "success",
            message,
        }
    }
}
