use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::{repo_types::User, tokens::Token};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for account activation.
#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub token: String,
}

/// Request body for sign-in.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for starting a password reset.
#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Request body for reissuing an activation token.
#[derive(Debug, Deserialize)]
pub struct ActivationTokenRequest {
    pub email: String,
}

/// Request body for completing a password reset.
#[derive(Debug, Deserialize)]
pub struct PasswordUpdateRequest {
    pub token: String,
    pub password: String,
}

/// Response returned after sign-in.
#[derive(Debug, Serialize)]
pub struct AuthTokenResponse {
    pub authentication_token: Token,
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub username: String,
    pub email: String,
    pub activated: bool,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at,
            username: user.username.clone(),
            email: user.email.clone(),
            activated: user.activated,
        }
    }
}
