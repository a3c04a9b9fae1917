use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use tracing::error;

use super::{repo_types::CurrentUser, services::AuthError};
use crate::state::AppState;

/// Resolves the `Authorization: Bearer <token>` header into the request's
/// principal. No header at all yields `CurrentUser::Anonymous`.
#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(axum::http::header::AUTHORIZATION) {
            Some(h) => Some(h.to_str().map_err(|_| invalid_token())?),
            None => None,
        };

        // Expect "Bearer <token>"
        let token = match header {
            Some(auth) => Some(
                auth.strip_prefix("Bearer ")
                    .or_else(|| auth.strip_prefix("bearer "))
                    .ok_or_else(invalid_token)?,
            ),
            None => None,
        };

        state.auth.user_for_token(token).await.map_err(|e| match e {
            AuthError::InvalidToken => invalid_token(),
            other => {
                error!(error = %other, "bearer token lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "the server encountered a problem and could not process your request".into(),
                )
            }
        })
    }
}

fn invalid_token() -> (StatusCode, String) {
    (
        StatusCode::UNAUTHORIZED,
        "invalid or missing authentication token".into(),
    )
}
