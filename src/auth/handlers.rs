use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, instrument, warn};

use crate::{
    auth::{
        dto::{
            ActivateRequest, ActivationTokenRequest, AuthTokenResponse, LoginRequest, MessageResponse,
            PasswordResetRequest, PasswordUpdateRequest, PublicUser, RegisterRequest,
        },
        repo_types::CurrentUser,
        services::AuthError,
    },
    state::AppState,
};

const SERVER_ERROR: &str = "the server encountered a problem and could not process your request";
const RESET_ACCEPTED: &str =
    "if an active account exists for this email address, a password reset link has been sent";
const ACTIVATION_ACCEPTED: &str =
    "if an inactive account exists for this email address, activation instructions have been sent";

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/activated", put(activate))
        .route("/users/password", put(update_password))
        .route("/users/me", get(get_me))
}

pub fn token_routes() -> Router<AppState> {
    Router::new()
        .route("/tokens/authentication", post(create_authentication_token))
        .route("/tokens/password-reset", post(create_password_reset_token))
        .route("/tokens/activation", post(create_activation_token))
}

/// Maps a service error to a response without leaking internals; the
/// underlying cause is logged instead.
pub(crate) fn reject(err: AuthError) -> (StatusCode, String) {
    match err {
        AuthError::Validation(v) => (StatusCode::UNPROCESSABLE_ENTITY, v.to_string()),
        AuthError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, "invalid authentication credentials".into())
        }
        AuthError::InvalidToken => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "token: invalid or expired token".into(),
        ),
        AuthError::DuplicateEmail => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "email: a user with this email address already exists".into(),
        ),
        AuthError::EditConflict => (
            StatusCode::CONFLICT,
            "unable to update the record due to an edit conflict, please try again".into(),
        ),
        internal @ (AuthError::Hashing(_) | AuthError::Store(_) | AuthError::Mail(_)) => {
            error!(error = %internal, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR.into())
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    let email = normalize_email(&payload.email);
    let user = state
        .auth
        .register(payload.username.trim(), &email, &payload.password)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(PublicUser::from(&user))))
}

#[instrument(skip(state, payload))]
pub async fn activate(
    State(state): State<AppState>,
    Json(payload): Json<ActivateRequest>,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = state.auth.activate(payload.token.trim()).await.map_err(reject)?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, Json<AuthTokenResponse>), (StatusCode, String)> {
    let email = normalize_email(&payload.email);
    let (user, token) = state
        .auth
        .authenticate(&email, &payload.password)
        .await
        .map_err(reject)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthTokenResponse {
            authentication_token: token,
            user_id: user.id,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn create_password_reset_token(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), (StatusCode, String)> {
    let email = normalize_email(&payload.email);
    state
        .auth
        .request_password_reset(&email)
        .await
        .map_err(reject)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: RESET_ACCEPTED,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn create_activation_token(
    State(state): State<AppState>,
    Json(payload): Json<ActivationTokenRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), (StatusCode, String)> {
    let email = normalize_email(&payload.email);
    state.auth.request_activation(&email).await.map_err(reject)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: ACTIVATION_ACCEPTED,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    Json(payload): Json<PasswordUpdateRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    state
        .auth
        .reset_password(payload.token.trim(), &payload.password)
        .await
        .map_err(reject)?;
    Ok(Json(MessageResponse {
        message: "your password was successfully reset",
    }))
}

#[instrument(skip(current))]
pub async fn get_me(current: CurrentUser) -> Result<Json<PublicUser>, (StatusCode, String)> {
    match current {
        CurrentUser::Anonymous => Err((
            StatusCode::UNAUTHORIZED,
            "you must be authenticated to access this resource".into(),
        )),
        CurrentUser::Authenticated(user) if !user.activated => {
            warn!(user_id = user.id, "inactive account on /users/me");
            Err((
                StatusCode::FORBIDDEN,
                "your user account must be activated to access this resource".into(),
            ))
        }
        CurrentUser::Authenticated(user) => Ok(Json(PublicUser::from(&user))),
    }
}
