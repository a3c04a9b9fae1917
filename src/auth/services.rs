use std::sync::Arc;

use lazy_static::lazy_static;
use serde_json::json;
use time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    auth::{
        password::{hash_password, verify_password, Password, PasswordError},
        repo::{TokenRepo, UserRepo},
        repo_types::{CurrentUser, User},
        tokens::{generate_token, Scope, Token},
        validation::{
            validate_email, validate_password_plaintext, validate_token_plaintext,
            validate_username, Validator,
        },
    },
    clock::Clock,
    config::TokenConfig,
    error::StoreError,
    mailer::{Mailer, TEMPLATE_PASSWORD_RESET, TEMPLATE_USER_WELCOME},
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(Validator),

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("a user with this email address already exists")]
    DuplicateEmail,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error(transparent)]
    Hashing(#[from] PasswordError),

    #[error("store failure: {0}")]
    Store(#[source] StoreError),

    #[error("mail delivery failed: {0}")]
    Mail(#[source] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            StoreError::EditConflict => AuthError::EditConflict,
            other => AuthError::Store(other),
        }
    }
}

impl From<Validator> for AuthError {
    fn from(v: Validator) -> Self {
        AuthError::Validation(v)
    }
}

lazy_static! {
    /// Hash checked against when the email is unknown, so the miss costs the
    /// same as a wrong password.
    static ref DUMMY_HASH: Option<String> = match hash_password("credvault-dummy-password") {
        Ok(hash) => Some(hash),
        Err(e) => {
            error!(error = %e, "dummy hash unavailable, unknown-email logins skip the verify");
            None
        }
    };
}

/// Credential lifecycle: registration, activation, sign-in and password reset.
/// All collaborators are handed in at construction.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    tokens: Arc<dyn TokenRepo>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    ttl: TokenConfig,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepo>,
        tokens: Arc<dyn TokenRepo>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        ttl: TokenConfig,
    ) -> Self {
        Self {
            users,
            tokens,
            mailer,
            clock,
            ttl,
        }
    }

    /// Issues and persists a token. The returned value is the only place the
    /// plaintext is ever available.
    pub async fn new_token(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: Scope,
    ) -> Result<Token, StoreError> {
        let token = generate_token(user_id, ttl, scope, self.clock.now());
        self.tokens.insert(&token).await?;
        debug!(user_id, %scope, expiry = %token.expiry, "token issued");
        Ok(token)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        // All fields are checked before the plaintext is hashed.
        let mut v = Validator::new();
        validate_username(&mut v, username);
        validate_email(&mut v, email);
        validate_password_plaintext(&mut v, password);
        v.finish()?;

        let mut user = User::new(
            username.to_owned(),
            email.to_owned(),
            Password::from_plaintext(password)?,
        );
        if let Err(e) = self.users.insert(&mut user).await {
            if matches!(e, StoreError::DuplicateEmail) {
                warn!(email = %user.email, "email already registered");
            }
            return Err(e.into());
        }
        info!(user_id = user.id, "user registered");

        self.send_activation(&user).await?;
        Ok(user)
    }

    /// Reissues the activation mail. Unknown and already activated accounts
    /// return `Ok(())` like a real send.
    pub async fn request_activation(&self, email: &str) -> Result<(), AuthError> {
        let mut v = Validator::new();
        validate_email(&mut v, email);
        v.finish()?;

        let user = match self.users.get_by_email(email).await {
            Ok(u) => u,
            Err(StoreError::RecordNotFound) => {
                info!(%email, "activation requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if user.activated {
            info!(user_id = user.id, "activation requested for active account");
            return Ok(());
        }
        self.send_activation(&user).await
    }

    async fn send_activation(&self, user: &User) -> Result<(), AuthError> {
        let token = self
            .new_token(user.id, self.ttl.activation_ttl(), Scope::Activation)
            .await?;
        let data = json!({ "activationToken": token.plaintext, "userID": user.id });
        self.deliver(user, &token, TEMPLATE_USER_WELCOME, data).await
    }

    /// Mails a freshly issued token. An undeliverable token is deleted again.
    async fn deliver(
        &self,
        user: &User,
        token: &Token,
        template: &str,
        data: serde_json::Value,
    ) -> Result<(), AuthError> {
        if let Err(e) = self.mailer.send(&user.email, template, data).await {
            error!(error = %e, user_id = user.id, %template, "email failed");
            if let Err(del) = self.tokens.delete(&token.hash).await {
                error!(error = %del, user_id = user.id, "could not withdraw undelivered token");
            }
            return Err(AuthError::Mail(e));
        }
        info!(user_id = user.id, %template, "token mailed");
        Ok(())
    }

    pub async fn activate(&self, token: &str) -> Result<User, AuthError> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, token);
        v.finish()?;

        let mut user = self
            .users
            .get_for_token(Scope::Activation, token, self.clock.now())
            .await
            .map_err(token_lookup_error)?;
        user.activated = true;
        self.users.update_revoking(&mut user, Scope::Activation).await?;
        info!(user_id = user.id, "user activated");
        Ok(user)
    }

    /// Exchanges an email/password pair for an authentication token. Unknown
    /// email and wrong password are indistinguishable to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(User, Token), AuthError> {
        let mut v = Validator::new();
        validate_email(&mut v, email);
        validate_password_plaintext(&mut v, password);
        v.finish()?;

        let user = match self.users.get_by_email(email).await {
            Ok(u) => u,
            Err(StoreError::RecordNotFound) => {
                if let Some(hash) = DUMMY_HASH.as_deref() {
                    let _ = verify_password(password, hash);
                }
                warn!(%email, "login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !user.password.matches(password)? {
            warn!(user_id = user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self
            .new_token(user.id, self.ttl.authentication_ttl(), Scope::Authentication)
            .await?;
        info!(user_id = user.id, "user logged in");
        Ok((user, token))
    }

    /// Starts a password reset. Unknown and inactive accounts return `Ok(())`
    /// exactly like a successful request.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let mut v = Validator::new();
        validate_email(&mut v, email);
        v.finish()?;

        let user = match self.users.get_by_email(email).await {
            Ok(u) => u,
            Err(StoreError::RecordNotFound) => {
                info!(%email, "password reset requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !user.activated {
            info!(user_id = user.id, "password reset requested for inactive account");
            return Ok(());
        }

        let token = self
            .new_token(user.id, self.ttl.password_reset_ttl(), Scope::PasswordReset)
            .await?;
        let data = json!({ "passwordResetToken": token.plaintext });
        self.deliver(&user, &token, TEMPLATE_PASSWORD_RESET, data).await
    }

    /// Sets a new password from a reset token. The password change and the
    /// removal of every outstanding reset token for the user commit together.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<User, AuthError> {
        let mut v = Validator::new();
        validate_password_plaintext(&mut v, new_password);
        validate_token_plaintext(&mut v, token);
        v.finish()?;

        let record = self
            .tokens
            .get_for_token(Scope::PasswordReset, token, self.clock.now())
            .await
            .map_err(token_lookup_error)?;
        let mut user = self
            .users
            .get_by_id(record.user_id)
            .await
            .map_err(token_lookup_error)?;

        user.password.set(new_password)?;
        self.users
            .update_password_revoking(&mut user, Scope::PasswordReset)
            .await?;
        info!(user_id = user.id, "password reset");
        Ok(user)
    }

    /// Resolves a bearer token. A missing header is `Anonymous`; a token that
    /// does not resolve is `InvalidToken`.
    pub async fn user_for_token(&self, token: Option<&str>) -> Result<CurrentUser, AuthError> {
        let Some(token) = token else {
            return Ok(CurrentUser::Anonymous);
        };
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, token);
        if !v.is_valid() {
            return Err(AuthError::InvalidToken);
        }
        let user = self
            .users
            .get_for_token(Scope::Authentication, token, self.clock.now())
            .await
            .map_err(token_lookup_error)?;
        Ok(CurrentUser::Authenticated(user))
    }
}

fn token_lookup_error(err: StoreError) -> AuthError {
    match err {
        StoreError::RecordNotFound => AuthError::InvalidToken,
        other => other.into(),
    }
}
