use sqlx::FromRow;
use time::OffsetDateTime;

use crate::auth::password::Password;
use crate::auth::tokens::Scope;

/// User record.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub username: String,
    pub email: String,
    pub password: Password,
    pub activated: bool,
    pub version: i32,
}

impl User {
    /// A user that has not been persisted yet; id, created_at and version are
    /// assigned by the store on insert.
    pub fn new(username: String, email: String, password: Password) -> Self {
        Self {
            id: 0,
            created_at: OffsetDateTime::UNIX_EPOCH,
            username,
            email,
            password,
            activated: false,
            version: 0,
        }
    }
}

/// Row shape of `users`.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
    pub version: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            username: row.username,
            email: row.email,
            password: Password::from_hash(row.password_hash),
            activated: row.activated,
            version: row.version,
        }
    }
}

/// Stored view of a token. There is no plaintext here by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: Vec<u8>,
    pub user_id: i64,
    pub expiry: OffsetDateTime,
    pub scope: Scope,
}

/// Row shape of `tokens`.
#[derive(Debug, FromRow)]
pub struct TokenRow {
    pub hash: Vec<u8>,
    pub user_id: i64,
    pub expiry: OffsetDateTime,
    pub scope: String,
}

impl TryFrom<TokenRow> for TokenRecord {
    type Error = sqlx::Error;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let scope = row.scope.parse::<Scope>().map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(Self {
            hash: row.hash,
            user_id: row.user_id,
            expiry: row.expiry,
            scope,
        })
    }
}

/// The principal behind a request: either nobody, or a loaded user.
#[derive(Debug, Clone)]
pub enum CurrentUser {
    Anonymous,
    Authenticated(User),
}

impl CurrentUser {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, CurrentUser::Anonymous)
    }
}
