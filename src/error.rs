use std::time::Duration;

/// Errors surfaced by the user and token stores.
///
/// Driver errors are translated into these variants at the store boundary so
/// callers never have to inspect database messages.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("unable to update the record due to an edit conflict")]
    EditConflict,

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

/// Name of the unique constraint guarding `users.email`.
pub const USERS_EMAIL_KEY: &str = "users_email_key";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::RecordNotFound,
            sqlx::Error::Database(ref db)
                if db.is_unique_violation() && db.constraint() == Some(USERS_EMAIL_KEY) =>
            {
                StoreError::DuplicateEmail
            }
            other => StoreError::Database(other),
        }
    }
}
