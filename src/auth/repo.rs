use axum::async_trait;
use sqlx::PgConnection;
use time::OffsetDateTime;

use crate::{
    auth::{
        repo_types::{TokenRecord, TokenRow, User, UserRow},
        tokens::{hash_token, Scope, Token},
    },
    db::Db,
    error::StoreError,
};

/// Persistence for user records.
///
/// Every mutation is guarded by the row version: the write only applies when
/// `user.version` still matches the stored row, otherwise
/// `StoreError::EditConflict` is returned and the row is left untouched. On
/// success `user.version` is refreshed.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Persists a new user, filling in `id`, `created_at` and `version`.
    async fn insert(&self, user: &mut User) -> Result<(), StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError>;
    /// Owner of a live token with the given scope and plaintext.
    async fn get_for_token(
        &self,
        scope: Scope,
        plaintext: &str,
        now: OffsetDateTime,
    ) -> Result<User, StoreError>;
    async fn update(&self, user: &mut User) -> Result<(), StoreError>;
    async fn update_password(&self, user: &mut User) -> Result<(), StoreError>;
    /// `update` and removal of every `scope` token of the user, as one unit.
    async fn update_revoking(&self, user: &mut User, scope: Scope) -> Result<(), StoreError>;
    /// `update_password` and removal of every `scope` token of the user, as one unit.
    async fn update_password_revoking(
        &self,
        user: &mut User,
        scope: Scope,
    ) -> Result<(), StoreError>;
}

/// Persistence for issued tokens. Only hashes are ever stored.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<(), StoreError>;
    /// Live token matching `(hash(plaintext), scope, expiry > now)`.
    async fn get_for_token(
        &self,
        scope: Scope,
        plaintext: &str,
        now: OffsetDateTime,
    ) -> Result<TokenRecord, StoreError>;
    async fn delete(&self, hash: &[u8]) -> Result<(), StoreError>;
    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<u64, StoreError>;
}

const USER_COLUMNS: &str =
    "users.id, users.created_at, users.username, users.email, users.password_hash, users.activated, users.version";

#[derive(Clone)]
pub struct PgUserRepo {
    db: Db,
}

impl PgUserRepo {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[derive(Clone)]
pub struct PgTokenRepo {
    db: Db,
}

impl PgTokenRepo {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

async fn update_tx(conn: &mut PgConnection, user: &User) -> Result<i32, StoreError> {
    let version = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE users
        SET username = $1, email = $2, password_hash = $3,
            activated = $4, version = version + 1
        WHERE id = $5 AND version = $6
        RETURNING version
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(user.password.hash())
    .bind(user.activated)
    .bind(user.id)
    .bind(user.version)
    .fetch_optional(&mut *conn)
    .await?;
    version.ok_or(StoreError::EditConflict)
}

async fn update_password_tx(conn: &mut PgConnection, user: &User) -> Result<i32, StoreError> {
    let version = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE users
        SET password_hash = $1, version = version + 1
        WHERE id = $2 AND version = $3
        RETURNING version
        "#,
    )
    .bind(user.password.hash())
    .bind(user.id)
    .bind(user.version)
    .fetch_optional(&mut *conn)
    .await?;
    version.ok_or(StoreError::EditConflict)
}

async fn delete_all_for_user_tx(
    conn: &mut PgConnection,
    scope: Scope,
    user_id: i64,
) -> Result<u64, StoreError> {
    let res = sqlx::query(r#"DELETE FROM tokens WHERE scope = $1 AND user_id = $2"#)
        .bind(scope.as_str())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn insert(&self, user: &mut User) -> Result<(), StoreError> {
        let (id, created_at, version) = self
            .db
            .run("users.insert", async {
                let row = sqlx::query_as::<_, (i64, OffsetDateTime, i32)>(
                    r#"
                    INSERT INTO users (username, email, password_hash, activated)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id, created_at, version
                    "#,
                )
                .bind(&user.username)
                .bind(&user.email)
                .bind(user.password.hash())
                .bind(user.activated)
                .fetch_one(&self.db.pool)
                .await?;
                Ok::<_, StoreError>(row)
            })
            .await?;
        user.id = id;
        user.created_at = created_at;
        user.version = version;
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.db
            .run("users.get_by_email", async {
                let row = sqlx::query_as::<_, UserRow>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
                ))
                .bind(email)
                .fetch_one(&self.db.pool)
                .await?;
                Ok::<User, StoreError>(row.into())
            })
            .await
    }

    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.db
            .run("users.get_by_id", async {
                let row = sqlx::query_as::<_, UserRow>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
                ))
                .bind(id)
                .fetch_one(&self.db.pool)
                .await?;
                Ok::<User, StoreError>(row.into())
            })
            .await
    }

    async fn get_for_token(
        &self,
        scope: Scope,
        plaintext: &str,
        now: OffsetDateTime,
    ) -> Result<User, StoreError> {
        let hash = hash_token(plaintext);
        self.db
            .run("users.get_for_token", async {
                let row = sqlx::query_as::<_, UserRow>(&format!(
                    r#"
                    SELECT {USER_COLUMNS}
                    FROM users
                    INNER JOIN tokens ON users.id = tokens.user_id
                    WHERE tokens.hash = $1
                      AND tokens.scope = $2
                      AND tokens.expiry > $3
                    "#
                ))
                .bind(&hash[..])
                .bind(scope.as_str())
                .bind(now)
                .fetch_one(&self.db.pool)
                .await?;
                Ok::<User, StoreError>(row.into())
            })
            .await
    }

    async fn update(&self, user: &mut User) -> Result<(), StoreError> {
        let version = self
            .db
            .run("users.update", async {
                let mut conn = self.db.pool.acquire().await?;
                update_tx(&mut conn, user).await
            })
            .await?;
        user.version = version;
        Ok(())
    }

    async fn update_password(&self, user: &mut User) -> Result<(), StoreError> {
        let version = self
            .db
            .run("users.update_password", async {
                let mut conn = self.db.pool.acquire().await?;
                update_password_tx(&mut conn, user).await
            })
            .await?;
        user.version = version;
        Ok(())
    }

    async fn update_revoking(&self, user: &mut User, scope: Scope) -> Result<(), StoreError> {
        let version = self
            .db
            .run("users.update_revoking", async {
                let mut tx = self.db.pool.begin().await?;
                let version = update_tx(&mut tx, user).await?;
                delete_all_for_user_tx(&mut tx, scope, user.id).await?;
                tx.commit().await?;
                Ok::<_, StoreError>(version)
            })
            .await?;
        user.version = version;
        Ok(())
    }

    async fn update_password_revoking(
        &self,
        user: &mut User,
        scope: Scope,
    ) -> Result<(), StoreError> {
        let version = self
            .db
            .run("users.update_password_revoking", async {
                let mut tx = self.db.pool.begin().await?;
                let version = update_password_tx(&mut tx, user).await?;
                delete_all_for_user_tx(&mut tx, scope, user.id).await?;
                tx.commit().await?;
                Ok::<_, StoreError>(version)
            })
            .await?;
        user.version = version;
        Ok(())
    }
}

#[async_trait]
impl TokenRepo for PgTokenRepo {
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        self.db
            .run("tokens.insert", async {
                sqlx::query(
                    r#"
                    INSERT INTO tokens (hash, user_id, expiry, scope)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(&token.hash)
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.db.pool)
                .await?;
                Ok::<_, StoreError>(())
            })
            .await
    }

    async fn get_for_token(
        &self,
        scope: Scope,
        plaintext: &str,
        now: OffsetDateTime,
    ) -> Result<TokenRecord, StoreError> {
        let hash = hash_token(plaintext);
        self.db
            .run("tokens.get_for_token", async {
                let row = sqlx::query_as::<_, TokenRow>(
                    r#"
                    SELECT hash, user_id, expiry, scope
                    FROM tokens
                    WHERE hash = $1 AND scope = $2 AND expiry > $3
                    "#,
                )
                .bind(&hash[..])
                .bind(scope.as_str())
                .bind(now)
                .fetch_one(&self.db.pool)
                .await?;
                Ok::<_, StoreError>(TokenRecord::try_from(row)?)
            })
            .await
    }

    async fn delete(&self, hash: &[u8]) -> Result<(), StoreError> {
        self.db
            .run("tokens.delete", async {
                sqlx::query(r#"DELETE FROM tokens WHERE hash = $1"#)
                    .bind(hash)
                    .execute(&self.db.pool)
                    .await?;
                Ok::<_, StoreError>(())
            })
            .await
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<u64, StoreError> {
        self.db
            .run("tokens.delete_all_for_user", async {
                let mut conn = self.db.pool.acquire().await?;
                delete_all_for_user_tx(&mut conn, scope, user_id).await
            })
            .await
    }
}
