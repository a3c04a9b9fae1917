//! In-memory `UserRepo` + `TokenRepo` used by the unit tests. Mirrors the
//! Postgres semantics: unique emails, version-guarded updates, hash-only
//! token storage and single-lock atomicity for the revoking updates.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use axum::async_trait;
use time::OffsetDateTime;

use crate::{
    auth::{
        repo::{TokenRepo, UserRepo},
        password::Password,
        repo_types::{TokenRecord, User},
        tokens::{hash_token, Scope, Token},
    },
    error::StoreError,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: Vec<User>,
    tokens: Vec<TokenRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    fail_token_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    pub fn with_next_id(next_id: i64) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().next_id = next_id;
        store
    }

    pub fn fail_token_inserts(&self, fail: bool) {
        self.fail_token_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn tokens(&self) -> Vec<TokenRecord> {
        self.inner.lock().unwrap().tokens.clone()
    }

    pub fn stored_user(&self, id: i64) -> Option<User> {
        let inner = self.inner.lock().unwrap();
        inner.users.iter().find(|s| s.id == id).cloned()
    }
}

impl Inner {
    fn apply_update(&mut self, user: &User, password_only: bool) -> Result<i32, StoreError> {
        let idx = self
            .users
            .iter()
            .position(|s| s.id == user.id && s.version == user.version)
            .ok_or(StoreError::EditConflict)?;
        if !password_only
            && self
                .users
                .iter()
                .any(|s| s.id != user.id && s.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        let row = &mut self.users[idx];
        row.password = Password::from_hash(user.password.hash().to_owned());
        if !password_only {
            row.username = user.username.clone();
            row.email = user.email.clone();
            row.activated = user.activated;
        }
        row.version += 1;
        Ok(row.version)
    }

    fn delete_all_for_user(&mut self, scope: Scope, user_id: i64) -> u64 {
        let before = self.tokens.len();
        self.tokens
            .retain(|t| !(t.scope == scope && t.user_id == user_id));
        (before - self.tokens.len()) as u64
    }

    fn live_token(&self, scope: Scope, plaintext: &str, now: OffsetDateTime) -> Option<&TokenRecord> {
        let hash = hash_token(plaintext);
        self.tokens
            .iter()
            .find(|t| t.hash == hash && t.scope == scope && t.expiry > now)
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn insert(&self, user: &mut User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|s| s.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        user.id = inner.next_id;
        user.created_at = OffsetDateTime::now_utc();
        user.version = 1;
        inner.next_id += 1;
        inner.users.push(stored(user));
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|s| s.email == email)
            .map(stored)
            .ok_or(StoreError::RecordNotFound)
    }

    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|s| s.id == id)
            .map(stored)
            .ok_or(StoreError::RecordNotFound)
    }

    async fn get_for_token(
        &self,
        scope: Scope,
        plaintext: &str,
        now: OffsetDateTime,
    ) -> Result<User, StoreError> {
        let inner = self.inner.lock().unwrap();
        let user_id = inner
            .live_token(scope, plaintext, now)
            .map(|t| t.user_id)
            .ok_or(StoreError::RecordNotFound)?;
        inner
            .users
            .iter()
            .find(|s| s.id == user_id)
            .map(stored)
            .ok_or(StoreError::RecordNotFound)
    }

    async fn update(&self, user: &mut User) -> Result<(), StoreError> {
        let version = self.inner.lock().unwrap().apply_update(user, false)?;
        user.version = version;
        Ok(())
    }

    async fn update_password(&self, user: &mut User) -> Result<(), StoreError> {
        let version = self.inner.lock().unwrap().apply_update(user, true)?;
        user.version = version;
        Ok(())
    }

    async fn update_revoking(&self, user: &mut User, scope: Scope) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.apply_update(user, false)?;
        inner.delete_all_for_user(scope, user.id);
        user.version = version;
        Ok(())
    }

    async fn update_password_revoking(
        &self,
        user: &mut User,
        scope: Scope,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.apply_update(user, true)?;
        inner.delete_all_for_user(scope, user.id);
        user.version = version;
        Ok(())
    }
}

#[async_trait]
impl TokenRepo for MemoryStore {
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        if self.fail_token_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.users.iter().any(|s| s.id == token.user_id) {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "tokens_user_id_fkey violated".into(),
            )));
        }
        inner.tokens.push(TokenRecord {
            hash: token.hash.clone(),
            user_id: token.user_id,
            expiry: token.expiry,
            scope: token.scope,
        });
        Ok(())
    }

    async fn get_for_token(
        &self,
        scope: Scope,
        plaintext: &str,
        now: OffsetDateTime,
    ) -> Result<TokenRecord, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .live_token(scope, plaintext, now)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn delete(&self, hash: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap().tokens.retain(|t| t.hash != hash);
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<u64, StoreError> {
        Ok(self.inner.lock().unwrap().delete_all_for_user(scope, user_id))
    }
}

/// What a fresh read from storage yields: no plaintext password.
fn stored(user: &User) -> User {
    let mut out = user.clone();
    out.password = Password::from_hash(user.password.hash().to_owned());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::generate_token;
    use time::{macros::datetime, Duration};

    const NOW: OffsetDateTime = datetime!(2024-05-01 10:00 UTC);

    async fn seeded_user(store: &MemoryStore, email: &str) -> User {
        let mut user = User::new(
            "reader".into(),
            email.into(),
            Password::from_plaintext("pa55word-long").unwrap(),
        );
        UserRepo::insert(store, &mut user).await.unwrap();
        user
    }

    async fn issue(store: &MemoryStore, user_id: i64, scope: Scope) -> Token {
        let token = generate_token(user_id, Duration::hours(1), scope, NOW);
        TokenRepo::insert(store, &token).await.unwrap();
        token
    }

    #[tokio::test]
    async fn get_by_email_misses_with_record_not_found() {
        let store = MemoryStore::new();
        let err = store.get_by_email("nobody@example.com").await.unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() {
        let store = MemoryStore::new();
        seeded_user(&store, "dup@example.com").await;
        let mut again = User::new(
            "other".into(),
            "dup@example.com".into(),
            Password::from_plaintext("pa55word-long").unwrap(),
        );
        let err = UserRepo::insert(&store, &mut again).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn only_token_hashes_are_stored() {
        let store = MemoryStore::new();
        let user = seeded_user(&store, "reader@example.com").await;
        let token = issue(&store, user.id, Scope::PasswordReset).await;

        let stored = store.tokens();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].hash, hash_token(&token.plaintext).to_vec());
        assert_ne!(stored[0].hash, token.plaintext.as_bytes());
    }

    #[tokio::test]
    async fn token_lookup_misses_for_unknown_wrong_scope_and_expired() {
        let store = MemoryStore::new();
        let user = seeded_user(&store, "reader@example.com").await;
        let token = issue(&store, user.id, Scope::PasswordReset).await;

        let hit = TokenRepo::get_for_token(&store, Scope::PasswordReset, &token.plaintext, NOW)
            .await
            .unwrap();
        assert_eq!(hit.user_id, user.id);

        let unknown = "f".repeat(64);
        let cases = [
            (Scope::PasswordReset, unknown.as_str(), NOW),
            (Scope::Authentication, token.plaintext.as_str(), NOW),
            (Scope::PasswordReset, token.plaintext.as_str(), token.expiry),
            (Scope::PasswordReset, token.plaintext.as_str(), NOW + Duration::hours(2)),
        ];
        for (scope, plaintext, at) in cases {
            let err = TokenRepo::get_for_token(&store, scope, plaintext, at)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::RecordNotFound));
            let err = UserRepo::get_for_token(&store, scope, plaintext, at)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::RecordNotFound));
        }
    }

    #[tokio::test]
    async fn delete_all_for_user_is_scoped_to_user_and_scope() {
        let store = MemoryStore::new();
        let alice = seeded_user(&store, "alice@example.com").await;
        let bob = seeded_user(&store, "bob@example.com").await;
        issue(&store, alice.id, Scope::PasswordReset).await;
        issue(&store, alice.id, Scope::PasswordReset).await;
        let alice_auth = issue(&store, alice.id, Scope::Authentication).await;
        let bob_reset = issue(&store, bob.id, Scope::PasswordReset).await;

        let removed = store
            .delete_all_for_user(Scope::PasswordReset, alice.id)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let left = store.tokens();
        assert_eq!(left.len(), 2);
        assert!(left.iter().any(|t| t.hash == alice_auth.hash));
        assert!(left.iter().any(|t| t.hash == bob_reset.hash));
    }

    #[tokio::test]
    async fn stale_update_conflicts_and_leaves_row_unchanged() {
        let store = MemoryStore::new();
        let user = seeded_user(&store, "reader@example.com").await;

        let mut first = store.get_by_id(user.id).await.unwrap();
        let mut second = store.get_by_id(user.id).await.unwrap();

        first.username = "first-writer".into();
        store.update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        second.username = "second-writer".into();
        let err = store.update(&mut second).await.unwrap_err();
        assert!(matches!(err, StoreError::EditConflict));
        assert_eq!(second.version, 1);

        let row = store.stored_user(user.id).unwrap();
        assert_eq!(row.username, "first-writer");
        assert_eq!(row.version, 2);
    }

    #[tokio::test]
    async fn update_password_uses_the_version_check() {
        let store = MemoryStore::new();
        let user = seeded_user(&store, "reader@example.com").await;
        let mut stale = store.get_by_id(user.id).await.unwrap();

        let mut fresh = store.get_by_id(user.id).await.unwrap();
        fresh.password.set("another-password").unwrap();
        store.update_password(&mut fresh).await.unwrap();

        stale.password.set("stale-password").unwrap();
        let err = store.update_password(&mut stale).await.unwrap_err();
        assert!(matches!(err, StoreError::EditConflict));

        let row = store.stored_user(user.id).unwrap();
        assert!(row.password.matches("another-password").unwrap());
    }

    #[tokio::test]
    async fn update_to_taken_email_is_duplicate() {
        let store = MemoryStore::new();
        seeded_user(&store, "taken@example.com").await;
        let mut user = seeded_user(&store, "mine@example.com").await;
        user.email = "taken@example.com".into();
        let err = store.update(&mut user).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn stale_update_to_taken_email_is_a_conflict() {
        let store = MemoryStore::new();
        seeded_user(&store, "taken@example.com").await;
        let mut user = seeded_user(&store, "mine@example.com").await;
        user.email = "taken@example.com".into();
        user.version = 99;
        let err = store.update(&mut user).await.unwrap_err();
        assert!(matches!(err, StoreError::EditConflict));
    }

    #[tokio::test]
    async fn conflicting_revoking_update_keeps_tokens() {
        let store = MemoryStore::new();
        let mut user = seeded_user(&store, "reader@example.com").await;
        issue(&store, user.id, Scope::PasswordReset).await;

        user.version = 99;
        let err = store
            .update_password_revoking(&mut user, Scope::PasswordReset)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EditConflict));
        assert_eq!(store.tokens().len(), 1);
    }
}
