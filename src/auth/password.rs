use std::fmt;

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// A user's password: the durable Argon2 hash plus, for the duration of a
/// single request, the plaintext it was derived from.
///
/// The only ways to obtain a `Password` are hashing a plaintext or loading a
/// stored hash, so every persisted user carries a hash.
#[derive(Clone)]
pub struct Password {
    plaintext: Option<String>,
    hash: String,
}

impl Password {
    pub fn from_plaintext(plain: &str) -> Result<Self, PasswordError> {
        Ok(Self {
            plaintext: Some(plain.to_owned()),
            hash: hash_password(plain)?,
        })
    }

    pub fn from_hash(hash: String) -> Self {
        Self {
            plaintext: None,
            hash,
        }
    }

    /// Replaces the stored hash with one derived from `plain`.
    pub fn set(&mut self, plain: &str) -> Result<(), PasswordError> {
        self.hash = hash_password(plain)?;
        self.plaintext = Some(plain.to_owned());
        Ok(())
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash cannot be used.
    pub fn matches(&self, candidate: &str) -> Result<bool, PasswordError> {
        verify_password(candidate, &self.hash)
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[redacted]"))
            .field("hash", &"[redacted]")
            .finish()
    }
}

pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            PasswordError::Hashing(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        PasswordError::Hashing(e.to_string())
    })?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => {
            error!(error = %e, "argon2 verify_password error");
            Err(PasswordError::Hashing(e.to_string()))
        }
    }
}
