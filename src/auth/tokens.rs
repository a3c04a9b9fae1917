use std::{fmt, str::FromStr};

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Number of random bytes behind every token plaintext.
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Length of the hex-encoded plaintext handed to the user.
pub const TOKEN_PLAINTEXT_LEN: usize = TOKEN_ENTROPY_BYTES * 2;

/// Purpose a token was issued for. A token is only ever accepted for the
/// scope it was created with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Activation,
    Authentication,
    PasswordReset,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
            Scope::PasswordReset => "password-reset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(Scope::Activation),
            "authentication" => Ok(Scope::Authentication),
            "password-reset" => Ok(Scope::PasswordReset),
            other => Err(format!("unknown token scope {other:?}")),
        }
    }
}

/// A freshly issued token. The plaintext exists only in this value; storage
/// keeps `hash`.
#[derive(Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: Vec<u8>,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(skip)]
    pub scope: Scope,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("plaintext", &"[redacted]")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Builds a new token for `user_id` that expires `ttl` after `now`.
pub fn generate_token(user_id: i64, ttl: Duration, scope: Scope, now: OffsetDateTime) -> Token {
    let mut random = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut random);
    let plaintext = hex::encode(random);
    let hash = hash_token(&plaintext).to_vec();

    Token {
        plaintext,
        hash,
        user_id,
        expiry: now + ttl,
        scope,
    }
}

/// SHA-256 of a token plaintext; this is the only form of a token that is
/// ever persisted or used for lookups.
pub fn hash_token(plaintext: &str) -> [u8; 32] {
    Sha256::digest(plaintext.as_bytes()).into()
}
