//! Platform authentication helpers.
//!
//! Administrators are listed in a JSON object mapping a username (usually an
//! email address) to an argon2 hash in PHC string format:
//!
//! ```json
//! { "admin@example.com": "$argon2id$v=19$m=19456,t=2,p=1$..." }
//! ```

use std::{collections::HashMap, fs, io, path::Path};

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuthnError {
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(#[from] io::Error),
    #[error("credential store malformed: {0}")]
    StoreMalformed(#[from] serde_json::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Shared admin credential list.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    pub fn from_users(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn from_json(raw: &str) -> Result<Self, AuthnError> {
        let users: HashMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self::from_users(users))
    }

    pub fn load(path: &Path) -> Result<Self, AuthnError> {
        let raw = fs::read_to_string(path)?;
        let store = Self::from_json(&raw)?;
        info!(path = %path.display(), users = store.len(), "admin credentials loaded");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// `true` only when `id` is known and `secret` matches its stored hash.
    ///
    /// Unknown users are checked against a throwaway hash so both paths pay
    /// for one argon2 verification.
    pub fn verify_credential(&self, id: &str, secret: &str) -> bool {
        match self.users.get(id.trim()) {
            Some(stored) => match PasswordHash::new(stored) {
                Ok(parsed) => verify(secret, &parsed),
                Err(err) => {
                    warn!(user = %id, error = %err, "stored admin hash is not a valid PHC string");
                    false
                }
            },
            None => {
                if let Some(dummy) = DUMMY_HASH.as_deref() {
                    if let Ok(parsed) = PasswordHash::new(dummy) {
                        verify(secret, &parsed);
                    }
                }
                false
            }
        }
    }
}

const DUMMY_SECRET: &str = "unknown-admin-placeholder";

static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_secret(DUMMY_SECRET).ok());

fn verify(secret: &str, parsed: &PasswordHash<'_>) -> bool {
    Argon2::default()
        .verify_password(secret.as_bytes(), parsed)
        .is_ok()
}

/// Hash `secret` with a random salt for storage in the credential file.
pub fn hash_secret(secret: &str) -> Result<String, AuthnError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthnError::Hash(err.to_string()))
}
