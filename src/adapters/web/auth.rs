//! Authentication backend for axum-login.
//!
//! Users live in the ledger store; passwords are argon2id hashes.

use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use axum_login::{AuthUser, AuthnBackend, UserId};
use rand::rngs::OsRng;

use crate::domain::account::{self, User};
use crate::domain::error::PapertradeError;
use crate::ports::ledger_port::LedgerPort;

use super::run_blocking;

/// The logged-in user as stored in the session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionUser {
    pub id: account::UserId,
    pub username: String,
    /// The password hash string as bytes. Changing the password invalidates sessions.
    pw_hash_bytes: Vec<u8>,
}

impl From<User> for SessionUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            pw_hash_bytes: user.password_hash.into_bytes(),
        }
    }
}

impl AuthUser for SessionUser {
    type Id = account::UserId;

    fn id(&self) -> account::UserId {
        self.id
    }

    fn session_auth_hash(&self) -> &[u8] {
        &self.pw_hash_bytes
    }
}

/// Login credentials submitted via the login form.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub type AuthSession = axum_login::AuthSession<Backend>;

#[derive(Clone)]
pub struct Backend {
    ledger: Arc<dyn LedgerPort>,
}

impl Backend {
    pub fn new(ledger: Arc<dyn LedgerPort>) -> Self {
        Self { ledger }
    }
}

pub fn hash_password(password: &str) -> Result<String, PapertradeError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PapertradeError::invalid_input(format!("cannot hash password: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

impl AuthnBackend for Backend {
    type User = SessionUser;
    type Credentials = Credentials;
    type Error = PapertradeError;

    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<Option<Self::User>, Self::Error> {
        let ledger = self.ledger.clone();
        run_blocking(move || {
            let Some(user) = ledger.find_user_by_username(creds.username.trim())? else {
                return Ok(None);
            };
            if verify_password(&creds.password, &user.password_hash) {
                Ok(Some(SessionUser::from(user)))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn get_user(&self, user_id: &UserId<Self>) -> Result<Option<Self::User>, Self::Error> {
        let ledger = self.ledger.clone();
        let user_id = *user_id;
        run_blocking(move || Ok(ledger.find_user(user_id)?.map(SessionUser::from))).await
    }
}
