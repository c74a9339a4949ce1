//! Credential verification seam for the Handshake Gate.
//!
//! The gate never implements credential logic itself: it hands whatever
//! bearer credential the upgrade request carried to an [`Authenticator`]
//! and either gets an identity back or rejects the upgrade. The static
//! key table is the default implementation.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authenticator backend: {0}")]
    Backend(String),
}

/// Authenticated identity produced by a successful verification.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub user_id: String,
}

/// External credential verifier.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<AuthIdentity, AuthError>;
}

/// [`Authenticator`] over a static API-key table from configuration.
#[derive(Debug, Default)]
pub struct StaticKeyAuthenticator {
    keys: HashMap<String, String>,
}

impl StaticKeyAuthenticator {
    /// Builds the table from `(key, user_id)` pairs.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            keys: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait::async_trait]
impl Authenticator for StaticKeyAuthenticator {
    async fn verify(&self, credential: &str) -> Result<AuthIdentity, AuthError> {
        match self.keys.get(credential) {
            Some(user_id) => Ok(AuthIdentity {
                user_id: user_id.clone(),
            }),
            None => Err(AuthError::InvalidCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> StaticKeyAuthenticator {
        StaticKeyAuthenticator::new([
            ("pk_alpha".to_string(), "user-alpha".to_string()),
            ("pk_beta".to_string(), "user-beta".to_string()),
        ])
    }

    #[tokio::test]
    async fn known_key_resolves_to_its_user() {
        let identity = authenticator().verify("pk_beta").await.expect("valid key");
        assert_eq!(identity.user_id, "user-beta");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let err = authenticator().verify("pk_gamma").await.expect_err("bad key");
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn empty_table_rejects_everything() {
        let auth = StaticKeyAuthenticator::default();
        assert!(auth.is_empty());
        assert!(auth.verify("anything").await.is_err());
    }
}
