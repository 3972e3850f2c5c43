//! Credential collaborators.
//!
//! The hashing algorithm and the shape of generated secrets live outside the
//! policy core; services only depend on these contracts.

use thiserror::Error;

use crate::{PasswordHash, Secret};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("secret must not be blank")]
    Blank,

    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("stored hash is malformed")]
    MalformedHash,
}

/// One-way hashing of secrets.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &Secret) -> Result<PasswordHash, CredentialError>;

    /// Whether `secret` matches `hash`. Malformed hashes never match.
    fn verify(&self, secret: &Secret, hash: &PasswordHash) -> bool;
}

/// Source of fresh credentials issued by the reset workflow.
pub trait SecretGenerator: Send + Sync {
    fn generate(&self) -> Secret;
}

impl<T: CredentialHasher + ?Sized> CredentialHasher for std::sync::Arc<T> {
    fn hash(&self, secret: &Secret) -> Result<PasswordHash, CredentialError> {
        (**self).hash(secret)
    }

    fn verify(&self, secret: &Secret, hash: &PasswordHash) -> bool {
        (**self).verify(secret, hash)
    }
}

impl<T: SecretGenerator + ?Sized> SecretGenerator for std::sync::Arc<T> {
    fn generate(&self) -> Secret {
        (**self).generate()
    }
}
