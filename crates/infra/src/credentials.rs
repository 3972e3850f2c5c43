//! Default credential collaborators: Argon2id hashing, random secrets and
//! session-token digests.

use argon2::password_hash::{rand_core::OsRng, PasswordHash as PhcString, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;
use sha2::{Digest, Sha256};

use rolegate_auth::{CredentialError, CredentialHasher, PasswordHash, Secret, SecretGenerator};

/// Argon2id with the crate's default parameters; salt is embedded in the PHC
/// string.
#[derive(Debug, Default, Clone)]
pub struct Argon2Hasher;

impl Argon2Hasher {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, secret: &Secret) -> Result<PasswordHash, CredentialError> {
        if secret.is_blank() {
            return Err(CredentialError::Blank);
        }
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(secret.expose().as_bytes(), &salt)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(PasswordHash::new(phc.to_string()))
    }

    fn verify(&self, secret: &Secret, hash: &PasswordHash) -> bool {
        match PhcString::new(hash.as_str()) {
            Ok(parsed) => Argon2::default()
                .verify_password(secret.expose().as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Alphanumeric secrets of a fixed length.
#[derive(Debug, Clone)]
pub struct RandomSecretGenerator {
    length: usize,
}

impl RandomSecretGenerator {
    pub const MIN_LENGTH: usize = 8;

    /// Lengths below [`Self::MIN_LENGTH`] are raised to it.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(Self::MIN_LENGTH),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomSecretGenerator {
    fn default() -> Self {
        Self::new(12)
    }
}

impl SecretGenerator for RandomSecretGenerator {
    fn generate(&self) -> Secret {
        let value: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();
        Secret::new(value)
    }
}

/// Hex SHA-256 of a session token, as stored in the login audit.
pub fn token_digest(token: &Secret) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.expose().as_bytes());
    hex::encode(hasher.finalize())
}
