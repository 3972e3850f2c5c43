//! Authentication accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use rolegate_core::{AccountId, DomainError, ProfileId, Versioned};

use crate::Role;

// ─────────────────────────────────────────────────────────────────────────────
// Email
// ─────────────────────────────────────────────────────────────────────────────

/// Case-insensitive email address, stored trimmed and lowercased.
///
/// Uniqueness of accounts is defined over this normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let normalized = raw.as_ref().trim().to_lowercase();
        let Some((local, domain)) = normalized.split_once('@') else {
            return Err(DomainError::validation("invalid email format"));
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("email must not contain whitespace"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Email {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque digest produced by a `CredentialHasher`.
///
/// `Debug` is redacted so digests never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

/// Plaintext secret in transit between a generator, a hasher and a delivery
/// channel. Never persisted, never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Debug for Secret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Account
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication account.
///
/// # Invariants
/// - Exactly one account per normalized email.
/// - `role` and `active` change only through policy-gated directory
///   operations; fields are public for reading, the directory is the only
///   writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAccount {
    pub id: AccountId,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub role: Role,
    pub active: bool,
    pub profile_created: bool,
    pub profile_id: Option<ProfileId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl AuthAccount {
    /// A freshly registered account: USER, active, no profile.
    pub fn register(email: Email, password_hash: PasswordHash, at: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            email,
            password_hash,
            role: Role::User,
            active: true,
            profile_created: false,
            profile_id: None,
            version: 0,
            created_at: at,
        }
    }

    /// Audit snapshot of the privilege-relevant fields (no credential data).
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "email": self.email,
            "role": self.role,
            "active": self.active,
            "profileCreated": self.profile_created,
        })
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
            active: self.active,
            profile_created: self.profile_created,
            created_at: self.created_at,
        }
    }
}

impl Versioned for AuthAccount {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Read view of an account for listings (no credential data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: AccountId,
    pub email: Email,
    pub role: Role,
    pub active: bool,
    pub profile_created: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        let email = Email::parse("  Alice@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "alice@example.com");
        assert_eq!(email, Email::parse("alice@example.com").unwrap());
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for raw in ["", "alice", "@example.com", "alice@", "a@b@c", "al ice@example.com"] {
            assert!(Email::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn registration_defaults() {
        let account = AuthAccount::register(
            Email::parse("bob@example.com").unwrap(),
            PasswordHash::new("digest"),
            Utc::now(),
        );
        assert_eq!(account.role, Role::User);
        assert!(account.active);
        assert!(!account.profile_created);
        assert_eq!(account.version, 0);
    }

    #[test]
    fn snapshot_and_debug_never_expose_credentials() {
        let account = AuthAccount::register(
            Email::parse("carol@example.com").unwrap(),
            PasswordHash::new("super-secret-digest"),
            Utc::now(),
        );
        assert!(!account.snapshot().to_string().contains("super-secret-digest"));
        assert!(!format!("{account:?}").contains("super-secret-digest"));
        assert!(!format!("{:?}", Secret::new("hunter2")).contains("hunter2"));
    }
}
