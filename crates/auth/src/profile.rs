//! User profiles (descriptive data owned by an account holder).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use rolegate_core::{AccountId, DomainError, ProfileId, Versioned};

use crate::Email;

/// Editable profile fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDetails {
    pub name: String,
    pub age: Option<u32>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub qualification: Option<String>,
    pub dob: Option<NaiveDate>,
    pub languages: Option<String>,
}

impl ProfileDetails {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if let Some(phone) = &self.phone {
            if !phone.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ')) {
                return Err(DomainError::validation("phone may contain only digits, '+', '-' and spaces"));
            }
        }
        Ok(())
    }
}

/// Profile linked one-to-one to an `AuthAccount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: ProfileId,
    pub account_id: AccountId,
    /// Copied from the account; never taken from the edit payload.
    pub email: Email,
    #[serde(flatten)]
    pub details: ProfileDetails,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn create(account_id: AccountId, email: Email, details: ProfileDetails, at: DateTime<Utc>) -> Self {
        Self {
            id: ProfileId::new(),
            account_id,
            email,
            details,
            version: 0,
            updated_at: at,
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn short_view(&self, sno: u64) -> ProfileShortView {
        ProfileShortView {
            sno,
            name: self.details.name.clone(),
            email: self.email.clone(),
            phone: mask_phone(self.details.phone.as_deref()),
        }
    }
}

impl Versioned for UserProfile {
    type Id = ProfileId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Reduced listing row shown to USER-role actors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileShortView {
    pub sno: u64,
    pub name: String,
    pub email: Email,
    pub phone: String,
}

/// Profile listing as seen by a given role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileListing {
    Short { rows: Vec<ProfileShortView> },
    Full { rows: Vec<UserProfile> },
}

/// Keep only the last four digits visible.
pub fn mask_phone(phone: Option<&str>) -> String {
    match phone {
        Some(p) if p.chars().count() >= 4 => {
            let tail: String = p.chars().skip(p.chars().count() - 4).collect();
            format!("XXXXXX{tail}")
        }
        _ => "XXXX".to_string(),
    }
}
