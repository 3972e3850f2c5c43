//! Password-reset request state machine.
//!
//! ```text
//! REQUESTED ──accept──▶ ACCEPTED ──send_password──▶ PASSWORD_SENT (terminal)
//! ```
//!
//! No other transition exists. Transitions are pure: they check the current
//! state, return the updated request and never touch the live account. The
//! workflow service applies the held credential and records the audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rolegate_core::{AccountId, ResetRequestId, Versioned};

use crate::{Email, PasswordHash};

/// Lifecycle state of a reset request.
///
/// `PENDING` and `APPROVED` are accepted on input as aliases of the retired
/// single-step design (`APPROVED` applied the password, so it maps to the
/// terminal state). They are never produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetStatus {
    #[serde(alias = "PENDING")]
    Requested,
    Accepted,
    #[serde(alias = "APPROVED")]
    PasswordSent,
}

impl ResetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetStatus::Requested => "REQUESTED",
            ResetStatus::Accepted => "ACCEPTED",
            ResetStatus::PasswordSent => "PASSWORD_SENT",
        }
    }

    /// Parse a stored status, including legacy names.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REQUESTED" | "PENDING" => Some(ResetStatus::Requested),
            "ACCEPTED" => Some(ResetStatus::Accepted),
            "PASSWORD_SENT" | "APPROVED" => Some(ResetStatus::PasswordSent),
            _ => None,
        }
    }

    /// The only state reachable from `self`, if any.
    pub fn next(&self) -> Option<ResetStatus> {
        match self {
            ResetStatus::Requested => Some(ResetStatus::Accepted),
            ResetStatus::Accepted => Some(ResetStatus::PasswordSent),
            ResetStatus::PasswordSent => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl core::fmt::Display for ResetStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition was attempted from a non-adjacent state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("INVALID_STATE_TRANSITION: {from} -> {to}")]
pub struct TransitionError {
    pub from: ResetStatus,
    pub to: ResetStatus,
}

/// Password-reset request raised by an account holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    pub id: ResetRequestId,
    pub account_id: AccountId,
    pub user_email: Email,
    pub status: ResetStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<Email>,
    pub approved_at: Option<DateTime<Utc>>,
    pub password_sent_at: Option<DateTime<Utc>>,
    /// Hash of the credential generated on accept, held until it is applied.
    #[serde(skip_serializing)]
    #[serde(default)]
    pub pending_credential: Option<PasswordHash>,
    pub version: u64,
}

impl PasswordResetRequest {
    pub fn submit(account_id: AccountId, user_email: Email, at: DateTime<Utc>) -> Self {
        Self {
            id: ResetRequestId::new(),
            account_id,
            user_email,
            status: ResetStatus::Requested,
            requested_at: at,
            approved_by: None,
            approved_at: None,
            password_sent_at: None,
            pending_credential: None,
            version: 0,
        }
    }

    fn ensure(&self, from: ResetStatus, to: ResetStatus) -> Result<(), TransitionError> {
        if self.status == from && self.status.next() == Some(to) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    /// Check that `accept` would be legal without producing the new state.
    pub fn check_accept(&self) -> Result<(), TransitionError> {
        self.ensure(ResetStatus::Requested, ResetStatus::Accepted)
    }

    /// Check that `send_password` would be legal.
    pub fn check_send(&self) -> Result<(), TransitionError> {
        self.ensure(ResetStatus::Accepted, ResetStatus::PasswordSent)?;
        if self.pending_credential.is_none() {
            // An ACCEPTED request always holds a credential; a missing one
            // means the row was written outside this machine.
            return Err(TransitionError {
                from: self.status,
                to: ResetStatus::PasswordSent,
            });
        }
        Ok(())
    }

    /// REQUESTED → ACCEPTED, holding `credential` until it is sent.
    pub fn accept(
        &self,
        approved_by: Email,
        credential: PasswordHash,
        at: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        self.check_accept()?;
        let mut next = self.clone();
        next.status = ResetStatus::Accepted;
        next.approved_by = Some(approved_by);
        next.approved_at = Some(at);
        next.pending_credential = Some(credential);
        next.version += 1;
        Ok(next)
    }

    /// ACCEPTED → PASSWORD_SENT. Returns the updated request and the held
    /// credential to apply to the account.
    pub fn mark_sent(&self, at: DateTime<Utc>) -> Result<(Self, PasswordHash), TransitionError> {
        self.check_send()?;
        let mut next = self.clone();
        let credential = next.pending_credential.take().ok_or(TransitionError {
            from: self.status,
            to: ResetStatus::PasswordSent,
        })?;
        next.status = ResetStatus::PasswordSent;
        next.password_sent_at = Some(at);
        next.version += 1;
        Ok((next, credential))
    }

    /// Read view without the held credential.
    pub fn summary(&self) -> ResetRequestSummary {
        ResetRequestSummary {
            id: self.id,
            account_id: self.account_id,
            user_email: self.user_email.clone(),
            status: self.status,
            requested_at: self.requested_at,
            approved_by: self.approved_by.clone(),
            approved_at: self.approved_at,
            password_sent_at: self.password_sent_at,
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "requestId": self.id,
            "status": self.status,
            "approvedBy": self.approved_by,
        })
    }
}

impl Versioned for PasswordResetRequest {
    type Id = ResetRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Read view of a reset request for queues and callers (no credential data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequestSummary {
    pub id: ResetRequestId,
    pub account_id: AccountId,
    pub user_email: Email,
    pub status: ResetStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<Email>,
    pub approved_at: Option<DateTime<Utc>>,
    pub password_sent_at: Option<DateTime<Utc>>,
}
