//! Audit records: privileged actions and authentication-boundary events.
//!
//! Both kinds are append-only. Rows capture email/role values at the time of
//! the event rather than referencing live accounts, so they survive account
//! deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rolegate_core::{AccountId, AuditEntryId};

use crate::{ActorContext, Email, ReasonCode, Role};

// ─────────────────────────────────────────────────────────────────────────────
// Action audit
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    RoleChange,
    ProfileCreate,
    ProfileUpdate,
    PasswordReset,
    UserDelete,
    AccountActivate,
    AccountDeactivate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::RoleChange => "ROLE_CHANGE",
            ActionType::ProfileCreate => "PROFILE_CREATE",
            ActionType::ProfileUpdate => "PROFILE_UPDATE",
            ActionType::PasswordReset => "PASSWORD_RESET",
            ActionType::UserDelete => "USER_DELETE",
            ActionType::AccountActivate => "ACCOUNT_ACTIVATE",
            ActionType::AccountDeactivate => "ACCOUNT_DEACTIVATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            ActionType::RoleChange,
            ActionType::ProfileCreate,
            ActionType::ProfileUpdate,
            ActionType::PasswordReset,
            ActionType::UserDelete,
            ActionType::AccountActivate,
            ActionType::AccountDeactivate,
        ]
        .into_iter()
        .find(|t| t.as_str() == raw)
    }

    /// ACCOUNT_ACTIVATE or ACCOUNT_DEACTIVATE for the requested flag.
    pub fn for_status(active: bool) -> Self {
        if active {
            ActionType::AccountActivate
        } else {
            ActionType::AccountDeactivate
        }
    }
}

impl core::fmt::Display for ActionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "SUCCESS",
            ActionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SUCCESS" => Some(ActionStatus::Success),
            "FAILED" => Some(ActionStatus::Failed),
            _ => None,
        }
    }
}

/// Reason recorded on FAILED entries that are not policy denials.
pub mod failure {
    pub const ACCOUNT_NOT_FOUND: &str = "ACCOUNT_NOT_FOUND";
    pub const PROFILE_NOT_FOUND: &str = "PROFILE_NOT_FOUND";
    pub const REQUEST_NOT_FOUND: &str = "REQUEST_NOT_FOUND";
    pub const PROFILE_ALREADY_EXISTS: &str = "PROFILE_ALREADY_EXISTS";
    pub const INVALID_STATE_TRANSITION: &str = "INVALID_STATE_TRANSITION";
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const CREDENTIAL_ERROR: &str = "CREDENTIAL_ERROR";
    pub const CREDENTIAL_NOT_STAGED: &str = "CREDENTIAL_NOT_STAGED";
}

/// Immutable record of an attempted privileged action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAuditEntry {
    pub id: AuditEntryId,
    /// Store-assigned insertion order; 0 until committed.
    pub sequence: u64,
    pub actor_email: Email,
    pub actor_role: Role,
    pub target_user_email: Option<Email>,
    pub target_account_id: Option<AccountId>,
    pub action_type: ActionType,
    pub action_status: ActionStatus,
    pub action_reason: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub performed_at: DateTime<Utc>,
}

impl ActionAuditEntry {
    fn base(
        actor: &ActorContext,
        action_type: ActionType,
        action_status: ActionStatus,
        performed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            sequence: 0,
            actor_email: actor.email().clone(),
            actor_role: actor.role(),
            target_user_email: None,
            target_account_id: None,
            action_type,
            action_status,
            action_reason: None,
            before_state: None,
            after_state: None,
            performed_at,
        }
    }

    pub fn success(actor: &ActorContext, action_type: ActionType, performed_at: DateTime<Utc>) -> Self {
        Self::base(actor, action_type, ActionStatus::Success, performed_at)
    }

    pub fn failure(
        actor: &ActorContext,
        action_type: ActionType,
        reason: impl Into<String>,
        performed_at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self::base(actor, action_type, ActionStatus::Failed, performed_at);
        entry.action_reason = Some(reason.into());
        entry
    }

    pub fn denied(
        actor: &ActorContext,
        action_type: ActionType,
        code: ReasonCode,
        performed_at: DateTime<Utc>,
    ) -> Self {
        Self::failure(actor, action_type, code.as_str(), performed_at)
    }

    pub fn target(mut self, email: &Email, account_id: AccountId) -> Self {
        self.target_user_email = Some(email.clone());
        self.target_account_id = Some(account_id);
        self
    }

    /// Target known only by id (e.g. it no longer exists).
    pub fn target_id(mut self, account_id: AccountId) -> Self {
        self.target_account_id = Some(account_id);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.action_reason = Some(reason.into());
        self
    }

    pub fn states(mut self, before: Option<serde_json::Value>, after: Option<serde_json::Value>) -> Self {
        self.before_state = before;
        self.after_state = after;
        self
    }

    /// Copy without before/after snapshots, for roles not entitled to them.
    pub fn redacted(&self) -> Self {
        Self {
            before_state: None,
            after_state: None,
            ..self.clone()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Login audit
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginType {
    Login,
    Logout,
    Failed,
    PasswordChanged,
}

impl LoginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginType::Login => "LOGIN",
            LoginType::Logout => "LOGOUT",
            LoginType::Failed => "FAILED",
            LoginType::PasswordChanged => "PASSWORD_CHANGED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LOGIN" => Some(LoginType::Login),
            "LOGOUT" => Some(LoginType::Logout),
            "FAILED" => Some(LoginType::Failed),
            "PASSWORD_CHANGED" => Some(LoginType::PasswordChanged),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginReason {
    LoginSuccess,
    UserLogout,
    EmailNotFound,
    InvalidPassword,
    UserDisabled,
    PasswordChangedSuccess,
    InvalidCurrentPassword,
    SamePasswordReuse,
}

impl LoginReason {
    pub const ALL: [LoginReason; 8] = [
        LoginReason::LoginSuccess,
        LoginReason::UserLogout,
        LoginReason::EmailNotFound,
        LoginReason::InvalidPassword,
        LoginReason::UserDisabled,
        LoginReason::PasswordChangedSuccess,
        LoginReason::InvalidCurrentPassword,
        LoginReason::SamePasswordReuse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoginReason::LoginSuccess => "LOGIN_SUCCESS",
            LoginReason::UserLogout => "USER_LOGOUT",
            LoginReason::EmailNotFound => "EMAIL_NOT_FOUND",
            LoginReason::InvalidPassword => "INVALID_PASSWORD",
            LoginReason::UserDisabled => "USER_DISABLED",
            LoginReason::PasswordChangedSuccess => "PASSWORD_CHANGED_SUCCESS",
            LoginReason::InvalidCurrentPassword => "INVALID_CURRENT_PASSWORD",
            LoginReason::SamePasswordReuse => "SAME_PASSWORD_REUSE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }
}

/// Immutable record of one authentication-boundary event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAuditEntry {
    pub id: AuditEntryId,
    pub sequence: u64,
    /// As submitted; may not belong to any account (e.g. EMAIL_NOT_FOUND).
    pub email: String,
    pub role: Option<Role>,
    pub login_type: LoginType,
    pub reason: Option<LoginReason>,
    pub event_time: DateTime<Utc>,
    pub jwt_issued_at: Option<DateTime<Utc>>,
    pub jwt_expires_at: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the session token; the token itself is never stored.
    pub token_digest: Option<String>,
}

impl LoginAuditEntry {
    /// Outcome shown in audit views.
    pub fn display_status(&self) -> ActionStatus {
        match (self.login_type, self.reason) {
            (LoginType::Login | LoginType::Logout, _) => ActionStatus::Success,
            (LoginType::Failed, _) => ActionStatus::Failed,
            (LoginType::PasswordChanged, Some(LoginReason::PasswordChangedSuccess)) => ActionStatus::Success,
            (LoginType::PasswordChanged, _) => ActionStatus::Failed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Filter for audit queries. All criteria are optional and combined with AND.
///
/// Results are ordered latest first; ties keep later inserts first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub action_type: Option<ActionType>,
    pub status: Option<ActionStatus>,
    pub login_type: Option<LoginType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Exact (normalized) email: actor or target for actions, the event email
    /// for logins.
    pub email: Option<String>,
    /// Case-insensitive substring of the actor/target email (actions) or the
    /// event email (logins).
    pub email_contains: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditFilter {
    pub fn action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = Some(action_type);
        self
    }

    pub fn status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn login_type(mut self, login_type: LoginType) -> Self {
        self.login_type = Some(login_type);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into().trim().to_lowercase());
        self
    }

    pub fn email_contains(mut self, needle: impl Into<String>) -> Self {
        self.email_contains = Some(needle.into());
        self
    }

    fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }

    fn email_matches<'a>(&self, candidates: impl Iterator<Item = &'a str> + Clone) -> bool {
        let exact = match &self.email {
            None => true,
            Some(email) => candidates.clone().any(|c| c == email),
        };
        let contains = match &self.email_contains {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                candidates.clone().any(|c| c.to_lowercase().contains(&needle))
            }
        };
        exact && contains
    }

    pub fn matches_action(&self, entry: &ActionAuditEntry) -> bool {
        self.action_type.is_none_or(|t| t == entry.action_type)
            && self.status.is_none_or(|s| s == entry.action_status)
            && self.in_range(entry.performed_at)
            && self.email_matches(
                std::iter::once(entry.actor_email.as_str())
                    .chain(entry.target_user_email.as_ref().map(Email::as_str)),
            )
    }

    pub fn matches_login(&self, entry: &LoginAuditEntry) -> bool {
        self.login_type.is_none_or(|t| t == entry.login_type)
            && self.status.is_none_or(|s| s == entry.display_status())
            && self.in_range(entry.event_time)
            && self.email_matches(std::iter::once(entry.email.as_str()))
    }
}
