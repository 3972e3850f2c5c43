//! Authentication-boundary events: login, logout, failures, password changes.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use rolegate_auth::{AuditFilter, Email, LoginAlert, LoginAuditEntry, LoginReason, LoginType, Role, Secret};
use rolegate_core::AuditEntryId;

use crate::context::ServiceContext;
use crate::credentials::token_digest;
use crate::error::ServiceResult;
use crate::store::Store;

/// One event reported by the authentication boundary.
#[derive(Debug, Clone)]
pub struct LoginEvent {
    /// As submitted by the client; normalized before it is stored.
    pub email: String,
    pub role: Option<Role>,
    pub login_type: LoginType,
    pub reason: Option<LoginReason>,
    pub jwt_issued_at: Option<DateTime<Utc>>,
    pub jwt_expires_at: Option<DateTime<Utc>>,
    /// Session token; only its digest is stored.
    pub token: Option<Secret>,
}

impl LoginEvent {
    fn new(email: impl Into<String>, login_type: LoginType, reason: LoginReason) -> Self {
        Self {
            email: email.into(),
            role: None,
            login_type,
            reason: Some(reason),
            jwt_issued_at: None,
            jwt_expires_at: None,
            token: None,
        }
    }

    /// Successful login that issued `token`, valid from `issued_at` until `expires_at`.
    pub fn login(
        email: impl Into<String>,
        role: Role,
        token: Secret,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Some(role),
            jwt_issued_at: Some(issued_at),
            jwt_expires_at: Some(expires_at),
            token: Some(token),
            ..Self::new(email, LoginType::Login, LoginReason::LoginSuccess)
        }
    }

    pub fn logout(email: impl Into<String>, role: Role, token: Option<Secret>) -> Self {
        Self {
            role: Some(role),
            token,
            ..Self::new(email, LoginType::Logout, LoginReason::UserLogout)
        }
    }

    /// Rejected login attempt. `role` is known only when the account exists.
    pub fn failure(email: impl Into<String>, role: Option<Role>, reason: LoginReason) -> Self {
        Self {
            role,
            ..Self::new(email, LoginType::Failed, reason)
        }
    }

    /// Password change attempt; `reason` tells success from rejection.
    pub fn password_change(email: impl Into<String>, role: Role, reason: LoginReason) -> Self {
        Self {
            role: Some(role),
            ..Self::new(email, LoginType::PasswordChanged, reason)
        }
    }

    /// Ledger row for this event at `at`. The email is normalized and the
    /// token reduced to its digest.
    pub(crate) fn into_entry(self, at: DateTime<Utc>) -> LoginAuditEntry {
        LoginAuditEntry {
            id: AuditEntryId::new(),
            sequence: 0,
            email: self.email.trim().to_lowercase(),
            role: self.role,
            login_type: self.login_type,
            reason: self.reason,
            event_time: at,
            jwt_issued_at: self.jwt_issued_at,
            jwt_expires_at: self.jwt_expires_at,
            token_digest: self.token.as_ref().map(token_digest),
        }
    }
}

#[derive(Clone)]
pub struct LoginEventRecorder<S> {
    ctx: ServiceContext<S>,
}

impl<S> LoginEventRecorder<S>
where
    S: Store + Clone,
{
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    /// Append one login-audit entry stamped with the current time.
    #[instrument(skip_all, fields(login_type = event.login_type.as_str()), err)]
    pub async fn record(&self, event: LoginEvent) -> ServiceResult<LoginAuditEntry> {
        let entry = self.ctx.ledger.record_login(event.into_entry(self.ctx.now())).await?;
        debug!(sequence = entry.sequence, status = entry.display_status().as_str(), "login event recorded");
        Ok(entry)
    }

    /// Alert for the session that just started.
    ///
    /// Expects the LOGIN of that session to be recorded already.
    pub async fn login_alert(&self, email: &Email, now: DateTime<Utc>) -> ServiceResult<LoginAlert> {
        let logins = AuditFilter {
            limit: Some(2),
            ..AuditFilter::default().email(email.as_str()).login_type(LoginType::Login)
        };
        let logouts = AuditFilter {
            limit: Some(1),
            ..AuditFilter::default().email(email.as_str()).login_type(LoginType::Logout)
        };

        let mut history = self.ctx.ledger.query_logins(&logins).await?;
        history.extend(self.ctx.ledger.query_logins(&logouts).await?);
        Ok(LoginAlert::from_history(&history, now))
    }
}
