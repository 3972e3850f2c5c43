//! Permission policy: the single decision table for privileged operations.
//!
//! - No IO
//! - No panics
//! - No shared state (safe to evaluate concurrently without synchronization)
//!
//! Denial is an expected, auditable outcome, so it is returned as a
//! [`Decision`] value rather than an error.

use serde::{Deserialize, Serialize};

use crate::{ActorContext, AuthAccount, Email, Role, RoleCatalog};

/// Closed set of denial reasons. Codes are stable; the presentation layer
/// maps them to messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// The actor targeted its own account. Outranks every other rule.
    SelfModificationForbidden,
    /// The target account's current role is outside the actor's manageable set.
    RoleNotManageable,
    /// The requested new role is outside the actor's assignable set.
    TargetRoleNotAssignable,
    /// The actor's role does not grant this operation on this account.
    AccountForbidden,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::SelfModificationForbidden => "SELF_MODIFICATION_FORBIDDEN",
            ReasonCode::RoleNotManageable => "ROLE_NOT_MANAGEABLE",
            ReasonCode::TargetRoleNotAssignable => "TARGET_ROLE_NOT_ASSIGNABLE",
            ReasonCode::AccountForbidden => "ACCOUNT_FORBIDDEN",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ReasonCode::SelfModificationForbidden => "You cannot modify your own account",
            ReasonCode::RoleNotManageable => "You cannot manage accounts with this role",
            ReasonCode::TargetRoleNotAssignable => "You cannot assign this role",
            ReasonCode::AccountForbidden => "You are not allowed to perform this action on this account",
        }
    }
}

impl core::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reasonCode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny(ReasonCode),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            Decision::Allow => None,
            Decision::Deny(code) => Some(*code),
        }
    }

    /// `Ok(())` on allow, the reason code on deny.
    pub fn into_result(self) -> Result<(), ReasonCode> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(code) => Err(code),
        }
    }
}

/// Audit views, each gated by role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditView {
    /// The actor's own login history.
    OwnLogins,
    /// Login audit of every account.
    Logins,
    /// Password-reset requests and PASSWORD_RESET action entries.
    PasswordResets,
    /// Full action audit including before/after snapshots.
    Actions,
}

/// Central decision table for every privileged operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionPolicy;

impl PermissionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Change `target`'s role to `new_role`.
    pub fn authorize_role_change(
        &self,
        actor: &ActorContext,
        target: &AuthAccount,
        new_role: Role,
    ) -> Decision {
        if actor.is(&target.email) {
            return Decision::Deny(ReasonCode::SelfModificationForbidden);
        }
        if !RoleCatalog::can_manage_role(actor.role(), target.role) {
            return Decision::Deny(ReasonCode::RoleNotManageable);
        }
        if !RoleCatalog::allowed_role_targets(actor.role()).contains(&new_role) {
            return Decision::Deny(ReasonCode::TargetRoleNotAssignable);
        }
        Decision::Allow
    }

    /// Activate or deactivate `target`.
    pub fn authorize_status_change(&self, actor: &ActorContext, target: &AuthAccount) -> Decision {
        if actor.is(&target.email) {
            return Decision::Deny(ReasonCode::SelfModificationForbidden);
        }
        if !RoleCatalog::can_manage_role(actor.role(), target.role) {
            return Decision::Deny(ReasonCode::RoleNotManageable);
        }
        Decision::Allow
    }

    /// Delete `target` (and its profile).
    pub fn authorize_delete(&self, actor: &ActorContext, target: &AuthAccount) -> Decision {
        if actor.is(&target.email) {
            return Decision::Deny(ReasonCode::SelfModificationForbidden);
        }
        match actor.role() {
            Role::SuperAdmin => Decision::Allow,
            Role::Admin if RoleCatalog::can_manage_role(Role::Admin, target.role) => Decision::Allow,
            Role::Admin => Decision::Deny(ReasonCode::RoleNotManageable),
            Role::Editor | Role::Support | Role::User => {
                Decision::Deny(ReasonCode::AccountForbidden)
            }
        }
    }

    /// Create or edit the profile owned by `target`.
    ///
    /// Everyone may edit their own profile; EDITOR may also edit profiles of
    /// non-administrative accounts.
    pub fn authorize_profile_edit(&self, actor: &ActorContext, target: &AuthAccount) -> Decision {
        if actor.is(&target.email) {
            return Decision::Allow;
        }
        if RoleCatalog::can_edit_foreign_profiles(actor.role()) && !target.role.is_administrative()
        {
            return Decision::Allow;
        }
        Decision::Deny(ReasonCode::AccountForbidden)
    }

    /// Accept a reset request or apply its credential.
    pub fn authorize_reset_step(&self, actor: &ActorContext, request_email: &Email) -> Decision {
        if actor.is(request_email) {
            return Decision::Deny(ReasonCode::SelfModificationForbidden);
        }
        if !RoleCatalog::can_operate_password_resets(actor.role()) {
            return Decision::Deny(ReasonCode::AccountForbidden);
        }
        Decision::Allow
    }

    /// Read access to an audit view.
    pub fn authorize_audit_view(&self, actor: &ActorContext, view: AuditView) -> Decision {
        let allowed = match view {
            AuditView::OwnLogins => true,
            AuditView::Logins => matches!(
                actor.role(),
                Role::Support | Role::Admin | Role::SuperAdmin
            ),
            AuditView::PasswordResets => matches!(actor.role(), Role::Admin | Role::SuperAdmin),
            AuditView::Actions => actor.role() == Role::SuperAdmin,
        };
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny(ReasonCode::AccountForbidden)
        }
    }

    /// Read access to the reset-request queue (operators and their supervisors).
    pub fn authorize_reset_queue(&self, actor: &ActorContext) -> Decision {
        match actor.role() {
            Role::Support | Role::Admin | Role::SuperAdmin => Decision::Allow,
            Role::Editor | Role::User => Decision::Deny(ReasonCode::AccountForbidden),
        }
    }

    /// Read access to the account directory listing.
    pub fn authorize_directory_listing(&self, actor: &ActorContext) -> Decision {
        match actor.role() {
            Role::Editor | Role::Admin | Role::SuperAdmin => Decision::Allow,
            Role::Support | Role::User => Decision::Deny(ReasonCode::AccountForbidden),
        }
    }
}
