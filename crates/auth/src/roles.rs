//! Role catalog: the five roles and the "may-manage" relation between them.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use rolegate_core::DomainError;

/// Role carried by every account and every actor.
///
/// Declaration order is privilege order (used only for stable sorting).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Assigned on registration.
    #[default]
    User,
    Editor,
    Support,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::User,
        Role::Editor,
        Role::Support,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Editor => "EDITOR",
            Role::Support => "SUPPORT",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// ADMIN and SUPER_ADMIN.
    pub fn is_administrative(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let normalized = normalized.strip_prefix("ROLE_").unwrap_or(&normalized);
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown role '{s}'")))
    }
}

/// Ordered set of roles.
pub type RoleSet = BTreeSet<Role>;

/// Static role catalog.
///
/// This is the only place the management matrix is written down; every
/// caller goes through [`crate::PermissionPolicy`], which consults it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleCatalog;

impl RoleCatalog {
    /// Roles whose holders `actor` may manage (role, status, deletion).
    ///
    /// Self-targeting is not expressed here; the policy rejects it first.
    pub fn manageable_roles(actor: Role) -> &'static [Role] {
        match actor {
            Role::SuperAdmin => &Role::ALL,
            Role::Admin => &[Role::User, Role::Editor, Role::Support],
            Role::Editor | Role::Support | Role::User => &[],
        }
    }

    pub fn can_manage_role(actor: Role, target: Role) -> bool {
        Self::manageable_roles(actor).contains(&target)
    }

    /// Roles `actor` may assign to an account it manages.
    pub fn allowed_role_targets(actor: Role) -> RoleSet {
        match actor {
            Role::SuperAdmin => Role::ALL.into_iter().collect(),
            Role::Admin => [Role::User, Role::Support, Role::Editor].into_iter().collect(),
            Role::Editor | Role::Support | Role::User => RoleSet::new(),
        }
    }

    /// Operating the password-reset workflow is a SUPPORT capability, not a
    /// role-management one.
    pub fn can_operate_password_resets(actor: Role) -> bool {
        actor == Role::Support
    }

    /// EDITOR may edit profile content of accounts it does not own.
    pub fn can_edit_foreign_profiles(actor: Role) -> bool {
        actor == Role::Editor
    }
}
