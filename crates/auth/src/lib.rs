//! `rolegate-auth`: pure authorization policy and account-management domain.
//!
//! Nothing in this crate performs I/O. Services in `rolegate-infra` load
//! records, ask the policy, and persist the outcome together with its audit.

pub mod account;
pub mod actor;
pub mod alert;
pub mod audit;
pub mod credentials;
pub mod policy;
pub mod profile;
pub mod reset;
pub mod roles;

pub use account::{AccountSummary, AuthAccount, Email, PasswordHash, Secret};
pub use actor::ActorContext;
pub use alert::{LoginAlert, LoginAlertType};
pub use audit::{
    ActionAuditEntry, ActionStatus, ActionType, AuditFilter, LoginAuditEntry, LoginReason, LoginType,
};
pub use credentials::{CredentialError, CredentialHasher, SecretGenerator};
pub use policy::{AuditView, Decision, PermissionPolicy, ReasonCode};
pub use profile::{ProfileDetails, ProfileListing, ProfileShortView, UserProfile};
pub use reset::{PasswordResetRequest, ResetRequestSummary, ResetStatus, TransitionError};
pub use roles::{Role, RoleCatalog, RoleSet};
