//! Storage boundary for accounts, profiles, reset requests and audit rows.
//!
//! Every mutation goes through [`Store::commit`] as a [`WriteBatch`]: all
//! operations in a batch are applied atomically or none are. Record writes
//! carry an [`ExpectedVersion`] checked against the stored version; audit
//! rows are append-only and can only be added.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rolegate_auth::{
    ActionAuditEntry, AuditFilter, AuthAccount, Email, LoginAuditEntry, PasswordResetRequest,
    UserProfile,
};
use rolegate_core::{AccountId, ExpectedVersion, ProfileId, ResetRequestId};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Storage failure.
///
/// These are infrastructure errors, as opposed to policy denials or workflow
/// state errors, which never reach the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Conflict(_)
        )
    }

    /// Stable code recorded as the reason of FAILED audit entries.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "STORE_UNAVAILABLE",
            StoreError::Timeout(_) => "STORE_TIMEOUT",
            StoreError::Conflict(_) => "CONCURRENT_MODIFICATION",
            StoreError::Corrupt(_) => "STORE_CORRUPT",
            StoreError::Database(_) => "STORE_ERROR",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write batches
// ─────────────────────────────────────────────────────────────────────────────

/// One operation in a [`WriteBatch`].
///
/// `expected` is the version the record must have *before* the write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutAccount {
        account: AuthAccount,
        expected: ExpectedVersion,
    },
    DeleteAccount {
        id: AccountId,
        expected: ExpectedVersion,
    },
    PutProfile {
        profile: UserProfile,
        expected: ExpectedVersion,
    },
    DeleteProfile {
        id: ProfileId,
        expected: ExpectedVersion,
    },
    PutResetRequest {
        request: PasswordResetRequest,
        expected: ExpectedVersion,
    },
    DeleteResetRequest {
        id: ResetRequestId,
        expected: ExpectedVersion,
    },
    AppendAction(ActionAuditEntry),
    AppendLogin(LoginAuditEntry),
}

/// Ordered set of writes committed as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn put_account(&mut self, account: AuthAccount, expected: ExpectedVersion) -> &mut Self {
        self.push(WriteOp::PutAccount { account, expected })
    }

    pub fn delete_account(&mut self, id: AccountId, expected: ExpectedVersion) -> &mut Self {
        self.push(WriteOp::DeleteAccount { id, expected })
    }

    pub fn put_profile(&mut self, profile: UserProfile, expected: ExpectedVersion) -> &mut Self {
        self.push(WriteOp::PutProfile { profile, expected })
    }

    pub fn delete_profile(&mut self, id: ProfileId, expected: ExpectedVersion) -> &mut Self {
        self.push(WriteOp::DeleteProfile { id, expected })
    }

    pub fn put_reset_request(
        &mut self,
        request: PasswordResetRequest,
        expected: ExpectedVersion,
    ) -> &mut Self {
        self.push(WriteOp::PutResetRequest { request, expected })
    }

    pub fn delete_reset_request(&mut self, id: ResetRequestId, expected: ExpectedVersion) -> &mut Self {
        self.push(WriteOp::DeleteResetRequest { id, expected })
    }

    pub fn append_action(&mut self, entry: ActionAuditEntry) -> &mut Self {
        self.push(WriteOp::AppendAction(entry))
    }

    pub fn append_login(&mut self, entry: LoginAuditEntry) -> &mut Self {
        self.push(WriteOp::AppendLogin(entry))
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch changes anything besides appending audit rows.
    pub fn mutates_records(&self) -> bool {
        self.ops
            .iter()
            .any(|op| !matches!(op, WriteOp::AppendAction(_) | WriteOp::AppendLogin(_)))
    }
}

/// Sequences assigned to the audit rows of a committed batch, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub action_sequences: Vec<u64>,
    pub login_sequences: Vec<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pagination
// ─────────────────────────────────────────────────────────────────────────────

/// Page window for audit queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self::with_default(limit, offset, Self::DEFAULT_LIMIT)
    }

    /// Like [`Pagination::new`] with a configured default limit.
    pub fn with_default(limit: Option<u32>, offset: Option<u32>, default_limit: u32) -> Self {
        Self {
            limit: limit.unwrap_or(default_limit).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    pub fn from_filter(filter: &AuditFilter, default_limit: u32) -> Self {
        Self::with_default(filter.limit, filter.offset, default_limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent state of the access-control core.
///
/// Implementations must:
/// - apply a batch atomically (all operations or none)
/// - check every `expected` version against the stored record
/// - keep account emails unique
/// - assign audit sequences monotonically, per audit kind
/// - return audit rows latest first, ties broken by higher sequence first
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn account(&self, id: AccountId) -> Result<Option<AuthAccount>, StoreError>;

    async fn account_by_email(&self, email: &Email) -> Result<Option<AuthAccount>, StoreError>;

    /// All accounts, oldest first.
    async fn accounts(&self) -> Result<Vec<AuthAccount>, StoreError>;

    async fn profile(&self, id: ProfileId) -> Result<Option<UserProfile>, StoreError>;

    async fn profile_of(&self, account_id: AccountId) -> Result<Option<UserProfile>, StoreError>;

    async fn profiles(&self) -> Result<Vec<UserProfile>, StoreError>;

    async fn reset_request(&self, id: ResetRequestId) -> Result<Option<PasswordResetRequest>, StoreError>;

    async fn reset_requests_of(&self, account_id: AccountId) -> Result<Vec<PasswordResetRequest>, StoreError>;

    /// All reset requests, latest first.
    async fn reset_requests(&self) -> Result<Vec<PasswordResetRequest>, StoreError>;

    async fn query_actions(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<Vec<ActionAuditEntry>, StoreError>;

    async fn query_logins(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<Vec<LoginAuditEntry>, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError>;
}

#[async_trait::async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn account(&self, id: AccountId) -> Result<Option<AuthAccount>, StoreError> {
        (**self).account(id).await
    }

    async fn account_by_email(&self, email: &Email) -> Result<Option<AuthAccount>, StoreError> {
        (**self).account_by_email(email).await
    }

    async fn accounts(&self) -> Result<Vec<AuthAccount>, StoreError> {
        (**self).accounts().await
    }

    async fn profile(&self, id: ProfileId) -> Result<Option<UserProfile>, StoreError> {
        (**self).profile(id).await
    }

    async fn profile_of(&self, account_id: AccountId) -> Result<Option<UserProfile>, StoreError> {
        (**self).profile_of(account_id).await
    }

    async fn profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        (**self).profiles().await
    }

    async fn reset_request(&self, id: ResetRequestId) -> Result<Option<PasswordResetRequest>, StoreError> {
        (**self).reset_request(id).await
    }

    async fn reset_requests_of(&self, account_id: AccountId) -> Result<Vec<PasswordResetRequest>, StoreError> {
        (**self).reset_requests_of(account_id).await
    }

    async fn reset_requests(&self) -> Result<Vec<PasswordResetRequest>, StoreError> {
        (**self).reset_requests().await
    }

    async fn query_actions(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<Vec<ActionAuditEntry>, StoreError> {
        (**self).query_actions(filter, page).await
    }

    async fn query_logins(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<Vec<LoginAuditEntry>, StoreError> {
        (**self).query_logins(filter, page).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        (**self).commit(batch).await
    }
}
