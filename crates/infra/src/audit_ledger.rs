//! Append-only audit ledger over a [`Store`].
//!
//! Entries either commit on their own (`record_*`) or ride along in the
//! caller's batch (`stage_*`) so they become durable together with the
//! mutation they describe.

use tracing::{debug, instrument};

use rolegate_auth::{ActionAuditEntry, AuditFilter, LoginAuditEntry};

use crate::store::{Pagination, Store, StoreError, WriteBatch};

#[derive(Debug, Clone)]
pub struct AuditLedger<S> {
    store: S,
    page_limit: u32,
}

impl<S> AuditLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            page_limit: Pagination::DEFAULT_LIMIT,
        }
    }

    /// Default page size for queries that do not set `limit`.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.clamp(1, Pagination::MAX_LIMIT);
        self
    }

    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    pub fn stage_action(&self, batch: &mut WriteBatch, entry: ActionAuditEntry) {
        debug!(action = %entry.action_type, status = entry.action_status.as_str(), "audit entry staged");
        batch.append_action(entry);
    }

    pub fn stage_login(&self, batch: &mut WriteBatch, entry: LoginAuditEntry) {
        batch.append_login(entry);
    }
}

impl<S: Store> AuditLedger<S> {
    /// Append one action entry; returns it with its assigned sequence.
    #[instrument(skip(self, entry), fields(action = %entry.action_type), err)]
    pub async fn record_action(&self, mut entry: ActionAuditEntry) -> Result<ActionAuditEntry, StoreError> {
        let mut batch = WriteBatch::new();
        batch.append_action(entry.clone());
        let receipt = self.store.commit(batch).await?;
        entry.sequence = receipt.action_sequences.first().copied().unwrap_or_default();
        Ok(entry)
    }

    /// Append one login entry; returns it with its assigned sequence.
    #[instrument(skip(self, entry), fields(login_type = entry.login_type.as_str()), err)]
    pub async fn record_login(&self, mut entry: LoginAuditEntry) -> Result<LoginAuditEntry, StoreError> {
        let mut batch = WriteBatch::new();
        batch.append_login(entry.clone());
        let receipt = self.store.commit(batch).await?;
        entry.sequence = receipt.login_sequences.first().copied().unwrap_or_default();
        Ok(entry)
    }

    pub async fn query_actions(&self, filter: &AuditFilter) -> Result<Vec<ActionAuditEntry>, StoreError> {
        self.store
            .query_actions(filter, Pagination::from_filter(filter, self.page_limit))
            .await
    }

    pub async fn query_logins(&self, filter: &AuditFilter) -> Result<Vec<LoginAuditEntry>, StoreError> {
        self.store
            .query_logins(filter, Pagination::from_filter(filter, self.page_limit))
            .await
    }
}
