//! Collaborators shared by the services.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use rolegate_auth::{ActionAuditEntry, CredentialHasher, PermissionPolicy, SecretGenerator};
use rolegate_core::{AccountId, Clock, ResetRequestId, SystemClock};

use crate::audit_ledger::AuditLedger;
use crate::credentials::{Argon2Hasher, RandomSecretGenerator};
use crate::delivery::{CredentialDelivery, InMemoryDelivery};
use crate::error::{ServiceError, ServiceResult};
use crate::locks::KeyedLocks;
use crate::store::{CommitReceipt, Pagination, Store, WriteBatch};

/// Store, ledger, policy, locks and pluggable collaborators.
///
/// Cheap to clone; clones share locks and collaborators.
#[derive(Clone)]
pub struct ServiceContext<S> {
    pub(crate) store: S,
    pub(crate) ledger: AuditLedger<S>,
    pub(crate) policy: PermissionPolicy,
    pub(crate) account_locks: KeyedLocks<AccountId>,
    pub(crate) request_locks: KeyedLocks<ResetRequestId>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) hasher: Arc<dyn CredentialHasher>,
    pub(crate) generator: Arc<dyn SecretGenerator>,
    pub(crate) delivery: Arc<dyn CredentialDelivery>,
}

impl<S: Clone> ServiceContext<S> {
    pub fn builder(store: S) -> ServiceContextBuilder<S> {
        ServiceContextBuilder {
            store,
            clock: Arc::new(SystemClock),
            hasher: Arc::new(Argon2Hasher::new()),
            generator: Arc::new(RandomSecretGenerator::default()),
            delivery: Arc::new(InMemoryDelivery::new()),
            page_limit: Pagination::DEFAULT_LIMIT,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &AuditLedger<S> {
        &self.ledger
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl<S: Store> ServiceContext<S> {
    /// Record a FAILED entry and return `err`.
    ///
    /// If the entry itself cannot be written the storage failure is returned
    /// instead: a rejection without its audit row is not reported as handled.
    pub(crate) async fn reject<T>(&self, entry: ActionAuditEntry, err: ServiceError) -> ServiceResult<T> {
        warn!(
            action = %entry.action_type,
            actor = %entry.actor_email,
            reason = entry.action_reason.as_deref().unwrap_or_default(),
            "privileged action rejected"
        );
        match self.ledger.record_action(entry).await {
            Ok(_) => Err(err),
            Err(store_err) => {
                error!(error = %store_err, "failed to record rejection audit");
                Err(ServiceError::Storage(store_err))
            }
        }
    }

    /// Commit `batch`; on failure record `failed` (with the storage code as
    /// reason) in a separate append and return the storage error.
    pub(crate) async fn commit(&self, batch: WriteBatch, failed: ActionAuditEntry) -> ServiceResult<CommitReceipt> {
        match self.store.commit(batch).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                error!(error = %err, action = %failed.action_type, "commit failed, nothing applied");
                if let Err(audit_err) = self.ledger.record_action(failed.reason(err.code())).await {
                    error!(error = %audit_err, "failed to record storage failure audit");
                }
                Err(ServiceError::Storage(err))
            }
        }
    }
}

pub struct ServiceContextBuilder<S> {
    store: S,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn CredentialHasher>,
    generator: Arc<dyn SecretGenerator>,
    delivery: Arc<dyn CredentialDelivery>,
    page_limit: u32,
}

impl<S: Clone> ServiceContextBuilder<S> {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn CredentialHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn SecretGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn delivery(mut self, delivery: Arc<dyn CredentialDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn audit_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn build(self) -> ServiceContext<S> {
        ServiceContext {
            ledger: AuditLedger::new(self.store.clone()).with_page_limit(self.page_limit),
            store: self.store,
            policy: PermissionPolicy::new(),
            account_locks: KeyedLocks::new(),
            request_locks: KeyedLocks::new(),
            clock: self.clock,
            hasher: self.hasher,
            generator: self.generator,
            delivery: self.delivery,
        }
    }
}
