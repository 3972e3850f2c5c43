use std::collections::HashMap;
use std::sync::RwLock;

use rolegate_auth::{
    ActionAuditEntry, AuditFilter, AuthAccount, Email, LoginAuditEntry, PasswordResetRequest,
    UserProfile,
};
use rolegate_core::{AccountId, ExpectedVersion, ProfileId, ResetRequestId, Versioned};

use super::{CommitReceipt, Pagination, Store, StoreError, WriteBatch, WriteOp};

#[derive(Debug, Clone, Default)]
struct Records {
    accounts: HashMap<AccountId, AuthAccount>,
    profiles: HashMap<ProfileId, UserProfile>,
    resets: HashMap<ResetRequestId, PasswordResetRequest>,
}

#[derive(Debug, Default)]
struct State {
    records: Records,
    actions: Vec<ActionAuditEntry>,
    logins: Vec<LoginAuditEntry>,
}

/// In-memory store.
///
/// Intended for tests/dev. Not optimized for performance: a commit works on a
/// copy of the mutable records and swaps it in once every check has passed.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

fn check_version<T: Versioned>(
    kind: &str,
    expected: ExpectedVersion,
    current: Option<&T>,
) -> Result<(), StoreError> {
    let current = current.map(Versioned::version);
    if expected.matches(current) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{kind}: expected {expected:?}, found {current:?}"
        )))
    }
}

/// Latest first; equal timestamps keep later inserts first.
fn page<T: Clone>(
    mut rows: Vec<&T>,
    key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, u64),
    page: Pagination,
) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows.into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn account(&self, id: AccountId) -> Result<Option<AuthAccount>, StoreError> {
        Ok(self.read()?.records.accounts.get(&id).cloned())
    }

    async fn account_by_email(&self, email: &Email) -> Result<Option<AuthAccount>, StoreError> {
        Ok(self
            .read()?
            .records
            .accounts
            .values()
            .find(|a| &a.email == email)
            .cloned())
    }

    async fn accounts(&self) -> Result<Vec<AuthAccount>, StoreError> {
        let mut accounts: Vec<AuthAccount> = self.read()?.records.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn profile(&self, id: ProfileId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.read()?.records.profiles.get(&id).cloned())
    }

    async fn profile_of(&self, account_id: AccountId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .read()?
            .records
            .profiles
            .values()
            .find(|p| p.account_id == account_id)
            .cloned())
    }

    async fn profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let mut profiles: Vec<UserProfile> = self.read()?.records.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(profiles)
    }

    async fn reset_request(&self, id: ResetRequestId) -> Result<Option<PasswordResetRequest>, StoreError> {
        Ok(self.read()?.records.resets.get(&id).cloned())
    }

    async fn reset_requests_of(&self, account_id: AccountId) -> Result<Vec<PasswordResetRequest>, StoreError> {
        let mut requests: Vec<PasswordResetRequest> = self
            .read()?
            .records
            .resets
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| (b.requested_at, b.id).cmp(&(a.requested_at, a.id)));
        Ok(requests)
    }

    async fn reset_requests(&self) -> Result<Vec<PasswordResetRequest>, StoreError> {
        let mut requests: Vec<PasswordResetRequest> =
            self.read()?.records.resets.values().cloned().collect();
        requests.sort_by(|a, b| (b.requested_at, b.id).cmp(&(a.requested_at, a.id)));
        Ok(requests)
    }

    async fn query_actions(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Vec<ActionAuditEntry>, StoreError> {
        let state = self.read()?;
        let rows = state.actions.iter().filter(|e| filter.matches_action(e)).collect();
        Ok(page(rows, |e| (e.performed_at, e.sequence), pagination))
    }

    async fn query_logins(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Vec<LoginAuditEntry>, StoreError> {
        let state = self.read()?;
        let rows = state.logins.iter().filter(|e| filter.matches_login(e)).collect();
        Ok(page(rows, |e| (e.event_time, e.sequence), pagination))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        if batch.is_empty() {
            return Ok(CommitReceipt::default());
        }

        let mut state = self.write()?;
        let mutates = batch.mutates_records();
        let mut records = if mutates {
            state.records.clone()
        } else {
            Records::default()
        };
        let mut actions = Vec::new();
        let mut logins = Vec::new();

        for op in batch.into_ops() {
            match op {
                WriteOp::PutAccount { account, expected } => {
                    check_version("account", expected, records.accounts.get(&account.id))?;
                    let duplicate = records
                        .accounts
                        .values()
                        .any(|a| a.id != account.id && a.email == account.email);
                    if duplicate {
                        return Err(StoreError::Conflict(format!(
                            "account email {} already exists",
                            account.email
                        )));
                    }
                    records.accounts.insert(account.id, account);
                }
                WriteOp::DeleteAccount { id, expected } => {
                    check_version("account", expected, records.accounts.get(&id))?;
                    records.accounts.remove(&id);
                }
                WriteOp::PutProfile { profile, expected } => {
                    check_version("profile", expected, records.profiles.get(&profile.id))?;
                    let duplicate = records
                        .profiles
                        .values()
                        .any(|p| p.id != profile.id && p.account_id == profile.account_id);
                    if duplicate {
                        return Err(StoreError::Conflict(format!(
                            "account {} already has a profile",
                            profile.account_id
                        )));
                    }
                    records.profiles.insert(profile.id, profile);
                }
                WriteOp::DeleteProfile { id, expected } => {
                    check_version("profile", expected, records.profiles.get(&id))?;
                    records.profiles.remove(&id);
                }
                WriteOp::PutResetRequest { request, expected } => {
                    check_version("reset request", expected, records.resets.get(&request.id))?;
                    records.resets.insert(request.id, request);
                }
                WriteOp::DeleteResetRequest { id, expected } => {
                    check_version("reset request", expected, records.resets.get(&id))?;
                    records.resets.remove(&id);
                }
                WriteOp::AppendAction(entry) => actions.push(entry),
                WriteOp::AppendLogin(entry) => logins.push(entry),
            }
        }

        // Every check passed; publish the whole batch.
        if mutates {
            state.records = records;
        }

        let mut receipt = CommitReceipt::default();

        let mut next = state.actions.len() as u64 + 1;
        for mut entry in actions {
            entry.sequence = next;
            receipt.action_sequences.push(next);
            state.actions.push(entry);
            next += 1;
        }

        let mut next = state.logins.len() as u64 + 1;
        for mut entry in logins {
            entry.sequence = next;
            receipt.login_sequences.push(next);
            state.logins.push(entry);
            next += 1;
        }

        Ok(receipt)
    }
}
