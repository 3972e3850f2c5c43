//! Account directory: registration, password change and policy-gated
//! role/status/delete.
//!
//! Every privileged call writes exactly one action-audit entry: SUCCESS in
//! the same batch as the mutation, or FAILED (denied, unknown target, storage
//! failure) on its own. Password changes go to the login audit instead.

use tracing::{info, instrument, warn};

use rolegate_auth::{
    audit::failure, AccountSummary, ActionAuditEntry, ActionType, ActorContext, AuthAccount, Decision,
    Email, LoginReason, ReasonCode, Role, Secret,
};
use rolegate_core::{AccountId, ExpectedVersion};

use crate::context::ServiceContext;
use crate::error::{ServiceError, ServiceResult};
use crate::login_events::LoginEvent;
use crate::store::{Store, StoreError, WriteBatch};

#[derive(Clone)]
pub struct AccountDirectory<S> {
    ctx: ServiceContext<S>,
}

impl<S> AccountDirectory<S>
where
    S: Store + Clone,
{
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration and lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Self-service registration. New accounts are always USER, active, and
    /// without a profile.
    #[instrument(skip_all, err)]
    pub async fn register(&self, email: &str, secret: &Secret) -> ServiceResult<AccountSummary> {
        let account = self.create(email, secret, Role::User).await?;
        info!(account_id = %account.id, "account registered");
        Ok(account.summary())
    }

    /// Create an account with an explicit role, bypassing the policy.
    ///
    /// For seeding the first administrators from deployment tooling; never
    /// reachable from an actor request.
    #[instrument(skip_all, fields(role = %role), err)]
    pub async fn provision(&self, email: &str, secret: &Secret, role: Role) -> ServiceResult<AccountSummary> {
        let account = self.create(email, secret, role).await?;
        info!(account_id = %account.id, role = %role, "account provisioned");
        Ok(account.summary())
    }

    async fn create(&self, email: &str, secret: &Secret, role: Role) -> ServiceResult<AuthAccount> {
        let email = Email::parse(email)?;
        if secret.is_blank() {
            return Err(ServiceError::Validation("password must not be blank".to_string()));
        }
        if self.ctx.store.account_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict("email already registered".to_string()));
        }

        let password_hash = self.ctx.hasher.hash(secret)?;
        let mut account = AuthAccount::register(email, password_hash, self.ctx.now());
        account.role = role;

        let mut batch = WriteBatch::new();
        batch.put_account(account.clone(), ExpectedVersion::New);
        match self.ctx.store.commit(batch).await {
            Ok(_) => Ok(account),
            // Lost a race against a concurrent registration of the same email.
            Err(StoreError::Conflict(_)) => Err(ServiceError::Conflict("email already registered".to_string())),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find(&self, id: AccountId) -> ServiceResult<Option<AccountSummary>> {
        Ok(self.ctx.store.account(id).await?.map(|a| a.summary()))
    }

    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Option<AccountSummary>> {
        let email = Email::parse(email)?;
        Ok(self.ctx.store.account_by_email(&email).await?.map(|a| a.summary()))
    }

    /// All accounts, oldest first. EDITOR, ADMIN and SUPER_ADMIN only.
    #[instrument(skip_all, fields(actor = %actor.email()), err)]
    pub async fn list_accounts(&self, actor: &ActorContext) -> ServiceResult<Vec<AccountSummary>> {
        self.ctx.policy.authorize_directory_listing(actor).into_result().map_err(ServiceError::Denied)?;
        Ok(self
            .ctx
            .store
            .accounts()
            .await?
            .iter()
            .map(AuthAccount::summary)
            .collect())
    }

    /// Change the actor's own password.
    ///
    /// `current` must verify against the stored hash and `new` must not. Each
    /// attempt on an existing account leaves one PASSWORD_CHANGED login entry;
    /// on success it commits in the same batch as the new hash.
    #[instrument(skip_all, fields(actor = %actor.email()), err)]
    pub async fn change_password(&self, actor: &ActorContext, current: &Secret, new: &Secret) -> ServiceResult<()> {
        if new.is_blank() {
            return Err(ServiceError::Validation("password must not be blank".to_string()));
        }
        let Some(found) = self.ctx.store.account_by_email(actor.email()).await? else {
            return Err(ServiceError::NotFound("account"));
        };

        let _guard = self.ctx.account_locks.lock(found.id).await;
        let Some(account) = self.ctx.store.account(found.id).await? else {
            return Err(ServiceError::NotFound("account"));
        };
        let now = self.ctx.now();

        let rejected = if !self.ctx.hasher.verify(current, &account.password_hash) {
            Some((LoginReason::InvalidCurrentPassword, "current password is incorrect"))
        } else if self.ctx.hasher.verify(new, &account.password_hash) {
            Some((LoginReason::SamePasswordReuse, "new password must differ from the current one"))
        } else {
            None
        };
        if let Some((reason, message)) = rejected {
            warn!(reason = reason.as_str(), "password change rejected");
            let event = LoginEvent::password_change(account.email.as_str(), account.role, reason);
            self.ctx.ledger.record_login(event.into_entry(now)).await?;
            return Err(ServiceError::Validation(message.to_string()));
        }

        let mut updated = account.clone();
        updated.password_hash = self.ctx.hasher.hash(new)?;
        updated.version += 1;

        let event =
            LoginEvent::password_change(account.email.as_str(), account.role, LoginReason::PasswordChangedSuccess);
        let mut batch = WriteBatch::new();
        batch.put_account(updated, ExpectedVersion::Exact(account.version));
        self.ctx.ledger.stage_login(&mut batch, event.into_entry(now));
        self.ctx.store.commit(batch).await?;

        info!("password changed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Privileged mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the target, or audit the miss and fail.
    async fn load_target(
        &self,
        actor: &ActorContext,
        action: ActionType,
        target_id: AccountId,
    ) -> ServiceResult<AuthAccount> {
        match self.ctx.store.account(target_id).await? {
            Some(account) => Ok(account),
            None => {
                let entry = ActionAuditEntry::failure(actor, action, failure::ACCOUNT_NOT_FOUND, self.ctx.now())
                    .target_id(target_id);
                self.ctx.reject(entry, ServiceError::NotFound("account")).await
            }
        }
    }

    async fn deny<T>(
        &self,
        actor: &ActorContext,
        action: ActionType,
        target: &AuthAccount,
        code: ReasonCode,
    ) -> ServiceResult<T> {
        let entry = ActionAuditEntry::denied(actor, action, code, self.ctx.now()).target(&target.email, target.id);
        self.ctx.reject(entry, ServiceError::Denied(code)).await
    }

    /// Change the role of `target_id` to `new_role`.
    #[instrument(skip_all, fields(actor = %actor.email(), target = %target_id, new_role = %new_role), err)]
    pub async fn change_role(
        &self,
        actor: &ActorContext,
        target_id: AccountId,
        new_role: Role,
    ) -> ServiceResult<AccountSummary> {
        let _guard = self.ctx.account_locks.lock(target_id).await;
        let action = ActionType::RoleChange;
        let target = self.load_target(actor, action, target_id).await?;

        if let Decision::Deny(code) = self.ctx.policy.authorize_role_change(actor, &target, new_role) {
            return self.deny(actor, action, &target, code).await;
        }

        let mut updated = target.clone();
        updated.role = new_role;
        updated.version += 1;

        let now = self.ctx.now();
        let entry = ActionAuditEntry::success(actor, action, now)
            .target(&target.email, target.id)
            .states(Some(target.snapshot()), Some(updated.snapshot()));
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&target.email, target.id);

        let mut batch = WriteBatch::new();
        batch.put_account(updated.clone(), ExpectedVersion::Exact(target.version));
        self.ctx.ledger.stage_action(&mut batch, entry);
        self.ctx.commit(batch, failed).await?;

        info!(from = %target.role, to = %new_role, "role changed");
        Ok(updated.summary())
    }

    /// Activate or deactivate `target_id`.
    ///
    /// Requesting the state the account already has succeeds, is audited, and
    /// leaves the record (and its version) untouched.
    #[instrument(skip_all, fields(actor = %actor.email(), target = %target_id, active), err)]
    pub async fn change_status(
        &self,
        actor: &ActorContext,
        target_id: AccountId,
        active: bool,
    ) -> ServiceResult<AccountSummary> {
        let _guard = self.ctx.account_locks.lock(target_id).await;
        let action = ActionType::for_status(active);
        let target = self.load_target(actor, action, target_id).await?;

        if let Decision::Deny(code) = self.ctx.policy.authorize_status_change(actor, &target) {
            return self.deny(actor, action, &target, code).await;
        }

        let now = self.ctx.now();
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&target.email, target.id);
        let mut batch = WriteBatch::new();

        let updated = if target.active == active {
            let entry = ActionAuditEntry::success(actor, action, now)
                .target(&target.email, target.id)
                .states(Some(target.snapshot()), Some(target.snapshot()))
                .reason("NO_CHANGE");
            self.ctx.ledger.stage_action(&mut batch, entry);
            target
        } else {
            let mut updated = target.clone();
            updated.active = active;
            updated.version += 1;
            let entry = ActionAuditEntry::success(actor, action, now)
                .target(&target.email, target.id)
                .states(Some(target.snapshot()), Some(updated.snapshot()));
            batch.put_account(updated.clone(), ExpectedVersion::Exact(target.version));
            self.ctx.ledger.stage_action(&mut batch, entry);
            updated
        };

        self.ctx.commit(batch, failed).await?;
        info!(active, "account status set");
        Ok(updated.summary())
    }

    /// Delete `target_id` together with its profile and reset requests.
    ///
    /// Audit rows are untouched; they hold captured emails and roles.
    #[instrument(skip_all, fields(actor = %actor.email(), target = %target_id), err)]
    pub async fn delete_account(&self, actor: &ActorContext, target_id: AccountId) -> ServiceResult<()> {
        let _guard = self.ctx.account_locks.lock(target_id).await;
        let action = ActionType::UserDelete;
        let target = self.load_target(actor, action, target_id).await?;

        if let Decision::Deny(code) = self.ctx.policy.authorize_delete(actor, &target) {
            return self.deny(actor, action, &target, code).await;
        }

        let mut batch = WriteBatch::new();
        if let Some(profile) = self.ctx.store.profile_of(target.id).await? {
            batch.delete_profile(profile.id, ExpectedVersion::Exact(profile.version));
        }
        for request in self.ctx.store.reset_requests_of(target.id).await? {
            batch.delete_reset_request(request.id, ExpectedVersion::Exact(request.version));
        }
        batch.delete_account(target.id, ExpectedVersion::Exact(target.version));

        let now = self.ctx.now();
        let entry = ActionAuditEntry::success(actor, action, now)
            .target(&target.email, target.id)
            .states(Some(target.snapshot()), None);
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&target.email, target.id);
        self.ctx.ledger.stage_action(&mut batch, entry);
        self.ctx.commit(batch, failed).await?;

        info!(role = %target.role, "account deleted");
        Ok(())
    }
}
