//! Profile create/update/list, gated by the profile-edit rule.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use rolegate_auth::{
    audit::failure, ActionAuditEntry, ActionType, ActorContext, AuthAccount, Decision, ProfileDetails,
    ProfileListing, Role, UserProfile,
};
use rolegate_core::{AccountId, ExpectedVersion, ProfileId};

use crate::context::ServiceContext;
use crate::error::{ServiceError, ServiceResult};
use crate::store::{Store, WriteBatch};

#[derive(Clone)]
pub struct ProfileService<S> {
    ctx: ServiceContext<S>,
}

impl<S> ProfileService<S>
where
    S: Store + Clone,
{
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, id: ProfileId) -> ServiceResult<Option<UserProfile>> {
        Ok(self.ctx.store.profile(id).await?)
    }

    /// Create the profile of `account_id`.
    ///
    /// An account has at most one profile; a second create fails with
    /// `Conflict` and is audited.
    #[instrument(skip_all, fields(actor = %actor.email(), account = %account_id), err)]
    pub async fn create_profile(
        &self,
        actor: &ActorContext,
        account_id: AccountId,
        details: ProfileDetails,
    ) -> ServiceResult<UserProfile> {
        let _guard = self.ctx.account_locks.lock(account_id).await;
        let action = ActionType::ProfileCreate;
        let now = self.ctx.now();

        let Some(account) = self.ctx.store.account(account_id).await? else {
            let entry = ActionAuditEntry::failure(actor, action, failure::ACCOUNT_NOT_FOUND, now).target_id(account_id);
            return self.ctx.reject(entry, ServiceError::NotFound("account")).await;
        };
        self.check_edit(actor, action, &account, now).await?;

        if account.profile_created || self.ctx.store.profile_of(account.id).await?.is_some() {
            let entry = ActionAuditEntry::failure(actor, action, failure::PROFILE_ALREADY_EXISTS, now)
                .target(&account.email, account.id);
            return self
                .ctx
                .reject(entry, ServiceError::Conflict("profile already exists".to_string()))
                .await;
        }
        self.check_details(actor, action, &account, &details, now).await?;

        let profile = UserProfile::create(account.id, account.email.clone(), details, now);
        let mut linked = account.clone();
        linked.profile_created = true;
        linked.profile_id = Some(profile.id);
        linked.version += 1;

        let entry = ActionAuditEntry::success(actor, action, now)
            .target(&account.email, account.id)
            .states(None, Some(profile.snapshot()));
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&account.email, account.id);

        let mut batch = WriteBatch::new();
        batch.put_profile(profile.clone(), ExpectedVersion::New);
        batch.put_account(linked, ExpectedVersion::Exact(account.version));
        self.ctx.ledger.stage_action(&mut batch, entry);
        self.ctx.commit(batch, failed).await?;

        info!(profile_id = %profile.id, "profile created");
        Ok(profile)
    }

    /// Replace the editable fields of `profile_id`. The email stays the
    /// account's.
    #[instrument(skip_all, fields(actor = %actor.email(), profile = %profile_id), err)]
    pub async fn update_profile(
        &self,
        actor: &ActorContext,
        profile_id: ProfileId,
        details: ProfileDetails,
    ) -> ServiceResult<UserProfile> {
        let action = ActionType::ProfileUpdate;
        let Some(found) = self.ctx.store.profile(profile_id).await? else {
            let entry = ActionAuditEntry::failure(actor, action, failure::PROFILE_NOT_FOUND, self.ctx.now());
            return self.ctx.reject(entry, ServiceError::NotFound("profile")).await;
        };

        let _guard = self.ctx.account_locks.lock(found.account_id).await;
        let now = self.ctx.now();
        // Re-read under the lock; a concurrent delete may have removed both.
        let (Some(current), Some(account)) = (
            self.ctx.store.profile(profile_id).await?,
            self.ctx.store.account(found.account_id).await?,
        ) else {
            let entry = ActionAuditEntry::failure(actor, action, failure::PROFILE_NOT_FOUND, now)
                .target_id(found.account_id);
            return self.ctx.reject(entry, ServiceError::NotFound("profile")).await;
        };

        self.check_edit(actor, action, &account, now).await?;
        self.check_details(actor, action, &account, &details, now).await?;

        let mut updated = current.clone();
        updated.details = details;
        updated.version += 1;
        updated.updated_at = now;

        let entry = ActionAuditEntry::success(actor, action, now)
            .target(&account.email, account.id)
            .states(Some(current.snapshot()), Some(updated.snapshot()));
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&account.email, account.id);

        let mut batch = WriteBatch::new();
        batch.put_profile(updated.clone(), ExpectedVersion::Exact(current.version));
        self.ctx.ledger.stage_action(&mut batch, entry);
        self.ctx.commit(batch, failed).await?;

        info!("profile updated");
        Ok(updated)
    }

    /// Every profile, ordered by email, in the view the actor's role gets.
    pub async fn list_profiles(&self, actor: &ActorContext) -> ServiceResult<ProfileListing> {
        let profiles = self.ctx.store.profiles().await?;
        Ok(match actor.role() {
            Role::User => ProfileListing::Short {
                rows: profiles
                    .iter()
                    .zip(1u64..)
                    .map(|(profile, sno)| profile.short_view(sno))
                    .collect(),
            },
            _ => ProfileListing::Full { rows: profiles },
        })
    }

    async fn check_edit(
        &self,
        actor: &ActorContext,
        action: ActionType,
        account: &AuthAccount,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        if let Decision::Deny(code) = self.ctx.policy.authorize_profile_edit(actor, account) {
            let entry = ActionAuditEntry::denied(actor, action, code, now).target(&account.email, account.id);
            return self.ctx.reject(entry, ServiceError::Denied(code)).await;
        }
        Ok(())
    }

    async fn check_details(
        &self,
        actor: &ActorContext,
        action: ActionType,
        account: &AuthAccount,
        details: &ProfileDetails,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        if let Err(err) = details.validate() {
            let entry = ActionAuditEntry::failure(actor, action, failure::INVALID_INPUT, now)
                .target(&account.email, account.id);
            return self.ctx.reject(entry, err.into()).await;
        }
        Ok(())
    }
}
