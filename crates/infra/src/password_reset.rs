//! Two-step password reset: REQUESTED → ACCEPTED → PASSWORD_SENT.
//!
//! Accept generates the credential and holds its hash on the request; send
//! applies that hash to the live account. Plaintext only ever travels to the
//! [`CredentialDelivery`](crate::delivery::CredentialDelivery) channel, after
//! the state change is committed. Send is refused while the channel holds no
//! staged plaintext, so the live password is only replaced when the new one
//! can still reach its holder.
//!
//! Callers get [`ResetRequestSummary`] values; the held hash stays inside.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use rolegate_auth::{
    audit::failure, ActionAuditEntry, ActionType, ActorContext, Decision, Email, PasswordResetRequest,
    ResetRequestSummary,
};
use rolegate_core::{ExpectedVersion, ResetRequestId};

use crate::context::ServiceContext;
use crate::delivery::{Completed, DeliveryError};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{Store, WriteBatch};

#[derive(Clone)]
pub struct PasswordResetWorkflow<S> {
    ctx: ServiceContext<S>,
}

impl<S> PasswordResetWorkflow<S>
where
    S: Store + Clone,
{
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    /// Raise a reset request for the account holding `email`.
    ///
    /// Unauthenticated, so nothing goes to the action audit. While the
    /// account already has an open request, that request is returned.
    #[instrument(skip_all, err)]
    pub async fn submit(&self, email: &str) -> ServiceResult<ResetRequestSummary> {
        let email = Email::parse(email)?;
        let Some(account) = self.ctx.store.account_by_email(&email).await? else {
            return Err(ServiceError::NotFound("account"));
        };

        let _guard = self.ctx.account_locks.lock(account.id).await;
        let open = self
            .ctx
            .store
            .reset_requests_of(account.id)
            .await?
            .into_iter()
            .find(|r| !r.status.is_terminal());
        if let Some(open) = open {
            info!(request_id = %open.id, status = %open.status, "reset already open");
            return Ok(open.summary());
        }

        let request = PasswordResetRequest::submit(account.id, account.email, self.ctx.now());
        let mut batch = WriteBatch::new();
        batch.put_reset_request(request.clone(), ExpectedVersion::New);
        self.ctx.store.commit(batch).await?;

        info!(request_id = %request.id, "reset requested");
        Ok(request.summary())
    }

    pub async fn get(&self, id: ResetRequestId) -> ServiceResult<Option<ResetRequestSummary>> {
        Ok(self.ctx.store.reset_request(id).await?.map(|r| r.summary()))
    }

    /// The reset queue, latest first. SUPPORT, ADMIN and SUPER_ADMIN only.
    #[instrument(skip_all, fields(actor = %actor.email()), err)]
    pub async fn list_requests(&self, actor: &ActorContext) -> ServiceResult<Vec<ResetRequestSummary>> {
        self.ctx.policy.authorize_reset_queue(actor).into_result().map_err(ServiceError::Denied)?;
        Ok(self
            .ctx
            .store
            .reset_requests()
            .await?
            .iter()
            .map(PasswordResetRequest::summary)
            .collect())
    }

    /// Load the request, or audit the miss and fail.
    async fn load(&self, actor: &ActorContext, id: ResetRequestId) -> ServiceResult<PasswordResetRequest> {
        match self.ctx.store.reset_request(id).await? {
            Some(request) => Ok(request),
            None => {
                let entry = ActionAuditEntry::failure(
                    actor,
                    ActionType::PasswordReset,
                    failure::REQUEST_NOT_FOUND,
                    self.ctx.now(),
                );
                self.ctx.reject(entry, ServiceError::NotFound("reset request")).await
            }
        }
    }

    /// Policy gate for both steps.
    async fn check_step(
        &self,
        actor: &ActorContext,
        request: &PasswordResetRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        if let Decision::Deny(code) = self.ctx.policy.authorize_reset_step(actor, &request.user_email) {
            let entry = ActionAuditEntry::denied(actor, ActionType::PasswordReset, code, now)
                .target(&request.user_email, request.account_id);
            return self.ctx.reject(entry, ServiceError::Denied(code)).await;
        }
        Ok(())
    }

    async fn invalid_transition<T>(
        &self,
        actor: &ActorContext,
        request: &PasswordResetRequest,
        err: ServiceError,
        now: DateTime<Utc>,
    ) -> ServiceResult<T> {
        // Recorded as "INVALID_STATE_TRANSITION: <from> -> <to>".
        let entry = ActionAuditEntry::failure(actor, ActionType::PasswordReset, err.to_string(), now)
            .target(&request.user_email, request.account_id);
        self.ctx.reject(entry, err).await
    }

    /// REQUESTED → ACCEPTED: generate a credential and hold its hash.
    ///
    /// The plaintext is staged with the delivery channel after commit; a
    /// delivery failure is reported as a warning, the acceptance stands.
    #[instrument(skip_all, fields(actor = %actor.email(), request = %request_id), err)]
    pub async fn accept(
        &self,
        actor: &ActorContext,
        request_id: ResetRequestId,
    ) -> ServiceResult<Completed<ResetRequestSummary>> {
        let _guard = self.ctx.request_locks.lock(request_id).await;
        let action = ActionType::PasswordReset;
        let request = self.load(actor, request_id).await?;
        let now = self.ctx.now();

        self.check_step(actor, &request, now).await?;
        if let Err(err) = request.check_accept() {
            return self.invalid_transition(actor, &request, err.into(), now).await;
        }

        let secret = self.ctx.generator.generate();
        let credential = match self.ctx.hasher.hash(&secret) {
            Ok(hash) => hash,
            Err(err) => {
                let entry = ActionAuditEntry::failure(actor, action, failure::CREDENTIAL_ERROR, now)
                    .target(&request.user_email, request.account_id);
                return self.ctx.reject(entry, err.into()).await;
            }
        };
        let accepted = request.accept(actor.email().clone(), credential, now)?;

        let entry = ActionAuditEntry::success(actor, action, now)
            .target(&request.user_email, request.account_id)
            .states(Some(request.snapshot()), Some(accepted.snapshot()));
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&request.user_email, request.account_id);

        let mut batch = WriteBatch::new();
        batch.put_reset_request(accepted.clone(), ExpectedVersion::Exact(request.version));
        self.ctx.ledger.stage_action(&mut batch, entry);
        self.ctx.commit(batch, failed).await?;
        info!("reset accepted");

        let warning = self
            .ctx
            .delivery
            .stage(accepted.id, &accepted.user_email, secret)
            .await
            .err();
        if let Some(err) = &warning {
            warn!(error = %err, "credential not staged for delivery");
        }
        Ok(Completed::with_warning(accepted.summary(), warning))
    }

    /// ACCEPTED → PASSWORD_SENT: apply the held hash to the account.
    ///
    /// This is the only place a live password is replaced. It is refused with
    /// [`ServiceError::Delivery`] and a FAILED entry, leaving the request
    /// ACCEPTED, when the channel no longer holds the staged plaintext. The
    /// channel is told to release it after commit.
    #[instrument(skip_all, fields(actor = %actor.email(), request = %request_id), err)]
    pub async fn send_password(
        &self,
        actor: &ActorContext,
        request_id: ResetRequestId,
    ) -> ServiceResult<Completed<ResetRequestSummary>> {
        let _request_guard = self.ctx.request_locks.lock(request_id).await;
        let action = ActionType::PasswordReset;
        let found = self.load(actor, request_id).await?;

        let _account_guard = self.ctx.account_locks.lock(found.account_id).await;
        // Re-read under the account lock; deleting the account removes its requests.
        let (Some(request), Some(account)) = (
            self.ctx.store.reset_request(request_id).await?,
            self.ctx.store.account(found.account_id).await?,
        ) else {
            let entry = ActionAuditEntry::failure(actor, action, failure::REQUEST_NOT_FOUND, self.ctx.now())
                .target_id(found.account_id);
            return self.ctx.reject(entry, ServiceError::NotFound("reset request")).await;
        };
        let now = self.ctx.now();

        self.check_step(actor, &request, now).await?;
        let (sent, credential) = match request.mark_sent(now) {
            Ok(next) => next,
            Err(err) => return self.invalid_transition(actor, &request, err.into(), now).await,
        };

        let undeliverable = match self.ctx.delivery.is_staged(request.id).await {
            Ok(true) => None,
            Ok(false) => Some(DeliveryError::NotStaged(request.id)),
            Err(err) => Some(err),
        };
        if let Some(err) = undeliverable {
            warn!(error = %err, "staged credential missing, live password kept");
            let entry = ActionAuditEntry::failure(actor, action, failure::CREDENTIAL_NOT_STAGED, now)
                .target(&request.user_email, request.account_id);
            return self.ctx.reject(entry, err.into()).await;
        }

        let mut updated = account.clone();
        updated.password_hash = credential;
        updated.version += 1;

        let entry = ActionAuditEntry::success(actor, action, now)
            .target(&request.user_email, request.account_id)
            .states(Some(request.snapshot()), Some(sent.snapshot()));
        let failed = ActionAuditEntry::failure(actor, action, "", now).target(&request.user_email, request.account_id);

        let mut batch = WriteBatch::new();
        batch.put_reset_request(sent.clone(), ExpectedVersion::Exact(request.version));
        batch.put_account(updated, ExpectedVersion::Exact(account.version));
        self.ctx.ledger.stage_action(&mut batch, entry);
        self.ctx.commit(batch, failed).await?;
        info!("reset credential applied");

        let warning = self.ctx.delivery.release(sent.id).await.err();
        if let Some(err) = &warning {
            warn!(error = %err, "credential not released");
        }
        Ok(Completed::with_warning(sent.summary(), warning))
    }
}
