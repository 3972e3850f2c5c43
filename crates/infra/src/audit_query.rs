//! Role-scoped read access to the audit ledger.
//!
//! | View | Roles | Snapshots |
//! |------|-------|-----------|
//! | own logins | everyone | n/a |
//! | logins | SUPPORT, ADMIN, SUPER_ADMIN | n/a |
//! | password resets | ADMIN, SUPER_ADMIN | SUPER_ADMIN only |
//! | all actions | SUPER_ADMIN | yes |
//!
//! Reads are not audited.

use tracing::{instrument, warn};

use rolegate_auth::{
    ActionAuditEntry, ActionType, ActorContext, AuditFilter, AuditView, LoginAuditEntry, Role,
};

use crate::context::ServiceContext;
use crate::error::{ServiceError, ServiceResult};
use crate::store::Store;

#[derive(Clone)]
pub struct AuditQueryService<S> {
    ctx: ServiceContext<S>,
}

impl<S> AuditQueryService<S>
where
    S: Store + Clone,
{
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    fn authorize(&self, actor: &ActorContext, view: AuditView) -> ServiceResult<()> {
        self.ctx.policy.authorize_audit_view(actor, view).into_result().map_err(|code| {
            warn!(actor = %actor.email(), ?view, "audit view denied");
            ServiceError::Denied(code)
        })
    }

    /// The actor's own login history; any `email` criterion is replaced.
    pub async fn own_logins(&self, actor: &ActorContext, filter: AuditFilter) -> ServiceResult<Vec<LoginAuditEntry>> {
        self.authorize(actor, AuditView::OwnLogins)?;
        let filter = filter.email(actor.email().as_str());
        Ok(self.ctx.ledger.query_logins(&filter).await?)
    }

    #[instrument(skip_all, fields(actor = %actor.email()), err)]
    pub async fn logins(&self, actor: &ActorContext, filter: AuditFilter) -> ServiceResult<Vec<LoginAuditEntry>> {
        self.authorize(actor, AuditView::Logins)?;
        Ok(self.ctx.ledger.query_logins(&filter).await?)
    }

    /// PASSWORD_RESET entries only, whatever `action_type` the filter names.
    #[instrument(skip_all, fields(actor = %actor.email()), err)]
    pub async fn password_resets(
        &self,
        actor: &ActorContext,
        filter: AuditFilter,
    ) -> ServiceResult<Vec<ActionAuditEntry>> {
        self.authorize(actor, AuditView::PasswordResets)?;
        let filter = filter.action_type(ActionType::PasswordReset);
        let entries = self.ctx.ledger.query_actions(&filter).await?;
        Ok(if actor.role() == Role::SuperAdmin {
            entries
        } else {
            entries.iter().map(ActionAuditEntry::redacted).collect()
        })
    }

    #[instrument(skip_all, fields(actor = %actor.email()), err)]
    pub async fn actions(&self, actor: &ActorContext, filter: AuditFilter) -> ServiceResult<Vec<ActionAuditEntry>> {
        self.authorize(actor, AuditView::Actions)?;
        Ok(self.ctx.ledger.query_actions(&filter).await?)
    }
}
