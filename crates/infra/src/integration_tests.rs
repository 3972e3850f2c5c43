//! End-to-end scenarios over the services, the audit ledger and the
//! in-memory store.
//!
//! Verifies:
//! - Every privileged call leaves exactly one action-audit entry
//! - Denials and invalid transitions change nothing but the audit
//! - Storage failures leave neither the mutation nor a SUCCESS entry
//! - Per-target serialization of concurrent mutations

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use rolegate_auth::{
        audit::failure, ActionAuditEntry, ActionStatus, ActionType, ActorContext, AuditFilter, AuthAccount,
        CredentialError, CredentialHasher, Email, LoginAlertType, LoginAuditEntry, LoginReason, LoginType,
        PasswordHash, PasswordResetRequest, ProfileDetails, ProfileListing, ReasonCode, ResetStatus, Role,
        Secret, UserProfile,
    };
    use rolegate_core::{AccountId, Clock, ManualClock, ProfileId, ResetRequestId};

    use crate::credentials::{token_digest, Argon2Hasher};
    use crate::delivery::{DeliveryError, InMemoryDelivery};
    use crate::store::{CommitReceipt, InMemoryStore, Pagination, Store, StoreError, WriteBatch};
    use crate::{LoginEvent, Rolegate, ServiceContext, ServiceError};

    // ─────────────────────────────────────────────────────────────────────────
    // Fixtures
    // ─────────────────────────────────────────────────────────────────────────

    /// In-memory store whose record-mutating commits can be made to fail.
    /// Audit-only commits always go through.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        fail_mutations: AtomicBool,
    }

    impl FlakyStore {
        fn fail_mutations(&self, fail: bool) {
            self.fail_mutations.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Store for FlakyStore {
        async fn account(&self, id: AccountId) -> Result<Option<AuthAccount>, StoreError> {
            self.inner.account(id).await
        }

        async fn account_by_email(&self, email: &Email) -> Result<Option<AuthAccount>, StoreError> {
            self.inner.account_by_email(email).await
        }

        async fn accounts(&self) -> Result<Vec<AuthAccount>, StoreError> {
            self.inner.accounts().await
        }

        async fn profile(&self, id: ProfileId) -> Result<Option<UserProfile>, StoreError> {
            self.inner.profile(id).await
        }

        async fn profile_of(&self, account_id: AccountId) -> Result<Option<UserProfile>, StoreError> {
            self.inner.profile_of(account_id).await
        }

        async fn profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
            self.inner.profiles().await
        }

        async fn reset_request(&self, id: ResetRequestId) -> Result<Option<PasswordResetRequest>, StoreError> {
            self.inner.reset_request(id).await
        }

        async fn reset_requests_of(&self, account_id: AccountId) -> Result<Vec<PasswordResetRequest>, StoreError> {
            self.inner.reset_requests_of(account_id).await
        }

        async fn reset_requests(&self) -> Result<Vec<PasswordResetRequest>, StoreError> {
            self.inner.reset_requests().await
        }

        async fn query_actions(
            &self,
            filter: &AuditFilter,
            page: Pagination,
        ) -> Result<Vec<ActionAuditEntry>, StoreError> {
            self.inner.query_actions(filter, page).await
        }

        async fn query_logins(
            &self,
            filter: &AuditFilter,
            page: Pagination,
        ) -> Result<Vec<LoginAuditEntry>, StoreError> {
            self.inner.query_logins(filter, page).await
        }

        async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
            if batch.mutates_records() && self.fail_mutations.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
            self.inner.commit(batch).await
        }
    }

    /// Reversible stand-in for Argon2 so scenarios stay fast.
    struct PlainHasher;

    impl CredentialHasher for PlainHasher {
        fn hash(&self, secret: &Secret) -> Result<PasswordHash, CredentialError> {
            if secret.is_blank() {
                return Err(CredentialError::Blank);
            }
            Ok(PasswordHash::new(format!("plain:{}", secret.expose())))
        }

        fn verify(&self, secret: &Secret, hash: &PasswordHash) -> bool {
            hash.as_str() == format!("plain:{}", secret.expose())
        }
    }

    struct Harness {
        gate: Rolegate<Arc<FlakyStore>>,
        store: Arc<FlakyStore>,
        clock: Arc<ManualClock>,
        delivery: Arc<InMemoryDelivery>,
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn harness_with(hasher: Arc<dyn CredentialHasher>) -> Harness {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let delivery = Arc::new(InMemoryDelivery::new());
        let ctx = ServiceContext::builder(Arc::clone(&store))
            .clock(clock.clone())
            .hasher(hasher)
            .delivery(delivery.clone())
            .build();
        Harness {
            gate: Rolegate::new(ctx),
            store,
            clock,
            delivery,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(PlainHasher))
    }

    fn actor(email: &str, role: Role) -> ActorContext {
        ActorContext::new(Email::parse(email).unwrap(), role)
    }

    impl Harness {
        async fn account(&self, email: &str, role: Role) -> AccountId {
            self.gate
                .directory
                .provision(email, &Secret::new(format!("pw-{email}")), role)
                .await
                .unwrap()
                .id
        }

        async fn stored(&self, id: AccountId) -> Option<AuthAccount> {
            self.store.account(id).await.unwrap()
        }

        async fn actions(&self) -> Vec<ActionAuditEntry> {
            self.store
                .query_actions(&AuditFilter::default(), Pagination::default())
                .await
                .unwrap()
        }
    }

    fn details(name: &str, phone: &str) -> ProfileDetails {
        ProfileDetails {
            name: name.to_string(),
            phone: Some(phone.to_string()),
            ..ProfileDetails::default()
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Account directory
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn role_change_commits_with_one_success_entry() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        h.account("root@example.com", Role::SuperAdmin).await;
        let user = h.account("user@example.com", Role::User).await;

        let summary = h.gate.directory.change_role(&root, user, Role::Editor).await.unwrap();
        assert_eq!(summary.role, Role::Editor);
        assert_eq!(h.stored(user).await.unwrap().version, 1);

        let actions = h.actions().await;
        assert_eq!(actions.len(), 1);
        let entry = &actions[0];
        assert_eq!(entry.action_type, ActionType::RoleChange);
        assert_eq!(entry.action_status, ActionStatus::Success);
        assert_eq!(entry.actor_role, Role::SuperAdmin);
        assert_eq!(entry.target_user_email.as_ref().map(Email::as_str), Some("user@example.com"));
        assert_eq!(entry.before_state.as_ref().unwrap()["role"], "USER");
        assert_eq!(entry.after_state.as_ref().unwrap()["role"], "EDITOR");
    }

    #[tokio::test]
    async fn admin_cannot_assign_admin_role() {
        let h = harness();
        let admin = actor("admin@example.com", Role::Admin);
        let user = h.account("user@example.com", Role::User).await;

        let err = h.gate.directory.change_role(&admin, user, Role::Admin).await.unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::TargetRoleNotAssignable));
        assert_eq!(h.stored(user).await.unwrap().role, Role::User);

        let actions = h.actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_status, ActionStatus::Failed);
        assert_eq!(actions[0].action_reason.as_deref(), Some("TARGET_ROLE_NOT_ASSIGNABLE"));
        assert!(actions[0].after_state.is_none());
    }

    #[tokio::test]
    async fn admin_cannot_manage_other_admins() {
        let h = harness();
        let admin = actor("admin@example.com", Role::Admin);
        h.account("admin@example.com", Role::Admin).await;
        let other = h.account("other-admin@example.com", Role::Admin).await;

        let err = h.gate.directory.change_status(&admin, other, false).await.unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::RoleNotManageable));
        assert!(h.stored(other).await.unwrap().active);
        assert_eq!(h.actions().await.len(), 1);
    }

    #[tokio::test]
    async fn super_admin_cannot_delete_itself() {
        let h = harness();
        let root_id = h.account("root@example.com", Role::SuperAdmin).await;
        // Actor email casing does not matter.
        let root = actor("ROOT@example.com", Role::SuperAdmin);

        let err = h.gate.directory.delete_account(&root, root_id).await.unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::SelfModificationForbidden));
        assert!(h.stored(root_id).await.is_some());

        let actions = h.actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::UserDelete);
        assert_eq!(actions[0].action_reason.as_deref(), Some("SELF_MODIFICATION_FORBIDDEN"));
    }

    #[tokio::test]
    async fn unknown_target_is_audited_as_not_found() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        let missing = AccountId::new();

        let err = h.gate.directory.change_status(&root, missing, false).await.unwrap_err();
        assert_eq!(err, ServiceError::NotFound("account"));

        let actions = h.actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::AccountDeactivate);
        assert_eq!(actions[0].action_reason.as_deref(), Some(failure::ACCOUNT_NOT_FOUND));
        assert_eq!(actions[0].target_account_id, Some(missing));
    }

    #[tokio::test]
    async fn status_change_is_idempotent_but_audited() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        let user = h.account("user@example.com", Role::User).await;

        let first = h.gate.directory.change_status(&root, user, false).await.unwrap();
        let second = h.gate.directory.change_status(&root, user, false).await.unwrap();
        assert!(!first.active);
        assert_eq!(first, second);
        assert_eq!(h.stored(user).await.unwrap().version, 1);

        let actions = h.actions().await;
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|e| e.action_type == ActionType::AccountDeactivate));
        assert!(actions.iter().all(|e| e.action_status == ActionStatus::Success));
        assert_eq!(actions[0].action_reason.as_deref(), Some("NO_CHANGE"));
    }

    #[tokio::test]
    async fn registration_rejects_duplicates_case_insensitively() {
        let h = harness();
        let created = h
            .gate
            .directory
            .register("New.User@Example.com", &Secret::new("hunter22"))
            .await
            .unwrap();
        assert_eq!(created.role, Role::User);
        assert_eq!(created.email.as_str(), "new.user@example.com");

        let err = h
            .gate
            .directory
            .register("new.user@EXAMPLE.com", &Secret::new("other-pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err = h.gate.directory.register("no-at-sign", &Secret::new("x")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let err = h.gate.directory.register("a@b.com", &Secret::new("  ")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn directory_listing_is_role_gated() {
        let h = harness();
        h.account("user@example.com", Role::User).await;
        h.account("editor@example.com", Role::Editor).await;

        let listed = h
            .gate
            .directory
            .list_accounts(&actor("editor@example.com", Role::Editor))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        let err = h
            .gate
            .directory
            .list_accounts(&actor("support@example.com", Role::Support))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::AccountForbidden));
        assert!(h.actions().await.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_profile_and_requests_but_keeps_audit() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        let user_actor = actor("user@example.com", Role::User);
        let user = h.account("user@example.com", Role::User).await;

        h.gate
            .profiles
            .create_profile(&user_actor, user, details("Uma", "5550001111"))
            .await
            .unwrap();
        h.gate.resets.submit("user@example.com").await.unwrap();

        h.gate.directory.delete_account(&root, user).await.unwrap();
        assert!(h.stored(user).await.is_none());
        assert!(h.store.profile_of(user).await.unwrap().is_none());
        assert!(h.store.reset_requests_of(user).await.unwrap().is_empty());

        let history = h
            .store
            .query_actions(&AuditFilter::default().email("user@example.com"), Pagination::default())
            .await
            .unwrap();
        let kinds: Vec<ActionType> = history.iter().map(|e| e.action_type).collect();
        assert_eq!(kinds, vec![ActionType::UserDelete, ActionType::ProfileCreate]);
        assert_eq!(history[0].before_state.as_ref().unwrap()["email"], "user@example.com");
    }

    #[tokio::test]
    async fn password_change_records_every_outcome() {
        let h = harness();
        let user = h.account("user@example.com", Role::User).await;
        let me = actor("user@example.com", Role::User);
        let current = Secret::new("pw-user@example.com");

        let err = h
            .gate
            .directory
            .change_password(&me, &Secret::new("wrong-guess"), &Secret::new("fresh-pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = h.gate.directory.change_password(&me, &current, &current).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(h.stored(user).await.unwrap().version, 0);

        h.clock.advance(Duration::minutes(1));
        h.gate
            .directory
            .change_password(&me, &current, &Secret::new("fresh-pass"))
            .await
            .unwrap();
        let account = h.stored(user).await.unwrap();
        assert_eq!(account.version, 1);
        assert!(PlainHasher.verify(&Secret::new("fresh-pass"), &account.password_hash));

        let logins = h
            .store
            .query_logins(&AuditFilter::default(), Pagination::default())
            .await
            .unwrap();
        let outcomes: Vec<(LoginType, Option<LoginReason>, ActionStatus)> = logins
            .iter()
            .map(|e| (e.login_type, e.reason, e.display_status()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (LoginType::PasswordChanged, Some(LoginReason::PasswordChangedSuccess), ActionStatus::Success),
                (LoginType::PasswordChanged, Some(LoginReason::SamePasswordReuse), ActionStatus::Failed),
                (LoginType::PasswordChanged, Some(LoginReason::InvalidCurrentPassword), ActionStatus::Failed),
            ]
        );
        assert!(logins.iter().all(|e| e.email == "user@example.com" && e.role == Some(Role::User)));
        assert!(h.actions().await.is_empty());

        let err = h
            .gate
            .directory
            .change_password(&actor("ghost@example.com", Role::User), &current, &Secret::new("x1"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("account"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Password reset
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn support_resets_password_in_two_steps() {
        let hasher = Arc::new(Argon2Hasher::new());
        let h = harness_with(hasher.clone());
        let support = actor("support@example.com", Role::Support);
        h.account("support@example.com", Role::Support).await;
        let user = h.account("user@example.com", Role::User).await;
        let old_hash = h.stored(user).await.unwrap().password_hash;

        let request = h.gate.resets.submit("user@example.com").await.unwrap();
        assert_eq!(request.status, ResetStatus::Requested);

        let accepted = h.gate.resets.accept(&support, request.id).await.unwrap();
        assert!(accepted.warnings.is_empty());
        let accepted = accepted.into_value();
        assert_eq!(accepted.status, ResetStatus::Accepted);
        assert_eq!(accepted.approved_by, Some(support.email().clone()));
        assert_eq!(accepted.approved_at, Some(start()));
        assert_eq!(h.delivery.staged_count(), 1);
        // Accepting alone never touches the live password.
        assert_eq!(h.stored(user).await.unwrap().password_hash, old_hash);

        h.clock.advance(Duration::minutes(5));
        let sent = h.gate.resets.send_password(&support, request.id).await.unwrap();
        assert!(sent.warnings.is_empty());
        assert_eq!(sent.value.status, ResetStatus::PasswordSent);
        assert_eq!(sent.value.password_sent_at, Some(start() + Duration::minutes(5)));
        let held = h.store.reset_request(request.id).await.unwrap().unwrap();
        assert!(held.pending_credential.is_none());

        let released = h.delivery.released_to(&Email::parse("user@example.com").unwrap());
        assert_eq!(released.len(), 1);
        let account = h.stored(user).await.unwrap();
        assert!(hasher.verify(&released[0].secret, &account.password_hash));
        assert!(!hasher.verify(&Secret::new("pw-user@example.com"), &account.password_hash));

        let resets = h
            .store
            .query_actions(
                &AuditFilter::default().action_type(ActionType::PasswordReset),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(resets.len(), 2);
        assert!(resets.iter().all(|e| e.action_status == ActionStatus::Success));
        assert_eq!(resets[0].after_state.as_ref().unwrap()["status"], "PASSWORD_SENT");
        assert_eq!(resets[1].after_state.as_ref().unwrap()["status"], "ACCEPTED");
    }

    #[tokio::test]
    async fn sending_before_accept_is_an_invalid_transition() {
        let h = harness();
        let support = actor("support@example.com", Role::Support);
        h.account("user@example.com", Role::User).await;
        let request = h.gate.resets.submit("user@example.com").await.unwrap();

        let err = h.gate.resets.send_password(&support, request.id).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::InvalidStateTransition {
                from: ResetStatus::Requested,
                to: ResetStatus::PasswordSent,
            }
        );
        let stored = h.gate.resets.get(request.id).await.unwrap().unwrap();
        assert_eq!(stored, request);

        let actions = h.actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_status, ActionStatus::Failed);
        assert!(actions[0]
            .action_reason
            .as_deref()
            .unwrap()
            .starts_with(failure::INVALID_STATE_TRANSITION));
    }

    #[tokio::test]
    async fn re_accepting_leaves_the_request_untouched() {
        let h = harness();
        let support = actor("support@example.com", Role::Support);
        h.account("user@example.com", Role::User).await;
        let request = h.gate.resets.submit("user@example.com").await.unwrap();
        h.gate.resets.accept(&support, request.id).await.unwrap();
        let held = h.store.reset_request(request.id).await.unwrap().unwrap();

        h.clock.advance(Duration::minutes(1));
        let err = h.gate.resets.accept(&support, request.id).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::InvalidStateTransition {
                from: ResetStatus::Accepted,
                to: ResetStatus::Accepted,
            }
        );
        assert_eq!(h.store.reset_request(request.id).await.unwrap().unwrap(), held);
        assert_eq!(h.delivery.staged_count(), 1);

        let failed = h
            .store
            .query_actions(
                &AuditFilter::default()
                    .action_type(ActionType::PasswordReset)
                    .status(ActionStatus::Failed),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].action_reason.as_deref(),
            Some("INVALID_STATE_TRANSITION: ACCEPTED -> ACCEPTED")
        );
    }

    #[tokio::test]
    async fn send_is_refused_when_the_staged_credential_is_gone() {
        let h = harness();
        let support = actor("support@example.com", Role::Support);
        let user = h.account("user@example.com", Role::User).await;
        let old_hash = h.stored(user).await.unwrap().password_hash;
        let request = h.gate.resets.submit("user@example.com").await.unwrap();
        h.gate.resets.accept(&support, request.id).await.unwrap();

        // Same store, separate process: its outbox never saw the accept.
        let elsewhere = Rolegate::new(
            ServiceContext::builder(Arc::clone(&h.store))
                .clock(h.clock.clone())
                .hasher(Arc::new(PlainHasher))
                .build(),
        );
        let err = elsewhere.resets.send_password(&support, request.id).await.unwrap_err();
        assert_eq!(err, ServiceError::Delivery(DeliveryError::NotStaged(request.id)));

        let stored = h.gate.resets.get(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ResetStatus::Accepted);
        assert_eq!(h.stored(user).await.unwrap().password_hash, old_hash);
        let actions = h.actions().await;
        assert_eq!(actions[0].action_status, ActionStatus::Failed);
        assert_eq!(actions[0].action_reason.as_deref(), Some(failure::CREDENTIAL_NOT_STAGED));

        // The process holding the staged plaintext can still finish.
        let sent = h.gate.resets.send_password(&support, request.id).await.unwrap();
        assert!(sent.warnings.is_empty());
        assert_eq!(sent.value.status, ResetStatus::PasswordSent);
        assert_ne!(h.stored(user).await.unwrap().password_hash, old_hash);
    }

    #[tokio::test]
    async fn only_support_operates_reset_steps() {
        let h = harness();
        h.account("support@example.com", Role::Support).await;
        h.account("user@example.com", Role::User).await;
        let own = h.gate.resets.submit("support@example.com").await.unwrap();
        let theirs = h.gate.resets.submit("user@example.com").await.unwrap();

        let err = h
            .gate
            .resets
            .accept(&actor("admin@example.com", Role::Admin), theirs.id)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::AccountForbidden));

        let err = h
            .gate
            .resets
            .accept(&actor("support@example.com", Role::Support), own.id)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::SelfModificationForbidden));

        let err = h
            .gate
            .resets
            .accept(&actor("support@example.com", Role::Support), ResetRequestId::new())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("reset request"));

        let actions = h.actions().await;
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|e| e.action_status == ActionStatus::Failed));
        assert_eq!(actions[0].action_reason.as_deref(), Some(failure::REQUEST_NOT_FOUND));
        assert_eq!(h.delivery.staged_count(), 0);
    }

    #[tokio::test]
    async fn submit_returns_the_open_request() {
        let h = harness();
        h.account("user@example.com", Role::User).await;

        let first = h.gate.resets.submit("user@example.com").await.unwrap();
        let again = h.gate.resets.submit(" USER@example.com ").await.unwrap();
        assert_eq!(first.id, again.id);

        let err = h.gate.resets.submit("nobody@example.com").await.unwrap_err();
        assert_eq!(err, ServiceError::NotFound("account"));

        let queue = h
            .gate
            .resets
            .list_requests(&actor("admin@example.com", Role::Admin))
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        let err = h
            .gate
            .resets
            .list_requests(&actor("editor@example.com", Role::Editor))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::AccountForbidden));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profiles
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn profile_edit_rules() {
        let h = harness();
        let user_actor = actor("user@example.com", Role::User);
        let editor = actor("editor@example.com", Role::Editor);
        let user = h.account("user@example.com", Role::User).await;
        let other = h.account("other@example.com", Role::User).await;
        let admin = h.account("admin@example.com", Role::Admin).await;

        let profile = h
            .gate
            .profiles
            .create_profile(&user_actor, user, details("Uma", "5550001111"))
            .await
            .unwrap();
        assert_eq!(profile.email.as_str(), "user@example.com");
        let account = h.stored(user).await.unwrap();
        assert!(account.profile_created);
        assert_eq!(account.profile_id, Some(profile.id));

        let err = h
            .gate
            .profiles
            .create_profile(&user_actor, other, details("Oz", "5550002222"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::AccountForbidden));

        let err = h
            .gate
            .profiles
            .create_profile(&user_actor, user, details("Uma again", "5550001111"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let updated = h
            .gate
            .profiles
            .update_profile(&editor, profile.id, details("Uma Q.", "5550009999"))
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.details.name, "Uma Q.");

        let err = h
            .gate
            .profiles
            .create_profile(&editor, admin, details("Ada", "5550003333"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Denied(ReasonCode::AccountForbidden));

        let err = h
            .gate
            .profiles
            .update_profile(&editor, profile.id, details(" ", "5550009999"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = h
            .gate
            .profiles
            .update_profile(&editor, ProfileId::new(), details("Ghost", "0000"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("profile"));

        let actions = h.actions().await;
        let reasons: Vec<Option<&str>> = actions.iter().map(|e| e.action_reason.as_deref()).collect();
        assert_eq!(
            reasons,
            vec![
                Some(failure::PROFILE_NOT_FOUND),
                Some(failure::INVALID_INPUT),
                Some("ACCOUNT_FORBIDDEN"),
                None,
                Some(failure::PROFILE_ALREADY_EXISTS),
                Some("ACCOUNT_FORBIDDEN"),
                None,
            ]
        );
        let update = &actions[3];
        assert_eq!(update.action_type, ActionType::ProfileUpdate);
        assert_eq!(update.before_state.as_ref().unwrap()["name"], "Uma");
        assert_eq!(update.after_state.as_ref().unwrap()["name"], "Uma Q.");
    }

    #[tokio::test]
    async fn users_see_short_profile_rows() {
        let h = harness();
        for (email, name, phone) in [
            ("a@example.com", "Ann", "9876543210"),
            ("b@example.com", "Bob", "123"),
        ] {
            let id = h.account(email, Role::User).await;
            h.gate
                .profiles
                .create_profile(&actor(email, Role::User), id, details(name, phone))
                .await
                .unwrap();
        }

        let ProfileListing::Short { rows } = h
            .gate
            .profiles
            .list_profiles(&actor("a@example.com", Role::User))
            .await
            .unwrap()
        else {
            panic!("USER must get the short view");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].sno, rows[0].phone.as_str()), (1, "XXXXXX3210"));
        assert_eq!((rows[1].sno, rows[1].phone.as_str()), (2, "XXXX"));

        let listing = h
            .gate
            .profiles
            .list_profiles(&actor("s@example.com", Role::Support))
            .await
            .unwrap();
        assert!(matches!(listing, ProfileListing::Full { rows } if rows.len() == 2));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failure and concurrency
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn storage_failure_applies_nothing() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        let user = h.account("user@example.com", Role::User).await;

        h.store.fail_mutations(true);
        let err = h.gate.directory.change_role(&root, user, Role::Support).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StoreError::Unavailable(_))));
        assert!(err.is_retryable());

        let account = h.stored(user).await.unwrap();
        assert_eq!((account.role, account.version), (Role::User, 0));

        let actions = h.actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_status, ActionStatus::Failed);
        assert_eq!(actions[0].action_reason.as_deref(), Some("STORE_UNAVAILABLE"));

        h.store.fail_mutations(false);
        h.gate.directory.change_role(&root, user, Role::Support).await.unwrap();
        assert_eq!(h.stored(user).await.unwrap().role, Role::Support);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_role_changes_on_one_account_are_serialized() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        let user = h.account("user@example.com", Role::User).await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let directory = h.gate.directory.clone();
            let root = root.clone();
            let role = if i % 2 == 0 { Role::Editor } else { Role::Support };
            handles.push(tokio::spawn(async move {
                directory.change_role(&root, user, role).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(h.stored(user).await.unwrap().version, 10);
        let actions = h.actions().await;
        assert_eq!(actions.len(), 10);
        assert!(actions.iter().all(|e| e.action_status == ActionStatus::Success));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit views and login events
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn audit_views_are_scoped_by_role() {
        let h = harness();
        let support = actor("support@example.com", Role::Support);
        let admin = actor("admin@example.com", Role::Admin);
        let root = actor("root@example.com", Role::SuperAdmin);
        let user = actor("user@example.com", Role::User);
        h.account("user@example.com", Role::User).await;

        let request = h.gate.resets.submit("user@example.com").await.unwrap();
        h.gate.resets.accept(&support, request.id).await.unwrap();
        for email in ["user@example.com", "admin@example.com"] {
            h.gate
                .logins
                .record(LoginEvent::failure(email, None, LoginReason::InvalidPassword))
                .await
                .unwrap();
        }

        let audit = &h.gate.audit;
        assert_eq!(audit.logins(&support, AuditFilter::default()).await.unwrap().len(), 2);
        assert_eq!(
            audit.password_resets(&support, AuditFilter::default()).await.unwrap_err(),
            ServiceError::Denied(ReasonCode::AccountForbidden)
        );

        let redacted = audit.password_resets(&admin, AuditFilter::default()).await.unwrap();
        assert_eq!(redacted.len(), 1);
        assert!(redacted[0].before_state.is_none() && redacted[0].after_state.is_none());
        assert!(audit.actions(&admin, AuditFilter::default()).await.is_err());

        // The requested action type is overridden.
        let full = audit
            .password_resets(&root, AuditFilter::default().action_type(ActionType::RoleChange))
            .await
            .unwrap();
        assert_eq!(full.len(), 1);
        assert!(full[0].after_state.is_some());

        let own = audit
            .own_logins(&user, AuditFilter::default().email("admin@example.com"))
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].email, "user@example.com");
        assert!(audit.logins(&user, AuditFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn login_alert_follows_history() {
        let h = harness();
        let email = Email::parse("user@example.com").unwrap();
        let token = Secret::new("session-token-1");
        let login = |token: Secret, at: chrono::DateTime<Utc>| {
            LoginEvent::login("User@Example.com", Role::User, token, at, at + Duration::hours(1))
        };

        let first = h.gate.logins.record(login(token.clone(), start())).await.unwrap();
        assert_eq!(first.email, "user@example.com");
        assert_eq!(first.token_digest.as_deref(), Some(token_digest(&token).as_str()));
        let alert = h.gate.logins.login_alert(&email, h.clock.now()).await.unwrap();
        assert_eq!(alert.alert_type, LoginAlertType::FirstLogin);

        h.clock.advance(Duration::minutes(30));
        let logout_at = h.clock.now();
        h.gate
            .logins
            .record(LoginEvent::logout("user@example.com", Role::User, Some(token)))
            .await
            .unwrap();

        h.clock.advance(Duration::days(2) + Duration::hours(3));
        h.gate
            .logins
            .record(login(Secret::new("session-token-2"), h.clock.now()))
            .await
            .unwrap();
        let alert = h.gate.logins.login_alert(&email, h.clock.now()).await.unwrap();
        assert_eq!(alert.alert_type, LoginAlertType::Normal);
        assert_eq!(alert.last_logout_at, Some(logout_at));
        assert_eq!(alert.message, "Welcome back! You last logged out 2 days 3 hours ago.");

        let other = Email::parse("other@example.com").unwrap();
        for n in 0..2 {
            h.gate
                .logins
                .record(LoginEvent::login(
                    "other@example.com",
                    Role::User,
                    Secret::new(format!("t{n}")),
                    start(),
                    start(),
                ))
                .await
                .unwrap();
        }
        let alert = h.gate.logins.login_alert(&other, h.clock.now()).await.unwrap();
        assert_eq!(alert.alert_type, LoginAlertType::SessionTimeout);

        let changed = h
            .gate
            .logins
            .record(LoginEvent::password_change(
                "user@example.com",
                Role::User,
                LoginReason::SamePasswordReuse,
            ))
            .await
            .unwrap();
        assert_eq!(changed.login_type, LoginType::PasswordChanged);
        assert_eq!(changed.display_status(), ActionStatus::Failed);
    }

    #[tokio::test]
    async fn equal_timestamps_list_later_entries_first() {
        let h = harness();
        let root = actor("root@example.com", Role::SuperAdmin);
        let user = h.account("user@example.com", Role::User).await;

        for role in [Role::Editor, Role::Support, Role::User] {
            h.gate.directory.change_role(&root, user, role).await.unwrap();
        }
        let actions = h.gate.audit.actions(&root, AuditFilter::default()).await.unwrap();
        assert!(actions.iter().all(|e| e.performed_at == start()));
        let sequences: Vec<u64> = actions.iter().map(|e| e.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(actions[0].after_state.as_ref().unwrap()["role"], "USER");

        let page = AuditFilter {
            limit: Some(1),
            offset: Some(1),
            ..AuditFilter::default()
        };
        let second = h.gate.audit.actions(&root, page).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].sequence, sequences[1]);
    }
}
