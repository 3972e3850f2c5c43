//! Infrastructure layer: storage, audit ledger, services and default
//! collaborators around the pure `rolegate-auth` policy.

pub mod audit_ledger;
pub mod audit_query;
pub mod config;
pub mod context;
pub mod credentials;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod locks;
pub mod login_events;
pub mod password_reset;
pub mod profiles;
pub mod store;

mod integration_tests;

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

pub use audit_ledger::AuditLedger;
pub use audit_query::AuditQueryService;
pub use config::{ConfigError, Settings};
pub use context::{ServiceContext, ServiceContextBuilder};
pub use credentials::{Argon2Hasher, RandomSecretGenerator};
pub use delivery::{Completed, CredentialDelivery, DeliveryError, InMemoryDelivery};
pub use directory::AccountDirectory;
pub use error::{ServiceError, ServiceResult};
pub use login_events::{LoginEvent, LoginEventRecorder};
pub use password_reset::PasswordResetWorkflow;
pub use profiles::ProfileService;
pub use store::{InMemoryStore, PostgresStore, Store, StoreError};

/// Store handle used when the backend is chosen at runtime.
pub type SharedStore = Arc<dyn Store>;

/// All services over one shared context.
#[derive(Clone)]
pub struct Rolegate<S> {
    pub directory: AccountDirectory<S>,
    pub profiles: ProfileService<S>,
    pub resets: PasswordResetWorkflow<S>,
    pub logins: LoginEventRecorder<S>,
    pub audit: AuditQueryService<S>,
    ctx: ServiceContext<S>,
}

impl<S> Rolegate<S>
where
    S: Store + Clone,
{
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self {
            directory: AccountDirectory::new(ctx.clone()),
            profiles: ProfileService::new(ctx.clone()),
            resets: PasswordResetWorkflow::new(ctx.clone()),
            logins: LoginEventRecorder::new(ctx.clone()),
            audit: AuditQueryService::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &ServiceContext<S> {
        &self.ctx
    }
}

impl Rolegate<Arc<InMemoryStore>> {
    /// In-memory store with default collaborators.
    pub fn in_memory() -> Self {
        Self::new(ServiceContext::builder(Arc::new(InMemoryStore::new())).build())
    }
}

/// Wire up logging, the store chosen by `settings`, and the services.
///
/// Postgres when a database URL is configured (schema created if missing),
/// in-memory otherwise. `delivery` must hold staged credentials at least as
/// durably as the store holds accepted requests; an [`InMemoryDelivery`] is
/// only fit for the in-memory store.
pub async fn bootstrap(
    settings: &Settings,
    delivery: Arc<dyn CredentialDelivery>,
) -> anyhow::Result<Rolegate<SharedStore>> {
    rolegate_observability::init(&settings.log);

    let store: SharedStore = match &settings.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, settings.db_max_connections)
                .await
                .context("connecting to postgres")?;
            store.ensure_schema().await.context("creating schema")?;
            info!(max_connections = settings.db_max_connections, "using postgres store");
            Arc::new(store)
        }
        None => {
            info!("no database configured, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let ctx = ServiceContext::builder(store)
        .generator(Arc::new(RandomSecretGenerator::new(settings.secret_length)))
        .audit_page_limit(settings.audit_page_limit)
        .delivery(delivery)
        .build();
    Ok(Rolegate::new(ctx))
}
