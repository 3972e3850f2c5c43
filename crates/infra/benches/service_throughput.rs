use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use rolegate_auth::{
    ActorContext, AuditFilter, CredentialError, CredentialHasher, Email, LoginReason, PasswordHash, Role,
    Secret,
};
use rolegate_core::AccountId;
use rolegate_infra::{InMemoryStore, LoginEvent, Rolegate, ServiceContext};
use tokio::runtime::Runtime;

/// Argon2 would dominate every measurement; the services are what is measured here.
struct CheapHasher;

impl CredentialHasher for CheapHasher {
    fn hash(&self, secret: &Secret) -> Result<PasswordHash, CredentialError> {
        Ok(PasswordHash::new(secret.expose()))
    }

    fn verify(&self, secret: &Secret, hash: &PasswordHash) -> bool {
        hash.as_str() == secret.expose()
    }
}

fn gate() -> Rolegate<Arc<InMemoryStore>> {
    let ctx = ServiceContext::builder(Arc::new(InMemoryStore::new()))
        .hasher(Arc::new(CheapHasher))
        .build();
    Rolegate::new(ctx)
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn root() -> ActorContext {
    ActorContext::new(Email::parse("root@example.com").expect("valid email"), Role::SuperAdmin)
}

async fn provision(gate: &Rolegate<Arc<InMemoryStore>>, n: usize) -> Vec<AccountId> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let summary = gate
            .directory
            .provision(&format!("user{i}@example.com"), &Secret::new("bench-pass"), Role::User)
            .await
            .expect("provision");
        ids.push(summary.id);
    }
    ids
}

fn bench_role_changes(c: &mut Criterion) {
    let rt = runtime();
    let gate = gate();
    let ids = rt.block_on(provision(&gate, 64));
    let root = root();

    let mut group = c.benchmark_group("service_role_change");
    group.throughput(Throughput::Elements(1));

    group.bench_function("same_account", |b| {
        let target = ids[0];
        let mut flip = false;
        b.to_async(&rt).iter(|| {
            flip = !flip;
            let role = if flip { Role::Editor } else { Role::User };
            let gate = gate.clone();
            let root = root.clone();
            async move { black_box(gate.directory.change_role(&root, target, role).await.expect("allowed")) }
        })
    });

    group.bench_function("denied_self_target", |b| {
        let own = rt
            .block_on(gate.directory.provision("root@example.com", &Secret::new("root-pass"), Role::SuperAdmin))
            .expect("provision root")
            .id;
        b.to_async(&rt).iter(|| {
            let gate = gate.clone();
            let root = root.clone();
            async move { black_box(gate.directory.change_role(&root, own, Role::User).await.is_err()) }
        })
    });

    group.finish();
}

fn bench_audit_queries(c: &mut Criterion) {
    let rt = runtime();
    let root = root();

    let mut group = c.benchmark_group("audit_query");
    for entries in [100usize, 1_000, 10_000] {
        let gate = gate();
        rt.block_on(async {
            for i in 0..entries {
                gate.logins
                    .record(LoginEvent::failure(
                        format!("user{}@example.com", i % 50),
                        None,
                        LoginReason::InvalidPassword,
                    ))
                    .await
                    .expect("record");
            }
        });

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::new("logins_by_email", entries), &entries, |b, _| {
            b.to_async(&rt).iter(|| {
                let gate = gate.clone();
                let root = root.clone();
                async move {
                    let filter = AuditFilter::default().email("user7@example.com");
                    black_box(gate.audit.logins(&root, filter).await.expect("allowed"))
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_role_changes, bench_audit_queries);
criterion_main!(benches);
