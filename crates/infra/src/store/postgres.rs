//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | `StoreError` | Scenario |
//! |------------|-----------------|--------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | duplicate email, concurrent insert of the same record |
//! | Database (foreign key violation) | `23503` | `Database` | referential integrity violation |
//! | Database (check constraint violation) | `23514` | `Corrupt` | value outside the closed sets |
//! | Database (other) | any other | `Database` | |
//! | PoolTimedOut | n/a | `Timeout` | no connection within the pool timeout |
//! | PoolClosed / Io / Tls | n/a | `Unavailable` | connection failures |
//! | ColumnDecode / Decode | n/a | `Corrupt` | stored value does not decode |
//!
//! Version-guarded writes use `UPDATE ... WHERE version = $expected`; zero
//! affected rows inside the batch transaction is reported as `Conflict` and
//! rolls the whole batch back.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use rolegate_auth::{
    ActionAuditEntry, ActionStatus, ActionType, AuditFilter, AuthAccount, Email, LoginAuditEntry,
    LoginReason, LoginType, PasswordHash, PasswordResetRequest, ProfileDetails, ResetStatus, Role,
    UserProfile,
};
use rolegate_core::{AccountId, AuditEntryId, ExpectedVersion, ProfileId, ResetRequestId};

use super::{CommitReceipt, Pagination, Store, StoreError, WriteBatch, WriteOp};

/// Schema applied by [`PostgresStore::ensure_schema`]. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id              UUID PRIMARY KEY,
    email           TEXT NOT NULL UNIQUE,
    password_hash   TEXT NOT NULL,
    role            TEXT NOT NULL CHECK (role IN ('USER', 'EDITOR', 'SUPPORT', 'ADMIN', 'SUPER_ADMIN')),
    active          BOOLEAN NOT NULL,
    profile_created BOOLEAN NOT NULL,
    profile_id      UUID NULL,
    version         BIGINT NOT NULL CHECK (version >= 0),
    created_at      TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id          UUID PRIMARY KEY,
    account_id  UUID NOT NULL UNIQUE REFERENCES accounts (id),
    email       TEXT NOT NULL,
    details     JSONB NOT NULL,
    version     BIGINT NOT NULL CHECK (version >= 0),
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS reset_requests (
    id                  UUID PRIMARY KEY,
    account_id          UUID NOT NULL REFERENCES accounts (id),
    user_email          TEXT NOT NULL,
    status              TEXT NOT NULL,
    requested_at        TIMESTAMPTZ NOT NULL,
    approved_by         TEXT NULL,
    approved_at         TIMESTAMPTZ NULL,
    password_sent_at    TIMESTAMPTZ NULL,
    pending_credential  TEXT NULL,
    version             BIGINT NOT NULL CHECK (version >= 0)
);

CREATE INDEX IF NOT EXISTS reset_requests_account_idx ON reset_requests (account_id);

CREATE TABLE IF NOT EXISTS action_audit (
    sequence            BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    id                  UUID NOT NULL UNIQUE,
    actor_email         TEXT NOT NULL,
    actor_role          TEXT NOT NULL,
    target_user_email   TEXT NULL,
    target_account_id   UUID NULL,
    action_type         TEXT NOT NULL,
    action_status       TEXT NOT NULL CHECK (action_status IN ('SUCCESS', 'FAILED')),
    action_reason       TEXT NULL,
    before_state        JSONB NULL,
    after_state         JSONB NULL,
    performed_at        TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS action_audit_time_idx ON action_audit (performed_at DESC, sequence DESC);

CREATE TABLE IF NOT EXISTS login_audit (
    sequence        BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    id              UUID NOT NULL UNIQUE,
    email           TEXT NOT NULL,
    role            TEXT NULL,
    login_type      TEXT NOT NULL,
    reason          TEXT NULL,
    event_time      TIMESTAMPTZ NOT NULL,
    jwt_issued_at   TIMESTAMPTZ NULL,
    jwt_expires_at  TIMESTAMPTZ NULL,
    token_digest    TEXT NULL
);

CREATE INDEX IF NOT EXISTS login_audit_email_idx ON login_audit (email, event_time DESC);
"#;

/// Postgres-backed store.
///
/// Each [`WriteBatch`] runs in one transaction. Audit tables are only ever
/// inserted into.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        op: WriteOp,
        receipt: &mut CommitReceipt,
    ) -> Result<(), StoreError> {
        match op {
            WriteOp::PutAccount { account, expected } => put_account(tx, &account, expected).await,
            WriteOp::DeleteAccount { id, expected } => {
                delete_guarded(tx, "accounts", *id.as_uuid(), expected).await
            }
            WriteOp::PutProfile { profile, expected } => put_profile(tx, &profile, expected).await,
            WriteOp::DeleteProfile { id, expected } => {
                delete_guarded(tx, "profiles", *id.as_uuid(), expected).await
            }
            WriteOp::PutResetRequest { request, expected } => {
                put_reset_request(tx, &request, expected).await
            }
            WriteOp::DeleteResetRequest { id, expected } => {
                delete_guarded(tx, "reset_requests", *id.as_uuid(), expected).await
            }
            WriteOp::AppendAction(entry) => {
                let sequence = insert_action(tx, &entry).await?;
                receipt.action_sequences.push(sequence);
                Ok(())
            }
            WriteOp::AppendLogin(entry) => {
                let sequence = insert_login(tx, &entry).await?;
                receipt.login_sequences.push(sequence);
                Ok(())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

fn conflict_unless_touched(kind: &str, affected: u64, expected: ExpectedVersion) -> Result<(), StoreError> {
    if affected == 0 {
        Err(StoreError::Conflict(format!("{kind}: expected {expected:?}")))
    } else {
        Ok(())
    }
}

async fn put_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &AuthAccount,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let result = match expected {
        ExpectedVersion::New => sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, role, active, profile_created, profile_id, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        ),
        ExpectedVersion::Any => sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, role, active, profile_created, profile_id, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                role = EXCLUDED.role,
                active = EXCLUDED.active,
                profile_created = EXCLUDED.profile_created,
                profile_id = EXCLUDED.profile_id,
                version = EXCLUDED.version
            "#,
        ),
        ExpectedVersion::Exact(_) => sqlx::query(
            r#"
            UPDATE accounts SET
                email = $2,
                password_hash = $3,
                role = $4,
                active = $5,
                profile_created = $6,
                profile_id = $7,
                version = $8,
                created_at = $9
            WHERE id = $1 AND version = $10
            "#,
        ),
    }
    .bind(account.id.as_uuid())
    .bind(account.email.as_str())
    .bind(account.password_hash.as_str())
    .bind(account.role.as_str())
    .bind(account.active)
    .bind(account.profile_created)
    .bind(account.profile_id.map(|id| *id.as_uuid()))
    .bind(account.version as i64)
    .bind(account.created_at);

    let result = match expected {
        ExpectedVersion::Exact(v) => result.bind(v as i64),
        _ => result,
    };

    let done = result
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("put_account", e))?;
    conflict_unless_touched("account", done.rows_affected(), expected)
}

async fn put_profile(
    tx: &mut Transaction<'_, Postgres>,
    profile: &UserProfile,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let details = serde_json::to_value(&profile.details)
        .map_err(|e| StoreError::Corrupt(format!("profile details serialization failed: {e}")))?;

    let query = match expected {
        ExpectedVersion::New => sqlx::query(
            r#"
            INSERT INTO profiles (id, account_id, email, details, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        ),
        ExpectedVersion::Any => sqlx::query(
            r#"
            INSERT INTO profiles (id, account_id, email, details, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                details = EXCLUDED.details,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        ),
        ExpectedVersion::Exact(_) => sqlx::query(
            r#"
            UPDATE profiles SET email = $3, details = $4, version = $5, updated_at = $6
            WHERE id = $1 AND account_id = $2 AND version = $7
            "#,
        ),
    }
    .bind(profile.id.as_uuid())
    .bind(profile.account_id.as_uuid())
    .bind(profile.email.as_str())
    .bind(details)
    .bind(profile.version as i64)
    .bind(profile.updated_at);

    let query = match expected {
        ExpectedVersion::Exact(v) => query.bind(v as i64),
        _ => query,
    };

    let done = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("put_profile", e))?;
    conflict_unless_touched("profile", done.rows_affected(), expected)
}

async fn put_reset_request(
    tx: &mut Transaction<'_, Postgres>,
    request: &PasswordResetRequest,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let query = match expected {
        ExpectedVersion::New => sqlx::query(
            r#"
            INSERT INTO reset_requests (
                id, account_id, user_email, status, requested_at,
                approved_by, approved_at, password_sent_at, pending_credential, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        ),
        ExpectedVersion::Any => sqlx::query(
            r#"
            INSERT INTO reset_requests (
                id, account_id, user_email, status, requested_at,
                approved_by, approved_at, password_sent_at, pending_credential, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                approved_by = EXCLUDED.approved_by,
                approved_at = EXCLUDED.approved_at,
                password_sent_at = EXCLUDED.password_sent_at,
                pending_credential = EXCLUDED.pending_credential,
                version = EXCLUDED.version
            "#,
        ),
        ExpectedVersion::Exact(_) => sqlx::query(
            r#"
            UPDATE reset_requests SET
                status = $4,
                approved_by = $6,
                approved_at = $7,
                password_sent_at = $8,
                pending_credential = $9,
                version = $10
            WHERE id = $1 AND account_id = $2 AND user_email = $3 AND requested_at = $5
                AND version = $11
            "#,
        ),
    }
    .bind(request.id.as_uuid())
    .bind(request.account_id.as_uuid())
    .bind(request.user_email.as_str())
    .bind(request.status.as_str())
    .bind(request.requested_at)
    .bind(request.approved_by.as_ref().map(Email::as_str))
    .bind(request.approved_at)
    .bind(request.password_sent_at)
    .bind(request.pending_credential.as_ref().map(PasswordHash::as_str))
    .bind(request.version as i64);

    let query = match expected {
        ExpectedVersion::Exact(v) => query.bind(v as i64),
        _ => query,
    };

    let done = query
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("put_reset_request", e))?;
    conflict_unless_touched("reset request", done.rows_affected(), expected)
}

async fn delete_guarded(
    tx: &mut Transaction<'_, Postgres>,
    table: &'static str,
    id: uuid::Uuid,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let done = match expected {
        ExpectedVersion::Exact(v) => {
            sqlx::query(&format!("DELETE FROM {table} WHERE id = $1 AND version = $2"))
                .bind(id)
                .bind(v as i64)
                .execute(&mut **tx)
                .await
        }
        ExpectedVersion::Any => {
            sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
                .bind(id)
                .execute(&mut **tx)
                .await
        }
        // Deleting a record that must not exist is a no-op only if it is absent.
        ExpectedVersion::New => {
            let row = sqlx::query(&format!("SELECT 1 FROM {table} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("delete_guarded", e))?;
            return match row {
                None => Ok(()),
                Some(_) => Err(StoreError::Conflict(format!("{table}: expected New"))),
            };
        }
    }
    .map_err(|e| map_sqlx_error("delete_guarded", e))?;

    match expected {
        ExpectedVersion::Exact(_) => conflict_unless_touched(table, done.rows_affected(), expected),
        _ => Ok(()),
    }
}

async fn insert_action(
    tx: &mut Transaction<'_, Postgres>,
    entry: &ActionAuditEntry,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO action_audit (
            id, actor_email, actor_role, target_user_email, target_account_id,
            action_type, action_status, action_reason, before_state, after_state, performed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING sequence
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(entry.actor_email.as_str())
    .bind(entry.actor_role.as_str())
    .bind(entry.target_user_email.as_ref().map(Email::as_str))
    .bind(entry.target_account_id.map(|id| *id.as_uuid()))
    .bind(entry.action_type.as_str())
    .bind(entry.action_status.as_str())
    .bind(entry.action_reason.as_deref())
    .bind(&entry.before_state)
    .bind(&entry.after_state)
    .bind(entry.performed_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_action", e))?;

    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| map_sqlx_error("insert_action", e))?;
    Ok(sequence as u64)
}

async fn insert_login(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LoginAuditEntry,
) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO login_audit (
            id, email, role, login_type, reason, event_time,
            jwt_issued_at, jwt_expires_at, token_digest
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING sequence
        "#,
    )
    .bind(entry.id.as_uuid())
    .bind(&entry.email)
    .bind(entry.role.map(|r| r.as_str()))
    .bind(entry.login_type.as_str())
    .bind(entry.reason.map(|r| r.as_str()))
    .bind(entry.event_time)
    .bind(entry.jwt_issued_at)
    .bind(entry.jwt_expires_at)
    .bind(entry.token_digest.as_deref())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_login", e))?;

    let sequence: i64 = row
        .try_get("sequence")
        .map_err(|e| map_sqlx_error("insert_login", e))?;
    Ok(sequence as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("invalid {what}: {value:?}"))
}

fn decode_email(raw: String) -> Result<Email, StoreError> {
    Email::parse(&raw).map_err(|_| corrupt("email", &raw))
}

fn decode_role(raw: &str) -> Result<Role, StoreError> {
    Role::from_str(raw).map_err(|_| corrupt("role", raw))
}

fn account_from_row(row: &PgRow) -> Result<AuthAccount, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let email: String = row.try_get("email")?;
    let profile_id: Option<uuid::Uuid> = row.try_get("profile_id")?;
    let version: i64 = row.try_get("version")?;
    Ok(AuthAccount {
        id: AccountId::from_uuid(row.try_get("id")?),
        email: decode_email(email).map_err(decode_failure)?,
        password_hash: PasswordHash::new(row.try_get::<String, _>("password_hash")?),
        role: decode_role(&role).map_err(decode_failure)?,
        active: row.try_get("active")?,
        profile_created: row.try_get("profile_created")?,
        profile_id: profile_id.map(ProfileId::from_uuid),
        version: version as u64,
        created_at: row.try_get("created_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    let email: String = row.try_get("email")?;
    let details: serde_json::Value = row.try_get("details")?;
    let version: i64 = row.try_get("version")?;
    Ok(UserProfile {
        id: ProfileId::from_uuid(row.try_get("id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        email: decode_email(email).map_err(decode_failure)?,
        details: serde_json::from_value::<ProfileDetails>(details)
            .map_err(|e| decode_failure(StoreError::Corrupt(e.to_string())))?,
        version: version as u64,
        updated_at: row.try_get("updated_at")?,
    })
}

fn reset_from_row(row: &PgRow) -> Result<PasswordResetRequest, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let email: String = row.try_get("user_email")?;
    let approved_by: Option<String> = row.try_get("approved_by")?;
    let pending: Option<String> = row.try_get("pending_credential")?;
    let version: i64 = row.try_get("version")?;
    Ok(PasswordResetRequest {
        id: ResetRequestId::from_uuid(row.try_get("id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        user_email: decode_email(email).map_err(decode_failure)?,
        status: ResetStatus::parse(&status)
            .ok_or_else(|| decode_failure(corrupt("reset status", &status)))?,
        requested_at: row.try_get("requested_at")?,
        approved_by: approved_by.map(decode_email).transpose().map_err(decode_failure)?,
        approved_at: row.try_get("approved_at")?,
        password_sent_at: row.try_get("password_sent_at")?,
        pending_credential: pending.map(PasswordHash::new),
        version: version as u64,
    })
}

fn action_from_row(row: &PgRow) -> Result<ActionAuditEntry, sqlx::Error> {
    let sequence: i64 = row.try_get("sequence")?;
    let actor_email: String = row.try_get("actor_email")?;
    let actor_role: String = row.try_get("actor_role")?;
    let target: Option<String> = row.try_get("target_user_email")?;
    let target_id: Option<uuid::Uuid> = row.try_get("target_account_id")?;
    let action_type: String = row.try_get("action_type")?;
    let status: String = row.try_get("action_status")?;
    Ok(ActionAuditEntry {
        id: AuditEntryId::from_uuid(row.try_get("id")?),
        sequence: sequence as u64,
        actor_email: decode_email(actor_email).map_err(decode_failure)?,
        actor_role: decode_role(&actor_role).map_err(decode_failure)?,
        target_user_email: target.map(decode_email).transpose().map_err(decode_failure)?,
        target_account_id: target_id.map(AccountId::from_uuid),
        action_type: ActionType::parse(&action_type)
            .ok_or_else(|| decode_failure(corrupt("action type", &action_type)))?,
        action_status: ActionStatus::parse(&status)
            .ok_or_else(|| decode_failure(corrupt("action status", &status)))?,
        action_reason: row.try_get("action_reason")?,
        before_state: row.try_get("before_state")?,
        after_state: row.try_get("after_state")?,
        performed_at: row.try_get("performed_at")?,
    })
}

fn login_from_row(row: &PgRow) -> Result<LoginAuditEntry, sqlx::Error> {
    let sequence: i64 = row.try_get("sequence")?;
    let role: Option<String> = row.try_get("role")?;
    let login_type: String = row.try_get("login_type")?;
    let reason: Option<String> = row.try_get("reason")?;
    Ok(LoginAuditEntry {
        id: AuditEntryId::from_uuid(row.try_get("id")?),
        sequence: sequence as u64,
        email: row.try_get("email")?,
        role: role.as_deref().map(decode_role).transpose().map_err(decode_failure)?,
        login_type: LoginType::parse(&login_type)
            .ok_or_else(|| decode_failure(corrupt("login type", &login_type)))?,
        reason: reason
            .as_deref()
            .map(|r| LoginReason::parse(r).ok_or_else(|| corrupt("login reason", r)))
            .transpose()
            .map_err(decode_failure)?,
        event_time: row.try_get("event_time")?,
        jwt_issued_at: row.try_get("jwt_issued_at")?,
        jwt_expires_at: row.try_get("jwt_expires_at")?,
        token_digest: row.try_get("token_digest")?,
    })
}

fn decode_failure(err: StoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

fn decode_rows<T>(
    operation: &str,
    rows: Vec<PgRow>,
    decode: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(|row| decode(row).map_err(|e| map_sqlx_error(operation, e)))
        .collect()
}

/// Escape LIKE metacharacters so user input is matched literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::Database(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("row decode failed in {operation}: {err}"))
        }
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, role, active, profile_created, profile_id, version, created_at";
const PROFILE_COLUMNS: &str = "id, account_id, email, details, version, updated_at";
const RESET_COLUMNS: &str = "id, account_id, user_email, status, requested_at, approved_by, \
     approved_at, password_sent_at, pending_credential, version";

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn account(&self, id: AccountId) -> Result<Option<AuthAccount>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account", e))?;
        row.as_ref()
            .map(account_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("account", e))
    }

    async fn account_by_email(&self, email: &Email) -> Result<Option<AuthAccount>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1"))
            .bind(email.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_by_email", e))?;
        row.as_ref()
            .map(account_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("account_by_email", e))
    }

    async fn accounts(&self) -> Result<Vec<AuthAccount>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("accounts", e))?;
        decode_rows("accounts", rows, account_from_row)
    }

    async fn profile(&self, id: ProfileId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("profile", e))?;
        row.as_ref()
            .map(profile_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("profile", e))
    }

    async fn profile_of(&self, account_id: AccountId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE account_id = $1"
        ))
        .bind(account_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("profile_of", e))?;
        row.as_ref()
            .map(profile_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("profile_of", e))
    }

    async fn profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY email ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("profiles", e))?;
        decode_rows("profiles", rows, profile_from_row)
    }

    async fn reset_request(&self, id: ResetRequestId) -> Result<Option<PasswordResetRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RESET_COLUMNS} FROM reset_requests WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("reset_request", e))?;
        row.as_ref()
            .map(reset_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("reset_request", e))
    }

    async fn reset_requests_of(&self, account_id: AccountId) -> Result<Vec<PasswordResetRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESET_COLUMNS} FROM reset_requests WHERE account_id = $1 \
             ORDER BY requested_at DESC, id DESC"
        ))
        .bind(account_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_requests_of", e))?;
        decode_rows("reset_requests_of", rows, reset_from_row)
    }

    async fn reset_requests(&self) -> Result<Vec<PasswordResetRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESET_COLUMNS} FROM reset_requests ORDER BY requested_at DESC, id DESC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_requests", e))?;
        decode_rows("reset_requests", rows, reset_from_row)
    }

    #[instrument(skip(self, filter), fields(limit = page.limit, offset = page.offset), err)]
    async fn query_actions(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<Vec<ActionAuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                sequence, id, actor_email, actor_role, target_user_email, target_account_id,
                action_type, action_status, action_reason, before_state, after_state, performed_at
            FROM action_audit
            WHERE ($1::text IS NULL OR action_type = $1)
                AND ($2::text IS NULL OR action_status = $2)
                AND ($3::timestamptz IS NULL OR performed_at >= $3)
                AND ($4::timestamptz IS NULL OR performed_at <= $4)
                AND ($5::text IS NULL OR actor_email = $5 OR target_user_email = $5)
                AND ($6::text IS NULL OR actor_email ILIKE $6 OR target_user_email ILIKE $6)
            ORDER BY performed_at DESC, sequence DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(filter.action_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.email.as_deref())
        .bind(filter.email_contains.as_deref().map(like_pattern))
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_actions", e))?;
        decode_rows("query_actions", rows, action_from_row)
    }

    #[instrument(skip(self, filter), fields(limit = page.limit, offset = page.offset), err)]
    async fn query_logins(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<Vec<LoginAuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                sequence, id, email, role, login_type, reason, event_time,
                jwt_issued_at, jwt_expires_at, token_digest
            FROM login_audit
            WHERE ($1::text IS NULL OR login_type = $1)
                AND ($2::text IS NULL OR (
                    CASE
                        WHEN login_type IN ('LOGIN', 'LOGOUT') THEN 'SUCCESS'
                        WHEN login_type = 'PASSWORD_CHANGED' AND reason = 'PASSWORD_CHANGED_SUCCESS' THEN 'SUCCESS'
                        ELSE 'FAILED'
                    END) = $2)
                AND ($3::timestamptz IS NULL OR event_time >= $3)
                AND ($4::timestamptz IS NULL OR event_time <= $4)
                AND ($5::text IS NULL OR email = $5)
                AND ($6::text IS NULL OR email ILIKE $6)
            ORDER BY event_time DESC, sequence DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(filter.login_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.email.as_deref())
        .bind(filter.email_contains.as_deref().map(like_pattern))
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_logins", e))?;
        decode_rows("query_logins", rows, login_from_row)
    }

    #[instrument(skip(self, batch), fields(ops = batch.len()), err)]
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        if batch.is_empty() {
            return Ok(CommitReceipt::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut receipt = CommitReceipt::default();
        for op in batch.into_ops() {
            if let Err(err) = Self::apply(&mut tx, op, &mut receipt).await {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(receipt)
    }
}
