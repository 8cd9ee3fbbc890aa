//! Postgres backend.
//!
//! Queries are built at runtime (`sqlx::query` + `Row::try_get`) so the crate
//! builds without a live database.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | anything else | - | `Database` |
//!
//! ## Concurrency
//!
//! - Failed-login counters are updated under `SELECT ... FOR UPDATE` on the
//!   user row, so concurrent attempts never lose an increment.
//! - A successful login only resets the counters when no lock is in force at
//!   that instant; a lock set by a racing failure wins.
//! - Membership deactivation locks the target row and the tenant's other
//!   active primary admins before counting them.
//! - Record mutations write their audit row in the same transaction.
//! - The reaper takes `pg_try_advisory_xact_lock(REAPER_LOCK_KEY)`; a second
//!   concurrent pass sees the lock taken and skips.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::{Instrument, instrument};
use uuid::Uuid;

use juris_auth::user::normalize_email;
use juris_auth::{
    Actor, AuditAction, AuditOutcome, AuditQuery, AuditRecord, LockoutPolicy, Membership, PermissionSet,
    PortalClient, RoleTag, Superadmin, TemporaryPermission, TemporaryRoleAssignment, Tenant, User,
    ensure_primary_admin_remains,
};
use juris_core::{AuditId, GrantId, PortalClientId, RecordId, SuperadminId, TenantId, UserId};

use super::{
    AccountStore, AuditLog, EntityKind, FailedLogin, GrantStore, Lookup, PrincipalStore, ReapReport, Record,
    RecordFilter, RecordStore, Scope, StoreError, TenantStore,
};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_core.sql");

/// Advisory lock key shared by every reaper instance.
const REAPER_LOCK_KEY: i64 = 0x6a75_7269_735f_7270;

const SUPERADMIN_COLUMNS: &str =
    "id, name, email, password_hash, permissions, active, last_login_at, created_at";
const USER_COLUMNS: &str = "id, name, email, password_hash, oab_number, oab_state, phone, specialty, \
     timezone, language, active, email_verified, failed_login_attempts, locked_until, last_login_at, \
     created_at, updated_at";
const TENANT_COLUMNS: &str = "id, name, slug, email, plan, max_users, max_processes, active, suspended, \
     suspension_reason, settings, branding, created_at";
const MEMBERSHIP_COLUMNS: &str =
    "tenant_id, user_id, role, permissions, department, position, active, primary_admin, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, user_id, tenant_id, permissions, snapshot, granted_by, reason, \
     granted_at, expires_at, active, auto_expired, revoked_at, revoked_by";
const ROLE_COLUMNS: &str = "id, user_id, tenant_id, role, original_role, granted_by, reason, granted_at, \
     expires_at, active, auto_expired, revoked_at, revoked_by";
const RECORD_COLUMNS: &str = "id, tenant_id, client_id, data, created_at, updated_at, deleted_at";
const AUDIT_COLUMNS: &str = "id, occurred_at, actor, tenant_id, action, resource_type, resource_id, outcome, \
     cause, ip, user_agent, old_value, new_value, details";

/// Postgres-backed implementation of every store contract.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a bounded pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => {
                return StoreError::Conflict(format!("{operation}: {}", db_err.message()));
            }
            Some("23503") => return StoreError::NotFound,
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::debug_span!("db.query", db.system = "postgresql", db.operation = operation, db.statement = statement)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn role_column(row: &PgRow, column: &str) -> Result<RoleTag, StoreError> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| corrupt(column, e))
}

fn permission_column(row: &PgRow, column: &str) -> Result<PermissionSet, StoreError> {
    let raw: Value = row.try_get(column)?;
    PermissionSet::try_from(raw).map_err(|e| corrupt(column, e))
}

fn superadmin_from_row(row: &PgRow) -> Result<Superadmin, StoreError> {
    let permissions: Value = row.try_get("permissions")?;
    Ok(Superadmin {
        id: SuperadminId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        permissions: serde_json::from_value(permissions).map_err(|e| corrupt("superadmins.permissions", e))?,
        active: row.try_get("active")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let attempts: i32 = row.try_get("failed_login_attempts")?;
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        oab_number: row.try_get("oab_number")?,
        oab_state: row.try_get("oab_state")?,
        phone: row.try_get("phone")?,
        specialty: row.try_get("specialty")?,
        timezone: row.try_get("timezone")?,
        language: row.try_get("language")?,
        active: row.try_get("active")?,
        email_verified: row.try_get("email_verified")?,
        failed_login_attempts: u32::try_from(attempts).unwrap_or(0),
        locked_until: row.try_get("locked_until")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant, StoreError> {
    Ok(Tenant {
        id: TenantId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        email: row.try_get("email")?,
        plan: row.try_get("plan")?,
        max_users: row.try_get("max_users")?,
        max_processes: row.try_get("max_processes")?,
        active: row.try_get("active")?,
        suspended: row.try_get("suspended")?,
        suspension_reason: row.try_get("suspension_reason")?,
        settings: row.try_get("settings")?,
        branding: row.try_get("branding")?,
        created_at: row.try_get("created_at")?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<Membership, StoreError> {
    Ok(Membership {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        role: role_column(row, "role")?,
        permissions: permission_column(row, "permissions")?,
        department: row.try_get("department")?,
        position: row.try_get("position")?,
        active: row.try_get("active")?,
        primary_admin: row.try_get("primary_admin")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn portal_client_from_row(row: &PgRow) -> Result<PortalClient, StoreError> {
    Ok(PortalClient {
        id: PortalClientId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        active: row.try_get("active")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<TemporaryPermission, StoreError> {
    let revoked_by: Option<Uuid> = row.try_get("revoked_by")?;
    Ok(TemporaryPermission {
        id: GrantId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        permissions: permission_column(row, "permissions")?,
        snapshot: permission_column(row, "snapshot")?,
        granted_by: UserId::from_uuid(row.try_get("granted_by")?),
        reason: row.try_get("reason")?,
        granted_at: row.try_get("granted_at")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
        auto_expired: row.try_get("auto_expired")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_by: revoked_by.map(UserId::from_uuid),
    })
}

fn role_from_row(row: &PgRow) -> Result<TemporaryRoleAssignment, StoreError> {
    let revoked_by: Option<Uuid> = row.try_get("revoked_by")?;
    Ok(TemporaryRoleAssignment {
        id: GrantId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        role: role_column(row, "role")?,
        original_role: role_column(row, "original_role")?,
        granted_by: UserId::from_uuid(row.try_get("granted_by")?),
        reason: row.try_get("reason")?,
        granted_at: row.try_get("granted_at")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
        auto_expired: row.try_get("auto_expired")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_by: revoked_by.map(UserId::from_uuid),
    })
}

fn record_from_row(row: &PgRow) -> Result<Record, StoreError> {
    let client_id: Option<Uuid> = row.try_get("client_id")?;
    let data = match row.try_get::<Value, _>("data")? {
        Value::Object(map) => map,
        other => return Err(corrupt("record data", format!("expected object, got {other}"))),
    };
    Ok(Record {
        id: RecordId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        client_id: client_id.map(PortalClientId::from_uuid),
        data,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let tenant_id: Option<Uuid> = row.try_get("tenant_id")?;
    let actor: Value = row.try_get("actor")?;
    let action: String = row.try_get("action")?;
    let outcome: String = row.try_get("outcome")?;
    Ok(AuditRecord {
        id: AuditId::from_uuid(row.try_get("id")?),
        occurred_at: row.try_get("occurred_at")?,
        actor: serde_json::from_value::<Actor>(actor).map_err(|e| corrupt("audit_log.actor", e))?,
        tenant_id: tenant_id.map(TenantId::from_uuid),
        action: AuditAction::parse(&action).ok_or_else(|| corrupt("audit_log.action", &action))?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        outcome: AuditOutcome::parse(&outcome).ok_or_else(|| corrupt("audit_log.outcome", &outcome))?,
        cause: row.try_get("cause")?,
        ip: row.try_get("ip")?,
        user_agent: row.try_get("user_agent")?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        details: row.try_get("details")?,
    })
}

fn lookup_active<T>(row: Option<PgRow>, map: fn(&PgRow) -> Result<T, StoreError>) -> Result<Lookup<T>, StoreError> {
    let Some(row) = row else {
        return Ok(Lookup::NotFound);
    };
    if !row.try_get::<bool, _>("active")? {
        return Ok(Lookup::Inactive);
    }
    Ok(Lookup::Found(map(&row)?))
}

fn lookup_tenant(row: Option<PgRow>) -> Result<Lookup<Tenant>, StoreError> {
    let Some(row) = row else {
        return Ok(Lookup::NotFound);
    };
    let tenant = tenant_from_row(&row)?;
    Ok(match tenant.availability() {
        Ok(()) => Lookup::Found(tenant),
        Err(juris_auth::TenantUnavailable::Inactive) => Lookup::Inactive,
        Err(juris_auth::TenantUnavailable::Suspended) => Lookup::Suspended,
    })
}

async fn insert_audit<'e, E>(exec: E, record: &AuditRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let actor = serde_json::to_value(&record.actor).map_err(|e| corrupt("audit actor", e))?;
    let query = "INSERT INTO audit_log (id, occurred_at, actor, tenant_id, action, resource_type, resource_id, \
                 outcome, cause, ip, user_agent, old_value, new_value, details) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)";
    sqlx::query(query)
        .bind(record.id.as_uuid())
        .bind(record.occurred_at)
        .bind(actor)
        .bind(record.tenant_id.map(|t| *t.as_uuid()))
        .bind(record.action.as_str())
        .bind(record.resource_type.as_deref())
        .bind(record.resource_id.as_deref())
        .bind(record.outcome.as_str())
        .bind(record.cause.as_deref())
        .bind(record.ip.as_deref())
        .bind(record.user_agent.as_deref())
        .bind(record.old_value.clone())
        .bind(record.new_value.clone())
        .bind(record.details.clone())
        .execute(exec)
        .instrument(db_span("INSERT", "audit_log"))
        .await
        .map_err(|e| map_sqlx_error("insert_audit", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// PrincipalStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl PrincipalStore for PgStore {
    async fn find_superadmin_by_email(&self, email: &str) -> Result<Lookup<Superadmin>, StoreError> {
        let query = format!("SELECT {SUPERADMIN_COLUMNS} FROM superadmins WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "superadmins"))
            .await?;
        lookup_active(row, superadmin_from_row)
    }

    async fn find_superadmin_by_id(&self, id: SuperadminId) -> Result<Lookup<Superadmin>, StoreError> {
        let query = format!("SELECT {SUPERADMIN_COLUMNS} FROM superadmins WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "superadmins"))
            .await?;
        lookup_active(row, superadmin_from_row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Lookup<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "users"))
            .await?;
        lookup_active(row, user_from_row)
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Lookup<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "users"))
            .await?;
        lookup_active(row, user_from_row)
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Lookup<Tenant>, StoreError> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = $1");
        let row = sqlx::query(&query)
            .bind(slug)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "tenants"))
            .await?;
        lookup_tenant(row)
    }

    async fn find_tenant_by_id(&self, id: TenantId) -> Result<Lookup<Tenant>, StoreError> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "tenants"))
            .await?;
        lookup_tenant(row)
    }

    async fn find_membership(&self, tenant_id: TenantId, user_id: UserId) -> Result<Lookup<Membership>, StoreError> {
        let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM tenant_users WHERE tenant_id = $1 AND user_id = $2");
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "tenant_users"))
            .await?;
        lookup_active(row, membership_from_row)
    }

    async fn find_portal_client_by_id(&self, id: PortalClientId) -> Result<Lookup<PortalClient>, StoreError> {
        let row = sqlx::query("SELECT id, tenant_id, name, email, phone, active FROM portal_clients WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "portal_clients"))
            .await?;
        lookup_active(row, portal_client_from_row)
    }

    async fn list_active_memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM tenant_users WHERE user_id = $1 AND active");
        let rows = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "tenant_users"))
            .await?;
        rows.iter().map(membership_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AccountStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl AccountStore for PgStore {
    #[instrument(skip(self, policy), fields(user_id = %user_id), err)]
    async fn record_login_failure(
        &self,
        user_id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailedLogin, StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", "users"))
            .await?
            .ok_or(StoreError::NotFound)?;
        let mut user = user_from_row(&row)?;
        let newly_locked = user.record_failed_login(policy, now);

        sqlx::query(
            "UPDATE users SET failed_login_attempts = $2, locked_until = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .bind(i32::try_from(user.failed_login_attempts).unwrap_or(i32::MAX))
        .bind(user.locked_until)
        .bind(now)
        .execute(&mut *tx)
        .instrument(db_span("UPDATE", "users"))
        .await?;

        tx.commit().await?;
        Ok(FailedLogin {
            attempts: user.failed_login_attempts,
            locked_until: user.locked_until,
            newly_locked,
        })
    }

    async fn record_login_success(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $2, updated_at = $2 \
             WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $2)",
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .instrument(db_span("UPDATE", "users"))
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "users"))
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn record_superadmin_login(&self, id: SuperadminId, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE superadmins SET last_login_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", "superadmins"))
            .await?;
        Ok(())
    }

    async fn update_user_password_hash(&self, user_id: UserId, hash: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", "users"))
            .await?;
        Ok(())
    }

    async fn update_superadmin_password_hash(&self, id: SuperadminId, hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE superadmins SET password_hash = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", "superadmins"))
            .await?;
        Ok(())
    }

    async fn user_record(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "users"))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn membership_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<Option<Membership>, StoreError> {
        let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM tenant_users WHERE tenant_id = $1 AND user_id = $2");
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "tenant_users"))
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn clear_lockout(&self, user_id: UserId, now: DateTime<Utc>) -> Result<User, StoreError> {
        let query = format!(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, updated_at = $2 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", "users"))
            .await?
            .ok_or(StoreError::NotFound)?;
        user_from_row(&row)
    }

    async fn set_membership_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {MEMBERSHIP_COLUMNS} FROM tenant_users WHERE tenant_id = $1 AND user_id = $2 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", "tenant_users"))
            .await?
            .ok_or(StoreError::NotFound)?;
        let mut membership = membership_from_row(&row)?;

        if !active {
            // Lock the other primary admins so two concurrent demotions cannot both pass the count.
            let others = sqlx::query(
                "SELECT user_id FROM tenant_users \
                 WHERE tenant_id = $1 AND user_id <> $2 AND active AND primary_admin FOR UPDATE",
            )
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_all(&mut *tx)
            .instrument(db_span("SELECT", "tenant_users"))
            .await?;
            ensure_primary_admin_remains(&membership, others.len())
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
        }
        membership
            .set_active(active, now)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        sqlx::query("UPDATE tenant_users SET active = $3, updated_at = $4 WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(active)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", "tenant_users"))
            .await?;

        tx.commit().await?;
        Ok(membership)
    }

    async fn insert_superadmin(&self, admin: &Superadmin) -> Result<(), StoreError> {
        let permissions = serde_json::to_value(&admin.permissions).map_err(|e| corrupt("superadmin permissions", e))?;
        sqlx::query(
            "INSERT INTO superadmins (id, name, email, password_hash, permissions, active, last_login_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(admin.id.as_uuid())
        .bind(&admin.name)
        .bind(&admin.email)
        .bind(&admin.password_hash)
        .bind(permissions)
        .bind(admin.active)
        .bind(admin.last_login_at)
        .bind(admin.created_at)
        .execute(&self.pool)
        .instrument(db_span("INSERT", "superadmins"))
        .await
        .map_err(|e| map_sqlx_error("insert_superadmin", e))?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        insert_user_row(&self.pool, user).await
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<(), StoreError> {
        insert_membership_row(&self.pool, membership).await
    }

    async fn insert_portal_client(&self, client: &PortalClient) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO portal_clients (id, tenant_id, name, email, phone, active) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(client.id.as_uuid())
            .bind(client.tenant_id.as_uuid())
            .bind(&client.name)
            .bind(client.email.as_deref())
            .bind(client.phone.as_deref())
            .bind(client.active)
            .execute(&self.pool)
            .instrument(db_span("INSERT", "portal_clients"))
            .await
            .map_err(|e| map_sqlx_error("insert_portal_client", e))?;
        Ok(())
    }
}

async fn insert_user_row<'e, E>(exec: E, user: &User) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, oab_number, oab_state, phone, specialty, timezone, \
         language, active, email_verified, failed_login_attempts, locked_until, last_login_at, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(user.id.as_uuid())
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.oab_number.as_deref())
    .bind(user.oab_state.as_deref())
    .bind(user.phone.as_deref())
    .bind(user.specialty.as_deref())
    .bind(&user.timezone)
    .bind(&user.language)
    .bind(user.active)
    .bind(user.email_verified)
    .bind(i32::try_from(user.failed_login_attempts).unwrap_or(i32::MAX))
    .bind(user.locked_until)
    .bind(user.last_login_at)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(exec)
    .instrument(db_span("INSERT", "users"))
    .await
    .map_err(|e| map_sqlx_error("insert_user", e))?;
    Ok(())
}

async fn insert_membership_row<'e, E>(exec: E, membership: &Membership) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO tenant_users (tenant_id, user_id, role, permissions, department, position, active, \
         primary_admin, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(membership.tenant_id.as_uuid())
    .bind(membership.user_id.as_uuid())
    .bind(membership.role.as_str())
    .bind(Value::from(membership.permissions.clone()))
    .bind(membership.department.as_deref())
    .bind(membership.position.as_deref())
    .bind(membership.active)
    .bind(membership.primary_admin)
    .bind(membership.created_at)
    .bind(membership.updated_at)
    .execute(exec)
    .instrument(db_span("INSERT", "tenant_users"))
    .await
    .map_err(|e| map_sqlx_error("insert_membership", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// TenantStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl TenantStore for PgStore {
    #[instrument(skip_all, fields(tenant_id = %tenant.id, slug = %tenant.slug), err)]
    async fn create_tenant_with_admin(
        &self,
        tenant: &Tenant,
        admin: &User,
        membership: &Membership,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO tenants (id, name, slug, email, plan, max_users, max_processes, active, suspended, \
             suspension_reason, settings, branding, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(tenant.id.as_uuid())
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.email)
        .bind(&tenant.plan)
        .bind(tenant.max_users)
        .bind(tenant.max_processes)
        .bind(tenant.active)
        .bind(tenant.suspended)
        .bind(tenant.suspension_reason.as_deref())
        .bind(tenant.settings.clone())
        .bind(tenant.branding.clone())
        .bind(tenant.created_at)
        .execute(&mut *tx)
        .instrument(db_span("INSERT", "tenants"))
        .await
        .map_err(|e| map_sqlx_error("create_tenant", e))?;

        insert_user_row(&mut *tx, admin).await?;
        insert_membership_row(&mut *tx, membership).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn tenant_record(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "tenants"))
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn save_tenant_state(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tenants SET active = $2, suspended = $3, suspension_reason = $4 WHERE id = $1")
            .bind(tenant.id.as_uuid())
            .bind(tenant.active)
            .bind(tenant.suspended)
            .bind(tenant.suspension_reason.as_deref())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", "tenants"))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_at, id");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "tenants"))
            .await?;
        rows.iter().map(tenant_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GrantStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl GrantStore for PgStore {
    #[instrument(skip_all, fields(tenant_id = %grant.tenant_id, user_id = %grant.user_id), err)]
    async fn insert_permission(&self, grant: &TemporaryPermission, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO temporary_permissions (id, user_id, tenant_id, permissions, snapshot, granted_by, reason, \
             granted_at, expires_at, active, auto_expired, revoked_at, revoked_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(grant.id.as_uuid())
        .bind(grant.user_id.as_uuid())
        .bind(grant.tenant_id.as_uuid())
        .bind(Value::from(grant.permissions.clone()))
        .bind(Value::from(grant.snapshot.clone()))
        .bind(grant.granted_by.as_uuid())
        .bind(&grant.reason)
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .bind(grant.active)
        .bind(grant.auto_expired)
        .bind(grant.revoked_at)
        .bind(grant.revoked_by.map(|u| *u.as_uuid()))
        .execute(&mut *tx)
        .instrument(db_span("INSERT", "temporary_permissions"))
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tenant_id = %assignment.tenant_id, user_id = %assignment.user_id), err)]
    async fn insert_role(&self, assignment: &TemporaryRoleAssignment, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO temporary_roles (id, user_id, tenant_id, role, original_role, granted_by, reason, \
             granted_at, expires_at, active, auto_expired, revoked_at, revoked_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(assignment.id.as_uuid())
        .bind(assignment.user_id.as_uuid())
        .bind(assignment.tenant_id.as_uuid())
        .bind(assignment.role.as_str())
        .bind(assignment.original_role.as_str())
        .bind(assignment.granted_by.as_uuid())
        .bind(&assignment.reason)
        .bind(assignment.granted_at)
        .bind(assignment.expires_at)
        .bind(assignment.active)
        .bind(assignment.auto_expired)
        .bind(assignment.revoked_at)
        .bind(assignment.revoked_by.map(|u| *u.as_uuid()))
        .execute(&mut *tx)
        .instrument(db_span("INSERT", "temporary_roles"))
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn active_permissions(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<TemporaryPermission>, StoreError> {
        let query = format!(
            "SELECT {PERMISSION_COLUMNS} FROM temporary_permissions WHERE tenant_id = $1 AND user_id = $2 AND active"
        );
        let rows = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "temporary_permissions"))
            .await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn active_roles(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<TemporaryRoleAssignment>, StoreError> {
        let query =
            format!("SELECT {ROLE_COLUMNS} FROM temporary_roles WHERE tenant_id = $1 AND user_id = $2 AND active");
        let rows = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "temporary_roles"))
            .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn permission_record(&self, tenant_id: TenantId, id: GrantId) -> Result<Option<TemporaryPermission>, StoreError> {
        let query = format!("SELECT {PERMISSION_COLUMNS} FROM temporary_permissions WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "temporary_permissions"))
            .await?;
        row.as_ref().map(permission_from_row).transpose()
    }

    async fn role_record(&self, tenant_id: TenantId, id: GrantId) -> Result<Option<TemporaryRoleAssignment>, StoreError> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM temporary_roles WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "temporary_roles"))
            .await?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self, audit), fields(tenant_id = %tenant_id, grant_id = %id), err)]
    async fn revoke_permission(
        &self,
        tenant_id: TenantId,
        id: GrantId,
        by: UserId,
        now: DateTime<Utc>,
        audit: &AuditRecord,
    ) -> Result<Option<TemporaryPermission>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "UPDATE temporary_permissions SET active = FALSE, revoked_at = $3, revoked_by = $4 \
             WHERE tenant_id = $1 AND id = $2 AND active RETURNING {PERMISSION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .bind(now)
            .bind(by.as_uuid())
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", "temporary_permissions"))
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let revoked = permission_from_row(&row)?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(Some(revoked))
    }

    #[instrument(skip(self, audit), fields(tenant_id = %tenant_id, grant_id = %id), err)]
    async fn revoke_role(
        &self,
        tenant_id: TenantId,
        id: GrantId,
        by: UserId,
        now: DateTime<Utc>,
        audit: &AuditRecord,
    ) -> Result<Option<TemporaryRoleAssignment>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "UPDATE temporary_roles SET active = FALSE, revoked_at = $3, revoked_by = $4 \
             WHERE tenant_id = $1 AND id = $2 AND active RETURNING {ROLE_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .bind(now)
            .bind(by.as_uuid())
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", "temporary_roles"))
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let revoked = role_from_row(&row)?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(Some(revoked))
    }

    #[instrument(skip(self), err)]
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Option<ReapReport>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let lock_query = "SELECT pg_try_advisory_xact_lock($1) AS locked";
        let locked: bool = sqlx::query(lock_query)
            .bind(REAPER_LOCK_KEY)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", lock_query))
            .await?
            .try_get("locked")?;
        if !locked {
            tx.rollback().await?;
            return Ok(None);
        }

        let mut report = ReapReport::default();

        let query = format!(
            "UPDATE temporary_permissions SET active = FALSE, auto_expired = TRUE \
             WHERE active AND expires_at <= $1 RETURNING {PERMISSION_COLUMNS}"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&mut *tx)
            .instrument(db_span("UPDATE", "temporary_permissions"))
            .await?;
        for row in &rows {
            let grant = permission_from_row(row)?;
            insert_audit(&mut *tx, &AuditRecord::permission_expired(&grant, now)).await?;
            report.expired_permissions.push(grant.id);
        }

        let query = format!(
            "UPDATE temporary_roles SET active = FALSE, auto_expired = TRUE \
             WHERE active AND expires_at <= $1 RETURNING {ROLE_COLUMNS}"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&mut *tx)
            .instrument(db_span("UPDATE", "temporary_roles"))
            .await?;
        for row in &rows {
            let assignment = role_from_row(row)?;
            insert_audit(&mut *tx, &AuditRecord::role_expired(&assignment, now)).await?;
            report.expired_roles.push(assignment.id);
        }

        tx.commit().await?;
        Ok(Some(report))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AuditLog
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl AuditLog for PgStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        insert_audit(&self.pool, record).await
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log \
             WHERE ($1::uuid IS NULL OR tenant_id = $1) AND ($2::text IS NULL OR action = $2) \
             ORDER BY occurred_at DESC, id DESC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(query.tenant_id.map(|t| *t.as_uuid()))
            .bind(query.action.map(|a| a.as_str()))
            .bind(query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", "audit_log"))
            .await?;
        rows.iter().map(audit_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordStore
// ─────────────────────────────────────────────────────────────────────────────

/// Shared scope predicate; `$1` = tenant, `$2` = optional client.
const SCOPE_PREDICATE: &str =
    "tenant_id = $1 AND ($2::uuid IS NULL OR client_id = $2) AND deleted_at IS NULL";

fn scope_client(scope: &Scope) -> Option<Uuid> {
    scope.client_id.map(|c| *c.as_uuid())
}

#[async_trait::async_trait]
impl RecordStore for PgStore {
    #[instrument(skip(self, scope), fields(tenant_id = %scope.tenant_id, table = kind.table()), err)]
    async fn fetch(&self, kind: EntityKind, scope: &Scope, id: RecordId) -> Result<Option<Record>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM {table} WHERE {SCOPE_PREDICATE} AND id = $3",
            table = kind.table()
        );
        let row = sqlx::query(&query)
            .bind(scope.tenant_id.as_uuid())
            .bind(scope_client(scope))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", kind.table()))
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self, scope, filter), fields(tenant_id = %scope.tenant_id, table = kind.table()), err)]
    async fn scan(&self, kind: EntityKind, scope: &Scope, filter: &RecordFilter) -> Result<Vec<Record>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM {table} WHERE {SCOPE_PREDICATE} AND data @> $3 \
             ORDER BY created_at, id LIMIT $4 OFFSET $5",
            table = kind.table()
        );
        let rows = sqlx::query(&query)
            .bind(scope.tenant_id.as_uuid())
            .bind(scope_client(scope))
            .bind(Value::Object(filter.equals.clone()))
            .bind(filter.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)))
            .bind(i64::try_from(filter.offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", kind.table()))
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self, record, audit), fields(tenant_id = %record.tenant_id, table = kind.table()), err)]
    async fn insert(&self, kind: EntityKind, record: &Record, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "INSERT INTO {table} (id, tenant_id, client_id, data, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            table = kind.table()
        );
        sqlx::query(&query)
            .bind(record.id.as_uuid())
            .bind(record.tenant_id.as_uuid())
            .bind(record.client_id.map(|c| *c.as_uuid()))
            .bind(Value::Object(record.data.clone()))
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.deleted_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", kind.table()))
            .await
            .map_err(|e| map_sqlx_error("insert_record", e))?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, scope, fields, audit), fields(tenant_id = %scope.tenant_id, table = kind.table()), err)]
    async fn patch(
        &self,
        kind: EntityKind,
        scope: &Scope,
        id: RecordId,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
        audit: AuditRecord,
    ) -> Result<Option<(Record, Record)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {RECORD_COLUMNS} FROM {table} WHERE {SCOPE_PREDICATE} AND id = $3 FOR UPDATE",
            table = kind.table()
        );
        let Some(row) = sqlx::query(&select)
            .bind(scope.tenant_id.as_uuid())
            .bind(scope_client(scope))
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", kind.table()))
            .await?
        else {
            return Ok(None);
        };
        let before = record_from_row(&row)?;

        let update = format!(
            "UPDATE {table} SET data = data || $4, updated_at = $5 WHERE {SCOPE_PREDICATE} AND id = $3 \
             RETURNING {RECORD_COLUMNS}",
            table = kind.table()
        );
        let row = sqlx::query(&update)
            .bind(scope.tenant_id.as_uuid())
            .bind(scope_client(scope))
            .bind(id.as_uuid())
            .bind(Value::Object(fields.clone()))
            .bind(now)
            .fetch_one(&mut *tx)
            .instrument(db_span("UPDATE", kind.table()))
            .await?;
        let after = record_from_row(&row)?;

        let audit = audit.diff(
            Some(Value::Object(before.data.clone())),
            Some(Value::Object(after.data.clone())),
        );
        insert_audit(&mut *tx, &audit).await?;

        tx.commit().await?;
        Ok(Some((before, after)))
    }

    #[instrument(skip(self, scope, audit), fields(tenant_id = %scope.tenant_id, table = kind.table()), err)]
    async fn mark_deleted(
        &self,
        kind: EntityKind,
        scope: &Scope,
        id: RecordId,
        now: DateTime<Utc>,
        audit: AuditRecord,
    ) -> Result<Option<Record>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "UPDATE {table} SET deleted_at = $4, updated_at = $4 WHERE {SCOPE_PREDICATE} AND id = $3 \
             RETURNING {RECORD_COLUMNS}",
            table = kind.table()
        );
        let row = sqlx::query(&query)
            .bind(scope.tenant_id.as_uuid())
            .bind(scope_client(scope))
            .bind(id.as_uuid())
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", kind.table()))
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let deleted = record_from_row(&row)?;

        let audit = audit.diff(Some(Value::Object(deleted.data.clone())), None);
        insert_audit(&mut *tx, &audit).await?;

        tx.commit().await?;
        Ok(Some(deleted))
    }
}
