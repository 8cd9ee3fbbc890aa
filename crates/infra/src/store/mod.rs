//! Storage contracts for the identity/tenancy core.
//!
//! Every trait is implemented twice: [`InMemoryStore`] for tests and local
//! development, [`PgStore`] for production. [`Stores`] bundles one backend
//! behind trait objects so services never name the concrete type.
//!
//! Read-side lookups ([`PrincipalStore`]) apply the active/suspended predicates
//! and hand back a [`Lookup`]: callers learn *why* an entity is unavailable but
//! never receive the inactive entity itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use juris_auth::{
    AuditQuery, AuditRecord, LockoutPolicy, Membership, PortalClient, Superadmin, TemporaryPermission,
    TemporaryRoleAssignment, Tenant, User,
};
use juris_core::{GrantId, PortalClientId, RecordId, SuperadminId, TenantId, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Result of a predicate-applying lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Inactive,
    Suspended,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Principals (read model)
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_superadmin_by_email(&self, email: &str) -> Result<Lookup<Superadmin>, StoreError>;
    async fn find_superadmin_by_id(&self, id: SuperadminId) -> Result<Lookup<Superadmin>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Lookup<User>, StoreError>;
    async fn find_user_by_id(&self, id: UserId) -> Result<Lookup<User>, StoreError>;
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Lookup<Tenant>, StoreError>;
    async fn find_tenant_by_id(&self, id: TenantId) -> Result<Lookup<Tenant>, StoreError>;
    async fn find_membership(&self, tenant_id: TenantId, user_id: UserId) -> Result<Lookup<Membership>, StoreError>;
    async fn find_portal_client_by_id(&self, id: PortalClientId) -> Result<Lookup<PortalClient>, StoreError>;
    /// Active memberships of a user, in no particular order.
    async fn list_active_memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Account writes
// ─────────────────────────────────────────────────────────────────────────────

/// Counter state after a failed login was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// This failure crossed the threshold.
    pub newly_locked: bool,
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Count a failure atomically (no lost increments under concurrency).
    async fn record_login_failure(
        &self,
        user_id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailedLogin, StoreError>;
    /// Reset the counters and stamp `last_login_at`, unless a lock is in
    /// force at `now`. Returns `false` (and changes nothing) when locked.
    async fn record_login_success(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn record_superadmin_login(&self, id: SuperadminId, now: DateTime<Utc>) -> Result<(), StoreError>;
    async fn update_user_password_hash(&self, user_id: UserId, hash: &str, now: DateTime<Utc>) -> Result<(), StoreError>;
    async fn update_superadmin_password_hash(&self, id: SuperadminId, hash: &str) -> Result<(), StoreError>;

    /// Unfiltered user row; administrative writes only.
    async fn user_record(&self, user_id: UserId) -> Result<Option<User>, StoreError>;
    /// Unfiltered membership row; administrative writes only.
    async fn membership_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<Option<Membership>, StoreError>;
    /// Zero the failure counter and drop the lock. Touches nothing else.
    async fn clear_lockout(&self, user_id: UserId, now: DateTime<Utc>) -> Result<User, StoreError>;
    /// Flip one membership's `active` flag.
    ///
    /// A no-op transition is a [`StoreError::Conflict`], and so is
    /// deactivating the tenant's last active primary admin. The check and the
    /// write are atomic.
    async fn set_membership_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Membership, StoreError>;

    async fn insert_superadmin(&self, admin: &Superadmin) -> Result<(), StoreError>;
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn insert_membership(&self, membership: &Membership) -> Result<(), StoreError>;
    async fn insert_portal_client(&self, client: &PortalClient) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant administration
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    /// Insert tenant, its primary admin user and membership in one transaction.
    /// A taken slug or email is a [`StoreError::Conflict`].
    async fn create_tenant_with_admin(
        &self,
        tenant: &Tenant,
        admin: &User,
        membership: &Membership,
    ) -> Result<(), StoreError>;
    /// Unfiltered tenant row.
    async fn tenant_record(&self, id: TenantId) -> Result<Option<Tenant>, StoreError>;
    /// Persist `active`, `suspended` and `suspension_reason`.
    async fn save_tenant_state(&self, tenant: &Tenant) -> Result<(), StoreError>;
    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Temporary grants
// ─────────────────────────────────────────────────────────────────────────────

/// What one reaper pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub expired_permissions: Vec<GrantId>,
    pub expired_roles: Vec<GrantId>,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.expired_permissions.len() + self.expired_roles.len()
    }
}

#[async_trait::async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert a grant together with its audit record.
    async fn insert_permission(&self, grant: &TemporaryPermission, audit: &AuditRecord) -> Result<(), StoreError>;
    async fn insert_role(&self, assignment: &TemporaryRoleAssignment, audit: &AuditRecord) -> Result<(), StoreError>;

    /// Rows still flagged active for `(tenant, user)`; callers filter by time.
    async fn active_permissions(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<TemporaryPermission>, StoreError>;
    async fn active_roles(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<TemporaryRoleAssignment>, StoreError>;

    async fn permission_record(&self, tenant_id: TenantId, id: GrantId) -> Result<Option<TemporaryPermission>, StoreError>;
    async fn role_record(&self, tenant_id: TenantId, id: GrantId) -> Result<Option<TemporaryRoleAssignment>, StoreError>;

    /// Flip an active grant to revoked. `None` if it is absent, in another
    /// tenant, or already inactive.
    async fn revoke_permission(
        &self,
        tenant_id: TenantId,
        id: GrantId,
        by: UserId,
        now: DateTime<Utc>,
        audit: &AuditRecord,
    ) -> Result<Option<TemporaryPermission>, StoreError>;
    async fn revoke_role(
        &self,
        tenant_id: TenantId,
        id: GrantId,
        by: UserId,
        now: DateTime<Utc>,
        audit: &AuditRecord,
    ) -> Result<Option<TemporaryRoleAssignment>, StoreError>;

    /// Expire every due grant and write one audit record per row, atomically.
    /// `None` when another pass holds the reaper lock.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Option<ReapReport>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;
    /// Newest first.
    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant-owned records
// ─────────────────────────────────────────────────────────────────────────────

/// Domain tables reachable through the tenant guard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Clients,
    Processes,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Clients => "clients",
            EntityKind::Processes => "processes",
        }
    }

    pub fn module(&self) -> juris_auth::Module {
        match self {
            EntityKind::Clients => juris_auth::Module::Clients,
            EntityKind::Processes => juris_auth::Module::Processes,
        }
    }
}

/// Isolation scope injected into every record predicate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Scope {
    pub tenant_id: TenantId,
    /// Portal scope: additionally restrict to rows owned by this client.
    pub client_id: Option<PortalClientId>,
}

impl Scope {
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            client_id: None,
        }
    }

    pub fn portal(tenant_id: TenantId, client_id: PortalClientId) -> Self {
        Self {
            tenant_id,
            client_id: Some(client_id),
        }
    }

    pub fn admits(&self, record: &Record) -> bool {
        record.tenant_id == self.tenant_id
            && record.deleted_at.is_none()
            && self.client_id.is_none_or(|c| record.client_id == Some(c))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub client_id: Option<PortalClientId>,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Equality filter over top-level `data` fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub equals: Map<String, Value>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RecordFilter {
    pub fn matches(&self, record: &Record) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| record.data.get(k) == Some(v))
    }
}

/// Raw record access. Every call takes the scope; the store applies it as a
/// predicate and never widens it.
///
/// Writes take their audit record and commit it together with the row. For
/// `patch` and `mark_deleted` the store fills in the before/after data.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, kind: EntityKind, scope: &Scope, id: RecordId) -> Result<Option<Record>, StoreError>;
    /// Ordered by `created_at`, then id.
    async fn scan(&self, kind: EntityKind, scope: &Scope, filter: &RecordFilter) -> Result<Vec<Record>, StoreError>;
    async fn insert(&self, kind: EntityKind, record: &Record, audit: &AuditRecord) -> Result<(), StoreError>;
    /// Shallow-merge `fields` into `data`. Returns `(before, after)`.
    async fn patch(
        &self,
        kind: EntityKind,
        scope: &Scope,
        id: RecordId,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
        audit: AuditRecord,
    ) -> Result<Option<(Record, Record)>, StoreError>;
    async fn mark_deleted(
        &self,
        kind: EntityKind,
        scope: &Scope,
        id: RecordId,
        now: DateTime<Utc>,
        audit: AuditRecord,
    ) -> Result<Option<Record>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// One storage backend seen through every contract.
#[derive(Clone)]
pub struct Stores {
    pub principals: Arc<dyn PrincipalStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub grants: Arc<dyn GrantStore>,
    pub audit: Arc<dyn AuditLog>,
    pub records: Arc<dyn RecordStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: PrincipalStore + AccountStore + TenantStore + GrantStore + AuditLog + RecordStore + 'static,
    {
        Self {
            principals: backend.clone(),
            accounts: backend.clone(),
            tenants: backend.clone(),
            grants: backend.clone(),
            audit: backend.clone(),
            records: backend,
        }
    }

    pub fn in_memory() -> (Self, Arc<InMemoryStore>) {
        let backend = Arc::new(InMemoryStore::new());
        (Self::from_backend(backend.clone()), backend)
    }
}

impl core::fmt::Debug for Stores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
