//! In-memory backend for tests and local development.
//!
//! A single `RwLock` guards all tables, so every trait method is atomic with
//! respect to the others. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use juris_auth::user::normalize_email;
use juris_auth::{
    AuditQuery, AuditRecord, LockoutPolicy, Membership, PortalClient, Superadmin, TemporaryPermission,
    TemporaryRoleAssignment, Tenant, User, ensure_primary_admin_remains,
};
use juris_core::{GrantId, PortalClientId, RecordId, SuperadminId, TenantId, UserId};

use super::{
    AccountStore, AuditLog, EntityKind, FailedLogin, GrantStore, Lookup, PrincipalStore, ReapReport, Record,
    RecordFilter, RecordStore, Scope, StoreError, TenantStore,
};

#[derive(Debug, Default)]
struct Tables {
    superadmins: HashMap<SuperadminId, Superadmin>,
    users: HashMap<UserId, User>,
    tenants: HashMap<TenantId, Tenant>,
    memberships: HashMap<(TenantId, UserId), Membership>,
    portal_clients: HashMap<PortalClientId, PortalClient>,
    temporary_permissions: HashMap<GrantId, TemporaryPermission>,
    temporary_roles: HashMap<GrantId, TemporaryRoleAssignment>,
    records: HashMap<(EntityKind, RecordId), Record>,
    audit: Vec<AuditRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    /// Stand-in for the Postgres advisory lock.
    reaper: Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Seed a tenant directly (tests and local bootstrap).
    pub fn insert_tenant(&self, tenant: Tenant) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.tenants.values().any(|x| x.slug == tenant.slug) {
            return Err(StoreError::Conflict(format!("slug '{}' already taken", tenant.slug)));
        }
        t.tenants.insert(tenant.id, tenant);
        Ok(())
    }

    /// Overwrite a stored user row (tests).
    pub fn put_user(&self, user: User) -> Result<(), StoreError> {
        self.write()?.users.insert(user.id, user);
        Ok(())
    }

    /// Overwrite a stored tenant row (tests).
    pub fn put_tenant(&self, tenant: Tenant) -> Result<(), StoreError> {
        self.write()?.tenants.insert(tenant.id, tenant);
        Ok(())
    }

    /// Seed a record directly (tests).
    pub fn put_record(&self, kind: EntityKind, record: Record) -> Result<(), StoreError> {
        self.write()?.records.insert((kind, record.id), record);
        Ok(())
    }

    pub fn audit_records(&self) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self.read()?.audit.clone())
    }
}

fn membership_lookup(m: Option<&Membership>) -> Lookup<Membership> {
    match m {
        None => Lookup::NotFound,
        Some(m) if !m.active => Lookup::Inactive,
        Some(m) => Lookup::Found(m.clone()),
    }
}

fn tenant_lookup(t: Option<&Tenant>) -> Lookup<Tenant> {
    match t {
        None => Lookup::NotFound,
        Some(t) if !t.active => Lookup::Inactive,
        Some(t) if t.suspended => Lookup::Suspended,
        Some(t) => Lookup::Found(t.clone()),
    }
}

fn user_lookup(u: Option<&User>) -> Lookup<User> {
    match u {
        None => Lookup::NotFound,
        Some(u) if !u.active => Lookup::Inactive,
        Some(u) => Lookup::Found(u.clone()),
    }
}

fn superadmin_lookup(s: Option<&Superadmin>) -> Lookup<Superadmin> {
    match s {
        None => Lookup::NotFound,
        Some(s) if !s.active => Lookup::Inactive,
        Some(s) => Lookup::Found(s.clone()),
    }
}

#[async_trait::async_trait]
impl PrincipalStore for InMemoryStore {
    async fn find_superadmin_by_email(&self, email: &str) -> Result<Lookup<Superadmin>, StoreError> {
        let email = normalize_email(email);
        let t = self.read()?;
        Ok(superadmin_lookup(t.superadmins.values().find(|s| s.email == email)))
    }

    async fn find_superadmin_by_id(&self, id: SuperadminId) -> Result<Lookup<Superadmin>, StoreError> {
        Ok(superadmin_lookup(self.read()?.superadmins.get(&id)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Lookup<User>, StoreError> {
        let email = normalize_email(email);
        let t = self.read()?;
        Ok(user_lookup(t.users.values().find(|u| u.email == email)))
    }

    async fn find_user_by_id(&self, id: UserId) -> Result<Lookup<User>, StoreError> {
        Ok(user_lookup(self.read()?.users.get(&id)))
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Lookup<Tenant>, StoreError> {
        let t = self.read()?;
        Ok(tenant_lookup(t.tenants.values().find(|x| x.slug == slug)))
    }

    async fn find_tenant_by_id(&self, id: TenantId) -> Result<Lookup<Tenant>, StoreError> {
        Ok(tenant_lookup(self.read()?.tenants.get(&id)))
    }

    async fn find_membership(&self, tenant_id: TenantId, user_id: UserId) -> Result<Lookup<Membership>, StoreError> {
        Ok(membership_lookup(self.read()?.memberships.get(&(tenant_id, user_id))))
    }

    async fn find_portal_client_by_id(&self, id: PortalClientId) -> Result<Lookup<PortalClient>, StoreError> {
        Ok(match self.read()?.portal_clients.get(&id) {
            None => Lookup::NotFound,
            Some(c) if !c.active => Lookup::Inactive,
            Some(c) => Lookup::Found(c.clone()),
        })
    }

    async fn list_active_memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.user_id == user_id && m.active)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryStore {
    async fn record_login_failure(
        &self,
        user_id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailedLogin, StoreError> {
        let mut t = self.write()?;
        let user = t.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        let newly_locked = user.record_failed_login(policy, now);
        Ok(FailedLogin {
            attempts: user.failed_login_attempts,
            locked_until: user.locked_until,
            newly_locked,
        })
    }

    async fn record_login_success(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut t = self.write()?;
        let user = t.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        if user.is_locked(now) {
            return Ok(false);
        }
        user.record_successful_login(now);
        Ok(true)
    }

    async fn record_superadmin_login(&self, id: SuperadminId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let admin = t.superadmins.get_mut(&id).ok_or(StoreError::NotFound)?;
        admin.last_login_at = Some(now);
        Ok(())
    }

    async fn update_user_password_hash(&self, user_id: UserId, hash: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let user = t.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.password_hash = hash.to_string();
        user.updated_at = now;
        Ok(())
    }

    async fn update_superadmin_password_hash(&self, id: SuperadminId, hash: &str) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let admin = t.superadmins.get_mut(&id).ok_or(StoreError::NotFound)?;
        admin.password_hash = hash.to_string();
        Ok(())
    }

    async fn user_record(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn membership_record(&self, tenant_id: TenantId, user_id: UserId) -> Result<Option<Membership>, StoreError> {
        Ok(self.read()?.memberships.get(&(tenant_id, user_id)).cloned())
    }

    async fn clear_lockout(&self, user_id: UserId, now: DateTime<Utc>) -> Result<User, StoreError> {
        let mut t = self.write()?;
        let user = t.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.unlock(now);
        Ok(user.clone())
    }

    async fn set_membership_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        let mut t = self.write()?;
        if !active {
            let target = t.memberships.get(&(tenant_id, user_id)).ok_or(StoreError::NotFound)?;
            let others = t
                .memberships
                .values()
                .filter(|m| m.tenant_id == tenant_id && m.user_id != user_id && m.active && m.primary_admin)
                .count();
            ensure_primary_admin_remains(target, others).map_err(|e| StoreError::Conflict(e.to_string()))?;
        }
        let membership = t.memberships.get_mut(&(tenant_id, user_id)).ok_or(StoreError::NotFound)?;
        membership
            .set_active(active, now)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(membership.clone())
    }

    async fn insert_superadmin(&self, admin: &Superadmin) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.superadmins.values().any(|s| s.email == admin.email) {
            return Err(StoreError::Conflict(format!("superadmin '{}' exists", admin.email)));
        }
        t.superadmins.insert(admin.id, admin.clone());
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email '{}' already registered", user.email)));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let key = (membership.tenant_id, membership.user_id);
        if !t.tenants.contains_key(&key.0) || !t.users.contains_key(&key.1) {
            return Err(StoreError::NotFound);
        }
        if t.memberships.contains_key(&key) {
            return Err(StoreError::Conflict("membership already exists".into()));
        }
        t.memberships.insert(key, membership.clone());
        Ok(())
    }

    async fn insert_portal_client(&self, client: &PortalClient) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if !t.tenants.contains_key(&client.tenant_id) {
            return Err(StoreError::NotFound);
        }
        t.portal_clients.insert(client.id, client.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl TenantStore for InMemoryStore {
    async fn create_tenant_with_admin(
        &self,
        tenant: &Tenant,
        admin: &User,
        membership: &Membership,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.tenants.values().any(|x| x.slug == tenant.slug) {
            return Err(StoreError::Conflict(format!("slug '{}' already taken", tenant.slug)));
        }
        if t.users.values().any(|u| u.email == admin.email) {
            return Err(StoreError::Conflict(format!("email '{}' already registered", admin.email)));
        }
        t.tenants.insert(tenant.id, tenant.clone());
        t.users.insert(admin.id, admin.clone());
        t.memberships
            .insert((membership.tenant_id, membership.user_id), membership.clone());
        Ok(())
    }

    async fn tenant_record(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        Ok(self.read()?.tenants.get(&id).cloned())
    }

    async fn save_tenant_state(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut t = self.write()?;
        let stored = t.tenants.get_mut(&tenant.id).ok_or(StoreError::NotFound)?;
        stored.active = tenant.active;
        stored.suspended = tenant.suspended;
        stored.suspension_reason = tenant.suspension_reason.clone();
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let mut tenants: Vec<Tenant> = self.read()?.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tenants)
    }
}

#[async_trait::async_trait]
impl GrantStore for InMemoryStore {
    async fn insert_permission(&self, grant: &TemporaryPermission, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut t = self.write()?;
        t.temporary_permissions.insert(grant.id, grant.clone());
        t.audit.push(audit.clone());
        Ok(())
    }

    async fn insert_role(&self, assignment: &TemporaryRoleAssignment, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut t = self.write()?;
        t.temporary_roles.insert(assignment.id, assignment.clone());
        t.audit.push(audit.clone());
        Ok(())
    }

    async fn active_permissions(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<TemporaryPermission>, StoreError> {
        Ok(self
            .read()?
            .temporary_permissions
            .values()
            .filter(|g| g.tenant_id == tenant_id && g.user_id == user_id && g.active)
            .cloned()
            .collect())
    }

    async fn active_roles(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<TemporaryRoleAssignment>, StoreError> {
        Ok(self
            .read()?
            .temporary_roles
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.user_id == user_id && a.active)
            .cloned()
            .collect())
    }

    async fn permission_record(&self, tenant_id: TenantId, id: GrantId) -> Result<Option<TemporaryPermission>, StoreError> {
        Ok(self
            .read()?
            .temporary_permissions
            .get(&id)
            .filter(|g| g.tenant_id == tenant_id)
            .cloned())
    }

    async fn role_record(&self, tenant_id: TenantId, id: GrantId) -> Result<Option<TemporaryRoleAssignment>, StoreError> {
        Ok(self
            .read()?
            .temporary_roles
            .get(&id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned())
    }

    async fn revoke_permission(
        &self,
        tenant_id: TenantId,
        id: GrantId,
        by: UserId,
        now: DateTime<Utc>,
        audit: &AuditRecord,
    ) -> Result<Option<TemporaryPermission>, StoreError> {
        let mut t = self.write()?;
        let Some(grant) = t
            .temporary_permissions
            .get_mut(&id)
            .filter(|g| g.tenant_id == tenant_id)
        else {
            return Ok(None);
        };
        if grant.revoke(by, now).is_err() {
            return Ok(None);
        }
        let revoked = grant.clone();
        t.audit.push(audit.clone());
        Ok(Some(revoked))
    }

    async fn revoke_role(
        &self,
        tenant_id: TenantId,
        id: GrantId,
        by: UserId,
        now: DateTime<Utc>,
        audit: &AuditRecord,
    ) -> Result<Option<TemporaryRoleAssignment>, StoreError> {
        let mut t = self.write()?;
        let Some(assignment) = t
            .temporary_roles
            .get_mut(&id)
            .filter(|a| a.tenant_id == tenant_id)
        else {
            return Ok(None);
        };
        if assignment.revoke(by, now).is_err() {
            return Ok(None);
        }
        let revoked = assignment.clone();
        t.audit.push(audit.clone());
        Ok(Some(revoked))
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Option<ReapReport>, StoreError> {
        let Ok(_pass) = self.reaper.try_lock() else {
            return Ok(None);
        };

        let mut t = self.write()?;
        let mut report = ReapReport::default();
        let mut records = Vec::new();

        let mut due: Vec<&mut TemporaryPermission> =
            t.temporary_permissions.values_mut().filter(|g| g.is_due(now)).collect();
        due.sort_by_key(|g| g.id);
        for grant in due {
            grant.expire();
            report.expired_permissions.push(grant.id);
            records.push(AuditRecord::permission_expired(grant, now));
        }

        let mut due: Vec<&mut TemporaryRoleAssignment> =
            t.temporary_roles.values_mut().filter(|a| a.is_due(now)).collect();
        due.sort_by_key(|a| a.id);
        for assignment in due {
            assignment.expire();
            report.expired_roles.push(assignment.id);
            records.push(AuditRecord::role_expired(assignment, now));
        }

        t.audit.extend(records);
        Ok(Some(report))
    }
}

#[async_trait::async_trait]
impl AuditLog for InMemoryStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.write()?.audit.push(record.clone());
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let t = self.read()?;
        let matching = t.audit.iter().rev().filter(|r| query.matches(r)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryStore {
    async fn fetch(&self, kind: EntityKind, scope: &Scope, id: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(self
            .read()?
            .records
            .get(&(kind, id))
            .filter(|r| scope.admits(r))
            .cloned())
    }

    async fn scan(&self, kind: EntityKind, scope: &Scope, filter: &RecordFilter) -> Result<Vec<Record>, StoreError> {
        let t = self.read()?;
        let mut rows: Vec<Record> = t
            .records
            .iter()
            .filter(|((k, _), r)| *k == kind && scope.admits(r) && filter.matches(r))
            .map(|(_, r)| r.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let rows = rows.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    async fn insert(&self, kind: EntityKind, record: &Record, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if !t.tenants.contains_key(&record.tenant_id) {
            return Err(StoreError::NotFound);
        }
        if t.records.contains_key(&(kind, record.id)) {
            return Err(StoreError::Conflict(format!("record {} exists", record.id)));
        }
        t.records.insert((kind, record.id), record.clone());
        t.audit.push(audit.clone());
        Ok(())
    }

    async fn patch(
        &self,
        kind: EntityKind,
        scope: &Scope,
        id: RecordId,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
        audit: AuditRecord,
    ) -> Result<Option<(Record, Record)>, StoreError> {
        let mut t = self.write()?;
        let Some(record) = t.records.get_mut(&(kind, id)).filter(|r| scope.admits(r)) else {
            return Ok(None);
        };
        let before = record.clone();
        for (k, v) in fields {
            record.data.insert(k.clone(), v.clone());
        }
        record.updated_at = now;
        let after = record.clone();
        t.audit.push(audit.diff(
            Some(Value::Object(before.data.clone())),
            Some(Value::Object(after.data.clone())),
        ));
        Ok(Some((before, after)))
    }

    async fn mark_deleted(
        &self,
        kind: EntityKind,
        scope: &Scope,
        id: RecordId,
        now: DateTime<Utc>,
        audit: AuditRecord,
    ) -> Result<Option<Record>, StoreError> {
        let mut t = self.write()?;
        let Some(record) = t.records.get_mut(&(kind, id)).filter(|r| scope.admits(r)) else {
            return Ok(None);
        };
        record.deleted_at = Some(now);
        record.updated_at = now;
        let deleted = record.clone();
        t.audit.push(audit.diff(Some(Value::Object(deleted.data.clone())), None));
        Ok(Some(deleted))
    }
}
