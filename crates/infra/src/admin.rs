//! Tenant and account administration.
//!
//! `TenantAdmin` is the superadmin surface: provisioning and the
//! suspend/deactivate state machine. `UserAdmin` is the tenant-admin surface
//! over accounts that belong to the admin's own tenant.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use juris_auth::{
    Actor, AuditAction, AuditOutcome, AuditRecord, Membership, PasswordVerifier, Tenant, User,
};
use juris_core::{DomainError, SuperadminId, TenantId, UserId};

use crate::error::ServiceError;
use crate::store::{AccountStore, AuditLog, PrincipalStore, Stores, TenantStore};

// ─────────────────────────────────────────────────────────────────────────────
// Tenants
// ─────────────────────────────────────────────────────────────────────────────

/// Provisioning request for a tenant and its primary admin.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub email: String,
    pub admin_name: String,
    pub admin_email: String,
    pub admin_password: String,
}

#[derive(Clone)]
pub struct TenantAdmin {
    tenants: Arc<dyn TenantStore>,
    audit: Arc<dyn AuditLog>,
    verifier: PasswordVerifier,
}

impl core::fmt::Debug for TenantAdmin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TenantAdmin").finish_non_exhaustive()
    }
}

impl TenantAdmin {
    pub fn new(stores: &Stores, verifier: PasswordVerifier) -> Self {
        Self {
            tenants: stores.tenants.clone(),
            audit: stores.audit.clone(),
            verifier,
        }
    }

    /// Create the tenant, its primary admin and the admin membership atomically.
    #[instrument(skip(self, request, now), fields(slug = %request.slug), err)]
    pub async fn create_tenant(
        &self,
        actor: SuperadminId,
        request: NewTenant,
        now: DateTime<Utc>,
    ) -> Result<(Tenant, User), ServiceError> {
        if request.name.trim().is_empty() || request.admin_name.trim().is_empty() {
            return Err(ServiceError::Validation("tenant and admin names are required".into()));
        }
        if request.admin_password.is_empty() {
            return Err(ServiceError::Validation("admin password is required".into()));
        }

        let tenant = Tenant::new(request.name.trim(), &request.slug, &request.email, now)?;

        let verifier = self.verifier.clone();
        let password = request.admin_password;
        let hash = tokio::task::spawn_blocking(move || verifier.hash(&password)).await??;
        let admin = User::new(request.admin_name.trim(), &request.admin_email, hash, now);
        let membership = Membership::primary_admin(tenant.id, admin.id, now);

        self.tenants.create_tenant_with_admin(&tenant, &admin, &membership).await?;

        self.audit
            .append(
                &AuditRecord::new(Actor::Superadmin { id: actor }, AuditAction::TenantCreated, AuditOutcome::Success, now)
                    .tenant(Some(tenant.id))
                    .resource("tenant", Some(tenant.id.to_string()))
                    .details(json!({ "slug": tenant.slug, "admin_user_id": admin.id })),
            )
            .await?;
        info!(tenant_id = %tenant.id, "tenant created");
        Ok((tenant, admin))
    }

    pub async fn suspend(
        &self,
        actor: SuperadminId,
        tenant_id: TenantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Tenant, ServiceError> {
        let details = json!({ "reason": reason.trim() });
        self.transition(actor, tenant_id, AuditAction::TenantSuspended, details, now, |t| t.suspend(reason))
            .await
    }

    pub async fn unsuspend(&self, actor: SuperadminId, tenant_id: TenantId, now: DateTime<Utc>) -> Result<Tenant, ServiceError> {
        self.transition(actor, tenant_id, AuditAction::TenantUnsuspended, json!(null), now, Tenant::unsuspend)
            .await
    }

    pub async fn deactivate(&self, actor: SuperadminId, tenant_id: TenantId, now: DateTime<Utc>) -> Result<Tenant, ServiceError> {
        self.transition(actor, tenant_id, AuditAction::TenantDeactivated, json!(null), now, |t| t.set_active(false))
            .await
    }

    pub async fn reactivate(&self, actor: SuperadminId, tenant_id: TenantId, now: DateTime<Utc>) -> Result<Tenant, ServiceError> {
        self.transition(actor, tenant_id, AuditAction::TenantReactivated, json!(null), now, |t| t.set_active(true))
            .await
    }

    pub async fn list(&self) -> Result<Vec<Tenant>, ServiceError> {
        Ok(self.tenants.list_tenants().await?)
    }

    #[instrument(skip(self, details, now, apply), fields(tenant_id = %tenant_id, action = action.as_str()), err)]
    async fn transition(
        &self,
        actor: SuperadminId,
        tenant_id: TenantId,
        action: AuditAction,
        details: serde_json::Value,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Tenant) -> Result<(), DomainError> + Send,
    ) -> Result<Tenant, ServiceError> {
        let mut tenant = self.tenants.tenant_record(tenant_id).await?.ok_or(ServiceError::NotFound)?;
        let before = state_of(&tenant);
        apply(&mut tenant)?;
        self.tenants.save_tenant_state(&tenant).await?;

        self.audit
            .append(
                &AuditRecord::new(Actor::Superadmin { id: actor }, action, AuditOutcome::Success, now)
                    .tenant(Some(tenant_id))
                    .resource("tenant", Some(tenant_id.to_string()))
                    .diff(Some(before), Some(state_of(&tenant)))
                    .details(details),
            )
            .await?;
        warn!(tenant_id = %tenant_id, action = action.as_str(), "tenant state changed");
        Ok(tenant)
    }
}

fn state_of(tenant: &Tenant) -> serde_json::Value {
    json!({
        "active": tenant.active,
        "suspended": tenant.suspended,
        "suspension_reason": tenant.suspension_reason,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

/// Account administration inside one tenant.
///
/// Activation is per membership, so deactivating someone here never locks
/// them out of another tenant. The lockout counters live on the shared user
/// row; unlocking is refused while the account belongs to another tenant too.
#[derive(Clone)]
pub struct UserAdmin {
    principals: Arc<dyn PrincipalStore>,
    accounts: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditLog>,
}

impl core::fmt::Debug for UserAdmin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserAdmin").finish_non_exhaustive()
    }
}

impl UserAdmin {
    pub fn new(stores: &Stores) -> Self {
        Self {
            principals: stores.principals.clone(),
            accounts: stores.accounts.clone(),
            audit: stores.audit.clone(),
        }
    }

    pub async fn deactivate(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        target: UserId,
        now: DateTime<Utc>,
    ) -> Result<Membership, ServiceError> {
        if actor == target {
            return Err(ServiceError::Validation("administrators cannot deactivate themselves".into()));
        }
        self.set_active(tenant_id, actor, target, false, now).await
    }

    pub async fn reactivate(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        target: UserId,
        now: DateTime<Utc>,
    ) -> Result<Membership, ServiceError> {
        self.set_active(tenant_id, actor, target, true, now).await
    }

    /// Clear the lockout window and the failure counter.
    #[instrument(skip(self, now), fields(tenant_id = %tenant_id, user_id = %target), err)]
    pub async fn unlock(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        target: UserId,
        now: DateTime<Utc>,
    ) -> Result<User, ServiceError> {
        self.ensure_member(tenant_id, target).await?;
        let shared = self
            .principals
            .list_active_memberships(target)
            .await?
            .iter()
            .any(|m| m.tenant_id != tenant_id);
        if shared {
            return Err(ServiceError::Conflict("account is shared with other tenants".into()));
        }

        let before = self.accounts.user_record(target).await?.ok_or(ServiceError::NotFound)?;
        let user = self.accounts.clear_lockout(target, now).await?;

        self.audit
            .append(
                &AuditRecord::new(Actor::User { id: actor }, AuditAction::UserUnlocked, AuditOutcome::Success, now)
                    .tenant(Some(tenant_id))
                    .resource("user", Some(target.to_string()))
                    .diff(Some(lockout_state(&before)), Some(lockout_state(&user))),
            )
            .await?;
        info!(user_id = %target, "account unlocked");
        Ok(user)
    }

    #[instrument(skip(self, now), fields(tenant_id = %tenant_id, user_id = %target), err)]
    async fn set_active(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        target: UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Membership, ServiceError> {
        self.ensure_member(tenant_id, target).await?;
        let membership = self.accounts.set_membership_active(tenant_id, target, active, now).await?;

        let action = if active { AuditAction::UserReactivated } else { AuditAction::UserDeactivated };
        self.audit
            .append(
                &AuditRecord::new(Actor::User { id: actor }, action, AuditOutcome::Success, now)
                    .tenant(Some(tenant_id))
                    .resource("user", Some(target.to_string()))
                    .diff(Some(json!({ "active": !active })), Some(json!({ "active": active }))),
            )
            .await?;
        info!(user_id = %target, action = action.as_str(), "membership state changed");
        Ok(membership)
    }

    /// Accounts outside the admin's tenant are indistinguishable from missing ones.
    async fn ensure_member(&self, tenant_id: TenantId, target: UserId) -> Result<(), ServiceError> {
        match self.accounts.membership_record(tenant_id, target).await? {
            Some(_) => Ok(()),
            None => Err(ServiceError::NotFound),
        }
    }
}

fn lockout_state(user: &User) -> serde_json::Value {
    json!({
        "failed_login_attempts": user.failed_login_attempts,
        "locked_until": user.locked_until,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::World;
    use crate::store::Lookup;
    use juris_auth::{AuthError, CredentialFailure, LockoutPolicy, RequestMeta, RoleTag};

    fn request(slug: &str) -> NewTenant {
        NewTenant {
            name: "Nova Advocacia".into(),
            slug: slug.into(),
            email: "office@nova".into(),
            admin_name: "Ana".into(),
            admin_email: "ana@nova".into(),
            admin_password: "s3cret".into(),
        }
    }

    #[tokio::test]
    async fn created_tenant_admin_can_log_in() {
        let world = World::new().await;
        let admin = TenantAdmin::new(&world.stores, world.verifier.clone());
        let (tenant, user) = admin.create_tenant(world.root.id, request("nova"), world.now).await.unwrap();

        let membership = world.stores.principals.find_membership(tenant.id, user.id).await.unwrap();
        assert!(matches!(membership, Lookup::Found(m) if m.primary_admin));

        let principal = world
            .login
            .login("ana@nova", "s3cret", Some("nova"), &RequestMeta::default(), world.now)
            .await
            .unwrap();
        assert_eq!(principal.tenant_id(), Some(tenant.id));
    }

    #[tokio::test]
    async fn duplicate_or_malformed_slug_is_rejected() {
        let world = World::new().await;
        let admin = TenantAdmin::new(&world.stores, world.verifier.clone());
        let dup = admin.create_tenant(world.root.id, request("demo"), world.now).await;
        assert!(matches!(dup, Err(ServiceError::Conflict(_))));
        let bad = admin.create_tenant(world.root.id, request("Not A Slug"), world.now).await;
        assert!(matches!(bad, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn suspension_needs_reason_and_blocks_lookup() {
        let world = World::new().await;
        let admin = TenantAdmin::new(&world.stores, world.verifier.clone());
        let empty = admin.suspend(world.root.id, world.demo.id, " ", world.now).await;
        assert!(matches!(empty, Err(ServiceError::Validation(_))));

        admin.suspend(world.root.id, world.demo.id, "unpaid", world.now).await.unwrap();
        let lookup = world.stores.principals.find_tenant_by_id(world.demo.id).await.unwrap();
        assert!(matches!(lookup, Lookup::Suspended));

        admin.unsuspend(world.root.id, world.demo.id, world.now).await.unwrap();
        admin.deactivate(world.root.id, world.demo.id, world.now).await.unwrap();
        let lookup = world.stores.principals.find_tenant_by_id(world.demo.id).await.unwrap();
        assert!(matches!(lookup, Lookup::Inactive));
    }

    #[tokio::test]
    async fn user_admin_is_tenant_scoped() {
        let world = World::new().await;
        let users = UserAdmin::new(&world.stores);

        let foreign = users.deactivate(world.demo.id, world.maria.id, world.pedro.id, world.now).await;
        assert!(matches!(foreign, Err(ServiceError::NotFound)));

        let myself = users.deactivate(world.demo.id, world.maria.id, world.maria.id, world.now).await;
        assert!(matches!(myself, Err(ServiceError::Validation(_))));

        let membership = users.deactivate(world.demo.id, world.maria.id, world.joao.id, world.now).await.unwrap();
        assert!(!membership.active);
        let again = users.deactivate(world.demo.id, world.maria.id, world.joao.id, world.now).await;
        assert!(matches!(again, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn unlock_clears_lockout() {
        let world = World::new().await;
        let policy = LockoutPolicy::default();
        for _ in 0..policy.max_failed_attempts {
            world
                .stores
                .accounts
                .record_login_failure(world.joao.id, &policy, world.now)
                .await
                .unwrap();
        }

        let users = UserAdmin::new(&world.stores);
        let user = users.unlock(world.demo.id, world.maria.id, world.joao.id, world.now).await.unwrap();
        assert_eq!(user.locked_until, None);
        assert_eq!(user.failed_login_attempts, 0);

        world
            .login
            .login("joao@demo", "p@ss", None, &RequestMeta::default(), world.now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deactivation_stays_inside_the_tenant() {
        let world = World::new().await;
        let shared = Membership::new(world.demo.id, world.pedro.id, RoleTag::Lawyer, world.now);
        world.stores.accounts.insert_membership(&shared).await.unwrap();

        let users = UserAdmin::new(&world.stores);
        users.deactivate(world.demo.id, world.maria.id, world.pedro.id, world.now).await.unwrap();

        let meta = RequestMeta::default();
        let principal = world.login.login("pedro@other", "p@ss", Some("other"), &meta, world.now).await.unwrap();
        assert_eq!(principal.tenant_id(), Some(world.other.id));

        let err = world
            .login
            .login("pedro@other", "p@ss", Some("demo"), &meta, world.now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::MembershipInactive))
        ));

        let user = world.stores.accounts.user_record(world.pedro.id).await.unwrap().unwrap();
        assert!(user.active);
    }

    #[tokio::test]
    async fn last_primary_admin_cannot_be_deactivated() {
        let world = World::new().await;
        let lucia = User::new("Lúcia", "lucia@demo", world.verifier.hash("p@ss").unwrap(), world.now);
        world.stores.accounts.insert_user(&lucia).await.unwrap();
        let admin = Membership::new(world.demo.id, lucia.id, RoleTag::Admin, world.now);
        world.stores.accounts.insert_membership(&admin).await.unwrap();

        let users = UserAdmin::new(&world.stores);
        let err = users.deactivate(world.demo.id, lucia.id, world.maria.id, world.now).await;
        assert!(matches!(err, Err(ServiceError::Conflict(_))));

        world
            .login
            .login("maria@demo", "adm1n", Some("demo"), &RequestMeta::default(), world.now)
            .await
            .unwrap();

        // A plain admin is not protected.
        users.deactivate(world.demo.id, world.maria.id, lucia.id, world.now).await.unwrap();
    }

    #[tokio::test]
    async fn unlock_refuses_accounts_shared_with_other_tenants() {
        let world = World::new().await;
        let shared = Membership::new(world.demo.id, world.pedro.id, RoleTag::Lawyer, world.now);
        world.stores.accounts.insert_membership(&shared).await.unwrap();
        let policy = LockoutPolicy::default();
        for _ in 0..policy.max_failed_attempts {
            world
                .stores
                .accounts
                .record_login_failure(world.pedro.id, &policy, world.now)
                .await
                .unwrap();
        }

        let users = UserAdmin::new(&world.stores);
        let err = users.unlock(world.demo.id, world.maria.id, world.pedro.id, world.now).await;
        assert!(matches!(err, Err(ServiceError::Conflict(_))));

        let user = world.stores.accounts.user_record(world.pedro.id).await.unwrap().unwrap();
        assert!(user.is_locked(world.now));
    }
}
