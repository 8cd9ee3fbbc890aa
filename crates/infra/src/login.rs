//! Login coordination.
//!
//! Resolution order for [`LoginCoordinator::login`]:
//!
//! 1. superadmin by email; a verified password ends here with no tenant
//! 2. user by email; unknown, inactive, locked or a bad password is rejected
//! 3. with a tenant hint: that tenant must be available and hold an active
//!    membership for the user
//! 4. without a hint: the oldest active membership whose tenant is available,
//!    or no tenant at all
//!
//! Every rejection surfaces as the same `InvalidCredentials`; the specific
//! cause only reaches the audit log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use juris_auth::tenant::pick_default_membership;
use juris_auth::user::normalize_email;
use juris_auth::{
    Actor, AuditAction, AuditOutcome, AuditRecord, AuthError, CredentialFailure, LockoutPolicy, PasswordVerifier,
    Principal, RequestMeta, Superadmin, Tenancy, TenantMember, User, Verification,
};
use juris_core::TenantId;

use crate::error::ServiceError;
use crate::store::{AccountStore, AuditLog, Lookup, PrincipalStore, Stores};

pub struct LoginCoordinator {
    principals: Arc<dyn PrincipalStore>,
    accounts: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditLog>,
    verifier: PasswordVerifier,
    policy: LockoutPolicy,
}

impl core::fmt::Debug for LoginCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginCoordinator")
            .field("verifier", &self.verifier)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LoginCoordinator {
    pub fn new(stores: &Stores, verifier: PasswordVerifier, policy: LockoutPolicy) -> Self {
        Self {
            principals: stores.principals.clone(),
            accounts: stores.accounts.clone(),
            audit: stores.audit.clone(),
            verifier,
            policy,
        }
    }

    /// Authenticate against the operational surface.
    #[instrument(skip(self, email, password, meta, now), fields(tenant_slug = tenant_slug.unwrap_or_default()))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        tenant_slug: Option<&str>,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<Principal, ServiceError> {
        let email = normalize_email(email);
        debug!(%email, "login attempt");

        let mut superadmin_matched = false;
        if let Lookup::Found(admin) = self.principals.find_superadmin_by_email(&email).await? {
            superadmin_matched = true;
            if let Verification::Valid { needs_rehash } = self.verify(password, &admin.password_hash).await? {
                return self.complete_superadmin(admin, password, needs_rehash, meta, now).await;
            }
        }

        let user = match self.principals.find_user_by_email(&email).await? {
            Lookup::Found(user) => user,
            Lookup::Inactive => {
                self.burn(password).await?;
                return self.reject(&email, CredentialFailure::UserInactive, None, meta, now).await;
            }
            Lookup::NotFound | Lookup::Suspended => {
                let failure = if superadmin_matched {
                    CredentialFailure::BadPassword
                } else {
                    self.burn(password).await?;
                    CredentialFailure::UnknownEmail
                };
                return self.reject(&email, failure, None, meta, now).await;
            }
        };

        if user.is_locked(now) {
            self.burn(password).await?;
            return self.reject(&email, CredentialFailure::UserLocked, None, meta, now).await;
        }

        let needs_rehash = match self.verify(password, &user.password_hash).await? {
            Verification::Valid { needs_rehash } => needs_rehash,
            Verification::Invalid => {
                let failed = self.accounts.record_login_failure(user.id, &self.policy, now).await?;
                if failed.newly_locked {
                    warn!(target: "security", user_id = %user.id, locked_until = ?failed.locked_until, "account locked after repeated failures");
                }
                return self.reject(&email, CredentialFailure::BadPassword, None, meta, now).await;
            }
        };

        let tenancy = match tenant_slug {
            Some(slug) => Some(self.hinted_tenancy(&user, slug, meta, now).await?),
            None => self.default_tenancy(&user).await?,
        };

        self.complete_user(user, tenancy, password, needs_rehash, meta, now).await
    }

    /// Authenticate against the administrative surface. Only superadmins succeed.
    #[instrument(skip(self, email, password, meta, now))]
    pub async fn login_superadmin(
        &self,
        email: &str,
        password: &str,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<Superadmin, ServiceError> {
        let email = normalize_email(email);
        match self.principals.find_superadmin_by_email(&email).await? {
            Lookup::Found(admin) => match self.verify(password, &admin.password_hash).await? {
                Verification::Valid { needs_rehash } => {
                    match self.complete_superadmin(admin, password, needs_rehash, meta, now).await? {
                        Principal::Superadmin(admin) => Ok(admin),
                        _ => Err(ServiceError::Internal("superadmin login yielded another principal".into())),
                    }
                }
                Verification::Invalid => self.reject(&email, CredentialFailure::BadPassword, None, meta, now).await,
            },
            Lookup::Inactive => {
                self.burn(password).await?;
                self.reject(&email, CredentialFailure::SuperadminInactive, None, meta, now).await
            }
            Lookup::NotFound | Lookup::Suspended => {
                self.burn(password).await?;
                self.reject(&email, CredentialFailure::NotSuperadmin, None, meta, now).await
            }
        }
    }

    async fn hinted_tenancy(
        &self,
        user: &User,
        slug: &str,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<Tenancy, ServiceError> {
        let tenant = match self.principals.find_tenant_by_slug(slug).await? {
            Lookup::Found(tenant) => tenant,
            Lookup::NotFound => {
                return self.reject(&user.email, CredentialFailure::TenantNotFound, None, meta, now).await;
            }
            Lookup::Inactive => {
                return self.reject(&user.email, CredentialFailure::TenantInactive, None, meta, now).await;
            }
            Lookup::Suspended => {
                return self.reject(&user.email, CredentialFailure::TenantSuspended, None, meta, now).await;
            }
        };

        let membership = match self.principals.find_membership(tenant.id, user.id).await? {
            Lookup::Found(membership) => membership,
            Lookup::Inactive => {
                let failure = CredentialFailure::MembershipInactive;
                return self.reject(&user.email, failure, Some(tenant.id), meta, now).await;
            }
            Lookup::NotFound | Lookup::Suspended => {
                let failure = CredentialFailure::MembershipNotFound;
                return self.reject(&user.email, failure, Some(tenant.id), meta, now).await;
            }
        };

        Ok(Tenancy { tenant, membership })
    }

    /// Oldest active membership whose tenant is still available.
    async fn default_tenancy(&self, user: &User) -> Result<Option<Tenancy>, ServiceError> {
        let memberships = self.principals.list_active_memberships(user.id).await?;

        let mut tenants = BTreeMap::new();
        let mut candidates = Vec::with_capacity(memberships.len());
        for membership in memberships {
            if let Lookup::Found(tenant) = self.principals.find_tenant_by_id(membership.tenant_id).await? {
                tenants.insert(tenant.id, tenant);
                candidates.push(membership);
            }
        }

        let Some(membership) = pick_default_membership(&candidates) else {
            return Ok(None);
        };
        Ok(tenants.remove(&membership.tenant_id).map(|tenant| Tenancy {
            tenant,
            membership: membership.clone(),
        }))
    }

    async fn complete_user(
        &self,
        mut user: User,
        tenancy: Option<Tenancy>,
        password: &str,
        needs_rehash: bool,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<Principal, ServiceError> {
        let tenant_id = tenancy.as_ref().map(|t| t.tenant.id);
        if !self.accounts.record_login_success(user.id, now).await? {
            // A concurrent failure locked the account after verification.
            return self.reject(&user.email, CredentialFailure::UserLocked, tenant_id, meta, now).await;
        }
        user.record_successful_login(now);

        if needs_rehash {
            let hash = self.hash(password).await?;
            self.accounts.update_user_password_hash(user.id, &hash, now).await?;
            user.password_hash = hash;
            self.audit
                .append(
                    &AuditRecord::new(Actor::User { id: user.id }, AuditAction::PasswordRehashed, AuditOutcome::Success, now)
                        .tenant(tenant_id)
                        .resource("user", Some(user.id.to_string())),
                )
                .await?;
            info!(user_id = %user.id, "password re-hashed to primary format");
        }

        self.audit
            .append(
                &AuditRecord::new(Actor::User { id: user.id }, AuditAction::LoginSucceeded, AuditOutcome::Success, now)
                    .tenant(tenant_id)
                    .meta(meta),
            )
            .await?;
        info!(user_id = %user.id, tenant_id = ?tenant_id, "login succeeded");

        Ok(Principal::TenantMember(TenantMember { user, tenancy }))
    }

    async fn complete_superadmin(
        &self,
        mut admin: Superadmin,
        password: &str,
        needs_rehash: bool,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<Principal, ServiceError> {
        self.accounts.record_superadmin_login(admin.id, now).await?;
        admin.last_login_at = Some(now);

        if needs_rehash {
            let hash = self.hash(password).await?;
            self.accounts.update_superadmin_password_hash(admin.id, &hash).await?;
            admin.password_hash = hash;
            self.audit
                .append(&AuditRecord::new(
                    Actor::Superadmin { id: admin.id },
                    AuditAction::PasswordRehashed,
                    AuditOutcome::Success,
                    now,
                ))
                .await?;
        }

        self.audit
            .append(
                &AuditRecord::new(
                    Actor::Superadmin { id: admin.id },
                    AuditAction::LoginSucceeded,
                    AuditOutcome::Success,
                    now,
                )
                .meta(meta),
            )
            .await?;
        info!(superadmin_id = %admin.id, "superadmin login succeeded");

        Ok(Principal::Superadmin(admin))
    }

    async fn reject<T>(
        &self,
        email: &str,
        failure: CredentialFailure,
        tenant_id: Option<TenantId>,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<T, ServiceError> {
        info!(target: "security", cause = failure.as_str(), tenant_id = ?tenant_id, "login rejected");
        self.audit
            .append(&AuditRecord::credential_failure(email, failure, tenant_id, now).meta(meta))
            .await?;
        Err(AuthError::InvalidCredentials(failure).into())
    }

    // bcrypt is CPU bound; keep it off the async workers.

    async fn verify(&self, password: &str, stored: &str) -> Result<Verification, ServiceError> {
        let verifier = self.verifier.clone();
        let (password, stored) = (password.to_owned(), stored.to_owned());
        Ok(tokio::task::spawn_blocking(move || verifier.verify(&password, &stored)).await?)
    }

    async fn hash(&self, password: &str) -> Result<String, ServiceError> {
        let verifier = self.verifier.clone();
        let password = password.to_owned();
        Ok(tokio::task::spawn_blocking(move || verifier.hash(&password)).await??)
    }

    async fn burn(&self, password: &str) -> Result<(), ServiceError> {
        let verifier = self.verifier.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || verifier.burn(&password)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::World;
    use chrono::Duration;
    use juris_auth::password::legacy_sha256;
    use juris_auth::{HashFormat, PrincipalKind};

    fn meta() -> RequestMeta {
        RequestMeta::default()
    }

    #[tokio::test]
    async fn tenant_login_resolves_hinted_tenant() {
        let world = World::new().await;
        let principal = world
            .login
            .login("JOAO@demo", "p@ss", Some("demo"), &meta(), world.now)
            .await
            .unwrap();

        assert_eq!(principal.kind(), PrincipalKind::User);
        assert_eq!(principal.tenant_id(), Some(world.demo.id));
        assert!(!principal.is_superadmin());
    }

    #[tokio::test]
    async fn login_without_hint_picks_default_membership() {
        let world = World::new().await;
        let principal = world.login.login("joao@demo", "p@ss", None, &meta(), world.now).await.unwrap();
        assert_eq!(principal.tenant_id(), Some(world.demo.id));
    }

    #[tokio::test]
    async fn suspended_tenant_is_rejected_with_audited_cause() {
        let world = World::new().await;
        let mut demo = world.demo.clone();
        demo.suspend("unpaid").unwrap();
        world.backend.put_tenant(demo).unwrap();

        let err = world
            .login
            .login("joao@demo", "p@ss", Some("demo"), &meta(), world.now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::TenantSuspended))
        ));

        let audit = world.backend.audit_records().unwrap();
        let last = audit.last().unwrap();
        assert_eq!(last.action, AuditAction::InvalidCredentials);
        assert_eq!(last.cause.as_deref(), Some("tenant_suspended"));
    }

    #[tokio::test]
    async fn unknown_tenant_and_bad_password_share_one_error() {
        let world = World::new().await;
        let unknown = world
            .login
            .login("joao@demo", "p@ss", Some("nope"), &meta(), world.now)
            .await
            .unwrap_err();
        let bad = world
            .login
            .login("joao@demo", "wrong", Some("demo"), &meta(), world.now)
            .await
            .unwrap_err();
        for err in [unknown, bad] {
            assert!(matches!(err, ServiceError::Auth(AuthError::InvalidCredentials(_))));
        }
    }

    #[tokio::test]
    async fn five_failures_lock_then_cooldown_unlocks() {
        let world = World::new().await;
        let t = world.now;
        for i in 0..5 {
            let at = t + Duration::seconds(i * 10);
            assert!(world.login.login("joao@demo", "wrong", None, &meta(), at).await.is_err());
        }
        let fifth = t + Duration::seconds(40);

        let stored = world.stores.accounts.user_record(world.joao.id).await.unwrap().unwrap();
        assert_eq!(stored.locked_until, Some(fifth + Duration::minutes(30)));

        let locked = world
            .login
            .login("joao@demo", "p@ss", None, &meta(), fifth + Duration::minutes(29))
            .await
            .unwrap_err();
        assert!(matches!(
            locked,
            ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::UserLocked))
        ));

        world
            .login
            .login("joao@demo", "p@ss", None, &meta(), fifth + Duration::minutes(31))
            .await
            .unwrap();
        let stored = world.stores.accounts.user_record(world.joao.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
        assert_eq!(stored.locked_until, None);
    }

    #[tokio::test]
    async fn success_does_not_clear_a_lock_set_after_verification() {
        let world = World::new().await;
        let policy = LockoutPolicy::default();
        let accounts = &world.stores.accounts;
        for _ in 0..policy.max_failed_attempts {
            accounts.record_login_failure(world.joao.id, &policy, world.now).await.unwrap();
        }

        // The success write of a login that verified before the lock landed.
        let applied = accounts.record_login_success(world.joao.id, world.now).await.unwrap();
        assert!(!applied);

        let stored = accounts.user_record(world.joao.id).await.unwrap().unwrap();
        assert!(stored.is_locked(world.now));
        assert_eq!(stored.failed_login_attempts, policy.max_failed_attempts);
        assert_eq!(stored.last_login_at, None);

        let later = world.now + Duration::minutes(31);
        assert!(accounts.record_login_success(world.joao.id, later).await.unwrap());
    }

    #[tokio::test]
    async fn legacy_hash_is_upgraded_on_success() {
        let world = World::new().await;
        let mut user = world.joao.clone();
        user.password_hash = legacy_sha256("p@ss");
        world.backend.put_user(user).unwrap();

        world.login.login("joao@demo", "p@ss", None, &meta(), world.now).await.unwrap();

        let stored = world.stores.accounts.user_record(world.joao.id).await.unwrap().unwrap();
        assert_eq!(HashFormat::detect(&stored.password_hash), HashFormat::Bcrypt);
        let audit = world.backend.audit_records().unwrap();
        assert!(audit.iter().any(|r| r.action == AuditAction::PasswordRehashed));
    }

    #[tokio::test]
    async fn superadmin_login_carries_no_tenant() {
        let world = World::new().await;
        let principal = world.login.login("root@juris", "r00t", Some("demo"), &meta(), world.now).await.unwrap();
        assert!(principal.is_superadmin());
        assert_eq!(principal.tenant_id(), None);

        let admin = world.login.login_superadmin("root@juris", "r00t", &meta(), world.now).await.unwrap();
        assert_eq!(admin.email, "root@juris");
    }

    #[tokio::test]
    async fn superadmin_surface_rejects_tenant_users_and_inactive_admins() {
        let world = World::new().await;
        let err = world
            .login
            .login_superadmin("joao@demo", "p@ss", &meta(), world.now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::NotSuperadmin))
        ));

        let mut admin = world.root.clone();
        admin.id = juris_core::SuperadminId::new();
        admin.email = "old@juris".into();
        admin.active = false;
        world.stores.accounts.insert_superadmin(&admin).await.unwrap();
        let err = world
            .login
            .login_superadmin("old@juris", "r00t", &meta(), world.now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::SuperadminInactive))
        ));
    }

    #[tokio::test]
    async fn unknown_email_touches_no_counter() {
        let world = World::new().await;
        let err = world.login.login("ghost@demo", "x", None, &meta(), world.now).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Auth(AuthError::InvalidCredentials(CredentialFailure::UnknownEmail))
        ));
        let stored = world.stores.accounts.user_record(world.joao.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
    }
}
