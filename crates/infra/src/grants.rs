//! Issuance and revocation of temporary permissions and roles.
//!
//! Every call is scoped to the acting admin's tenant: the target must hold a
//! membership there, and grant ids from other tenants are not found. The
//! audit record is written in the same store transaction as the row change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use juris_auth::{
    Actor, AuditAction, AuditOutcome, AuditRecord, Membership, PermissionSet, RoleTag, TemporaryPermission,
    TemporaryRoleAssignment,
};
use juris_core::{GrantId, TenantId, UserId};

use crate::error::ServiceError;
use crate::resolver::PermissionResolver;
use crate::store::{GrantStore, Lookup, PrincipalStore, Stores};

/// Grants currently in force for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveGrants {
    pub permissions: Vec<TemporaryPermission>,
    pub roles: Vec<TemporaryRoleAssignment>,
}

#[derive(Clone)]
pub struct GrantService {
    principals: Arc<dyn PrincipalStore>,
    grants: Arc<dyn GrantStore>,
    resolver: PermissionResolver,
}

impl core::fmt::Debug for GrantService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GrantService").finish_non_exhaustive()
    }
}

impl GrantService {
    pub fn new(stores: &Stores, resolver: PermissionResolver) -> Self {
        Self {
            principals: stores.principals.clone(),
            grants: stores.grants.clone(),
            resolver,
        }
    }

    async fn target_membership(&self, tenant_id: TenantId, user_id: UserId) -> Result<Membership, ServiceError> {
        match self.principals.find_membership(tenant_id, user_id).await? {
            Lookup::Found(membership) => Ok(membership),
            _ => Err(ServiceError::NotFound),
        }
    }

    #[instrument(skip(self, permissions, reason, now), fields(tenant_id = %tenant_id, user_id = %user_id), err)]
    #[allow(clippy::too_many_arguments)]
    pub async fn grant_permission(
        &self,
        tenant_id: TenantId,
        granted_by: UserId,
        user_id: UserId,
        permissions: PermissionSet,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TemporaryPermission, ServiceError> {
        if permissions.is_empty() {
            return Err(ServiceError::Validation("at least one permission is required".into()));
        }
        let membership = self.target_membership(tenant_id, user_id).await?;
        let snapshot = self.resolver.resolve(&membership, now).await?.permissions;

        let grant = TemporaryPermission::issue(
            user_id,
            tenant_id,
            permissions,
            snapshot,
            granted_by,
            reason,
            duration,
            now,
        )?;
        let audit = AuditRecord::new(
            Actor::User { id: granted_by },
            AuditAction::TemporaryPermissionGranted,
            AuditOutcome::Success,
            now,
        )
        .tenant(Some(tenant_id))
        .resource("temporary_permission", Some(grant.id.to_string()))
        .diff(None, Some(json!(grant.permissions)))
        .details(json!({
            "user_id": user_id,
            "reason": grant.reason,
            "expires_at": grant.expires_at,
        }));

        self.grants.insert_permission(&grant, &audit).await?;
        info!(grant_id = %grant.id, expires_at = %grant.expires_at, "temporary permission granted");
        Ok(grant)
    }

    #[instrument(skip(self, now), fields(tenant_id = %tenant_id, grant_id = %id), err)]
    pub async fn revoke_permission(
        &self,
        tenant_id: TenantId,
        revoked_by: UserId,
        id: GrantId,
        now: DateTime<Utc>,
    ) -> Result<TemporaryPermission, ServiceError> {
        let audit = AuditRecord::new(
            Actor::User { id: revoked_by },
            AuditAction::TemporaryPermissionRevoked,
            AuditOutcome::Success,
            now,
        )
        .tenant(Some(tenant_id))
        .resource("temporary_permission", Some(id.to_string()))
        .diff(Some(json!({ "active": true })), Some(json!({ "active": false })));

        self.grants
            .revoke_permission(tenant_id, id, revoked_by, now, &audit)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    #[instrument(skip(self, reason, now), fields(tenant_id = %tenant_id, user_id = %user_id), err)]
    #[allow(clippy::too_many_arguments)]
    pub async fn assign_role(
        &self,
        tenant_id: TenantId,
        granted_by: UserId,
        user_id: UserId,
        role: RoleTag,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TemporaryRoleAssignment, ServiceError> {
        let membership = self.target_membership(tenant_id, user_id).await?;
        let original_role = self.resolver.resolve(&membership, now).await?.role;

        let assignment = TemporaryRoleAssignment::issue(
            user_id,
            tenant_id,
            role,
            original_role,
            granted_by,
            reason,
            duration,
            now,
        )?;
        let audit = AuditRecord::new(
            Actor::User { id: granted_by },
            AuditAction::TemporaryRoleAssigned,
            AuditOutcome::Success,
            now,
        )
        .tenant(Some(tenant_id))
        .resource("temporary_role", Some(assignment.id.to_string()))
        .diff(Some(json!({ "role": original_role })), Some(json!({ "role": role })))
        .details(json!({
            "user_id": user_id,
            "reason": assignment.reason,
            "expires_at": assignment.expires_at,
        }));

        self.grants.insert_role(&assignment, &audit).await?;
        info!(grant_id = %assignment.id, role = role.as_str(), "temporary role assigned");
        Ok(assignment)
    }

    #[instrument(skip(self, now), fields(tenant_id = %tenant_id, grant_id = %id), err)]
    pub async fn revoke_role(
        &self,
        tenant_id: TenantId,
        revoked_by: UserId,
        id: GrantId,
        now: DateTime<Utc>,
    ) -> Result<TemporaryRoleAssignment, ServiceError> {
        let audit = AuditRecord::new(
            Actor::User { id: revoked_by },
            AuditAction::TemporaryRoleRevoked,
            AuditOutcome::Success,
            now,
        )
        .tenant(Some(tenant_id))
        .resource("temporary_role", Some(id.to_string()))
        .diff(Some(json!({ "active": true })), Some(json!({ "active": false })));

        self.grants
            .revoke_role(tenant_id, id, revoked_by, now, &audit)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Grants in force at `now`; rows past expiry but not yet reaped are left out.
    pub async fn list_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ActiveGrants, ServiceError> {
        self.target_membership(tenant_id, user_id).await?;

        let mut permissions = self.grants.active_permissions(tenant_id, user_id).await?;
        permissions.retain(|g| g.is_effective(now));
        permissions.sort_by(|a, b| a.granted_at.cmp(&b.granted_at).then_with(|| a.id.cmp(&b.id)));

        let mut roles = self.grants.active_roles(tenant_id, user_id).await?;
        roles.retain(|a| a.is_effective(now));
        roles.sort_by(|a, b| a.granted_at.cmp(&b.granted_at).then_with(|| a.id.cmp(&b.id)));

        Ok(ActiveGrants { permissions, roles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::World;
    use juris_auth::Module;

    fn service(world: &World) -> GrantService {
        GrantService::new(&world.stores, PermissionResolver::new(&world.stores))
    }

    fn delete_processes() -> PermissionSet {
        PermissionSet::empty().with(Module::Processes, "delete", true)
    }

    #[tokio::test]
    async fn grant_snapshots_and_audits() {
        let world = World::new().await;
        let grants = service(&world);
        let grant = grants
            .grant_permission(
                world.demo.id,
                world.maria.id,
                world.joao.id,
                delete_processes(),
                Duration::hours(1),
                "migration",
                world.now,
            )
            .await
            .unwrap();

        assert!(grant.snapshot.has(Module::Processes, "read"));
        assert!(!grant.snapshot.has(Module::Processes, "delete"));
        assert_eq!(grant.expires_at, world.now + Duration::hours(1));

        let audit = world.backend.audit_records().unwrap();
        assert!(audit.iter().any(|r| r.action == AuditAction::TemporaryPermissionGranted));

        let active = grants.list_active(world.demo.id, world.joao.id, world.now).await.unwrap();
        assert_eq!(active.permissions.len(), 1);
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let world = World::new().await;
        let grants = service(&world);

        let too_long = grants
            .grant_permission(
                world.demo.id,
                world.maria.id,
                world.joao.id,
                delete_processes(),
                Duration::days(91),
                "migration",
                world.now,
            )
            .await;
        assert!(matches!(too_long, Err(ServiceError::Validation(_))));

        let no_reason = grants
            .assign_role(
                world.demo.id,
                world.maria.id,
                world.joao.id,
                RoleTag::Admin,
                Duration::hours(1),
                "  ",
                world.now,
            )
            .await;
        assert!(matches!(no_reason, Err(ServiceError::Validation(_))));

        let foreign_user = grants
            .grant_permission(
                world.demo.id,
                world.maria.id,
                world.pedro.id,
                delete_processes(),
                Duration::hours(1),
                "migration",
                world.now,
            )
            .await;
        assert!(matches!(foreign_user, Err(ServiceError::NotFound)));
    }

    #[tokio::test]
    async fn revocation_is_terminal_and_tenant_scoped() {
        let world = World::new().await;
        let grants = service(&world);
        let assignment = grants
            .assign_role(
                world.demo.id,
                world.maria.id,
                world.joao.id,
                RoleTag::Admin,
                Duration::hours(4),
                "vacation cover",
                world.now,
            )
            .await
            .unwrap();
        assert_eq!(assignment.original_role, RoleTag::Lawyer);

        let cross = grants
            .revoke_role(world.other.id, world.pedro.id, assignment.id, world.now)
            .await;
        assert!(matches!(cross, Err(ServiceError::NotFound)));

        let revoked = grants
            .revoke_role(world.demo.id, world.maria.id, assignment.id, world.now)
            .await
            .unwrap();
        assert!(!revoked.active);
        assert_eq!(revoked.revoked_by, Some(world.maria.id));

        let again = grants
            .revoke_role(world.demo.id, world.maria.id, assignment.id, world.now)
            .await;
        assert!(matches!(again, Err(ServiceError::NotFound)));
    }
}
