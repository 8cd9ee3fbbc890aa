//! Effective-permission resolution.
//!
//! Layers, merged left to right with [`PermissionSet::merge`]:
//!
//! 1. role defaults (an effective temporary role assignment replaces the membership role)
//! 2. the membership's custom overlay
//! 3. effective temporary permissions, ascending by grant time
//!
//! The result is an immutable snapshot handed to the request for its whole
//! lifetime.

use chrono::{DateTime, Utc};
use serde::Serialize;

use juris_core::{TenantId, UserId};

use crate::grants::{TemporaryPermission, TemporaryRoleAssignment};
use crate::permissions::{Capability, Module, PermissionSet};
use crate::roles::RoleTag;
use crate::tenant::Membership;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermissions {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    /// Role in force (temporary assignments count).
    pub role: RoleTag,
    /// Role stored on the membership.
    pub base_role: RoleTag,
    pub permissions: PermissionSet,
    pub resolved_at: DateTime<Utc>,
}

impl EffectivePermissions {
    pub fn has(&self, module: Module, action: &str) -> bool {
        self.permissions.has(module, action)
    }

    pub fn can_access(&self, module: Module) -> bool {
        self.permissions.can_access(module)
    }

    pub fn list_modules(&self) -> Vec<Module> {
        self.permissions.list_modules()
    }

    pub fn capability(&self, capability: Capability) -> bool {
        self.permissions.capability(capability)
    }
}

/// The most recently granted effective assignment, if any.
pub fn effective_role_assignment<'a>(
    assignments: &'a [TemporaryRoleAssignment],
    user_id: UserId,
    tenant_id: TenantId,
    now: DateTime<Utc>,
) -> Option<&'a TemporaryRoleAssignment> {
    assignments
        .iter()
        .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id && a.is_effective(now))
        .max_by(|a, b| a.granted_at.cmp(&b.granted_at).then_with(|| a.id.cmp(&b.id)))
}

/// Merge the layers for `membership` at `now`.
///
/// Rows for other users/tenants and rows that are not effective at `now`
/// are ignored, so callers may pass a superset.
pub fn resolve(
    membership: &Membership,
    role_assignments: &[TemporaryRoleAssignment],
    temporary_permissions: &[TemporaryPermission],
    now: DateTime<Utc>,
) -> EffectivePermissions {
    let user_id = membership.user_id;
    let tenant_id = membership.tenant_id;

    let role = effective_role_assignment(role_assignments, user_id, tenant_id, now)
        .map(|a| a.role)
        .unwrap_or(membership.role);

    let mut grants: Vec<&TemporaryPermission> = temporary_permissions
        .iter()
        .filter(|g| g.user_id == user_id && g.tenant_id == tenant_id && g.is_effective(now))
        .collect();
    grants.sort_by(|a, b| a.granted_at.cmp(&b.granted_at).then_with(|| a.id.cmp(&b.id)));

    let permissions = grants.into_iter().fold(
        role.definition().permissions.merge(&membership.permissions),
        |acc, grant| acc.merge(&grant.permissions),
    );

    EffectivePermissions {
        user_id,
        tenant_id,
        role,
        base_role: membership.role,
        permissions,
        resolved_at: now,
    }
}
