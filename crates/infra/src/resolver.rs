//! Loads the layers for [`juris_auth::resolve`] and returns one snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use juris_auth::{EffectivePermissions, Membership, resolve};
use juris_core::{TenantId, UserId};

use crate::store::{GrantStore, Lookup, PrincipalStore, StoreError, Stores};

#[derive(Clone)]
pub struct PermissionResolver {
    principals: Arc<dyn PrincipalStore>,
    grants: Arc<dyn GrantStore>,
}

impl core::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}

impl PermissionResolver {
    pub fn new(stores: &Stores) -> Self {
        Self {
            principals: stores.principals.clone(),
            grants: stores.grants.clone(),
        }
    }

    /// Resolve for an already-loaded membership.
    #[instrument(skip(self, membership, now), fields(tenant_id = %membership.tenant_id, user_id = %membership.user_id), err)]
    pub async fn resolve(
        &self,
        membership: &Membership,
        now: DateTime<Utc>,
    ) -> Result<EffectivePermissions, StoreError> {
        let roles = self
            .grants
            .active_roles(membership.tenant_id, membership.user_id)
            .await?;
        let permissions = self
            .grants
            .active_permissions(membership.tenant_id, membership.user_id)
            .await?;
        Ok(resolve(membership, &roles, &permissions, now))
    }

    /// `None` when the user holds no active membership in the tenant.
    pub async fn resolve_for(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Result<Option<EffectivePermissions>, StoreError> {
        match self.principals.find_membership(tenant_id, user_id).await? {
            Lookup::Found(membership) => Ok(Some(self.resolve(&membership, now).await?)),
            _ => Ok(None),
        }
    }
}
