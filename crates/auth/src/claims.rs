use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use juris_core::TenantId;

use crate::principal::{PortalClient, PrincipalKind, Superadmin};
use crate::tenant::Tenant;
use crate::user::User;

/// Claim set carried by every access token.
///
/// One schema covers the three principal kinds: `kind` says how `sub`
/// must be interpreted (superadmin id, user id or portal client id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject id (UUID string).
    pub sub: String,
    pub kind: PrincipalKind,
    pub email: String,
    pub is_super_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_slug: Option<String>,
    /// Issued-at (Unix timestamp).
    #[serde(default)]
    pub iat: i64,
    /// Expiration (Unix timestamp).
    #[serde(default)]
    pub exp: i64,
}

impl TokenClaims {
    /// Superadmin claims never carry a tenant.
    pub fn for_superadmin(admin: &Superadmin) -> Self {
        Self {
            sub: admin.id.to_string(),
            kind: PrincipalKind::Superadmin,
            email: admin.email.clone(),
            is_super_admin: true,
            tenant_id: None,
            tenant_slug: None,
            iat: 0,
            exp: 0,
        }
    }

    pub fn for_user(user: &User, tenant: Option<&Tenant>) -> Self {
        Self {
            sub: user.id.to_string(),
            kind: PrincipalKind::User,
            email: user.email.clone(),
            is_super_admin: false,
            tenant_id: tenant.map(|t| t.id),
            tenant_slug: tenant.map(|t| t.slug.clone()),
            iat: 0,
            exp: 0,
        }
    }

    pub fn for_portal_client(client: &PortalClient) -> Self {
        Self {
            sub: client.id.to_string(),
            kind: PrincipalKind::PortalClient,
            email: client.email.clone().unwrap_or_default(),
            is_super_admin: false,
            tenant_id: Some(client.tenant_id),
            tenant_slug: None,
            iat: 0,
            exp: 0,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}
