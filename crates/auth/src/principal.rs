use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use juris_core::{PortalClientId, SuperadminId, TenantId};

use crate::tenant::{Membership, Tenant};
use crate::user::User;

/// Kind of principal a token was issued to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Superadmin,
    User,
    PortalClient,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Superadmin => "superadmin",
            PrincipalKind::User => "user",
            PrincipalKind::PortalClient => "portal_client",
        }
    }
}

/// Platform-level principal. Cannot belong to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superadmin {
    pub id: SuperadminId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Platform capabilities (`manage_tenants`, `view_analytics`, `manage_system`, `manage_backups`, ...).
    pub permissions: BTreeMap<String, bool>,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Superadmin {
    pub fn can(&self, capability: &str) -> bool {
        self.permissions.get(capability).copied().unwrap_or(false)
    }
}

/// External client-portal principal: a tenant's end customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalClient {
    pub id: PortalClientId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
}

/// A user's resolved tenant context.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenancy {
    pub tenant: Tenant,
    pub membership: Membership,
}

/// A tenant user, with the tenant it is acting in (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct TenantMember {
    pub user: User,
    pub tenancy: Option<Tenancy>,
}

/// The authenticated identity driving a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Superadmin(Superadmin),
    TenantMember(TenantMember),
    PortalClient(PortalClient),
}

impl Principal {
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::Superadmin(_) => PrincipalKind::Superadmin,
            Principal::TenantMember(_) => PrincipalKind::User,
            Principal::PortalClient(_) => PrincipalKind::PortalClient,
        }
    }

    pub fn is_superadmin(&self) -> bool {
        matches!(self, Principal::Superadmin(_))
    }

    /// Isolation scope of the principal; superadmins never have one.
    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Principal::Superadmin(_) => None,
            Principal::TenantMember(m) => m.tenancy.as_ref().map(|t| t.tenant.id),
            Principal::PortalClient(c) => Some(c.tenant_id),
        }
    }

    pub fn tenancy(&self) -> Option<&Tenancy> {
        match self {
            Principal::TenantMember(m) => m.tenancy.as_ref(),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Principal::Superadmin(s) => Some(&s.email),
            Principal::TenantMember(m) => Some(&m.user.email),
            Principal::PortalClient(c) => c.email.as_deref(),
        }
    }
}
