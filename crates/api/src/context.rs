use axum::http::HeaderMap;

use juris_auth::{Actor, EffectivePermissions, Principal, RequestMeta};
use juris_core::{TenantId, UserId};
use juris_infra::{Scope, Stores, TenantGuard};

/// Per-request context placed in extensions by the gate.
///
/// The permission snapshot is resolved once at gate time; handlers read it
/// from here and never resolve again within the same request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    principal: Principal,
    permissions: Option<EffectivePermissions>,
    meta: RequestMeta,
}

impl RequestContext {
    pub fn new(principal: Principal, permissions: Option<EffectivePermissions>, meta: RequestMeta) -> Self {
        Self {
            principal,
            permissions,
            meta,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn permissions(&self) -> Option<&EffectivePermissions> {
        self.permissions.as_ref()
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.principal.tenant_id()
    }

    pub fn actor(&self) -> Actor {
        Actor::of(&self.principal)
    }

    /// The acting tenant user and its tenant, if the principal is one.
    pub fn tenant_user(&self) -> Option<(TenantId, UserId)> {
        match &self.principal {
            Principal::TenantMember(member) => member.tenancy.as_ref().map(|t| (t.tenant.id, member.user.id)),
            _ => None,
        }
    }

    /// Isolation scope for data access; portal clients are narrowed to their own rows.
    pub fn scope(&self) -> Option<Scope> {
        match &self.principal {
            Principal::Superadmin(_) => None,
            Principal::TenantMember(member) => member.tenancy.as_ref().map(|t| Scope::tenant(t.tenant.id)),
            Principal::PortalClient(client) => Some(Scope::portal(client.tenant_id, client.id)),
        }
    }

    pub fn guard(&self, stores: &Stores) -> Option<TenantGuard> {
        self.scope()
            .map(|scope| TenantGuard::new(stores, scope, self.actor()).with_meta(self.meta.clone()))
    }
}

/// Caller address and agent, for audit records.
pub fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    RequestMeta {
        ip: header("x-forwarded-for").and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header("user-agent"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn meta_takes_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8"));
        let meta = request_meta(&headers);
        assert_eq!(meta.ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8"));
        assert_eq!(request_meta(&HeaderMap::new()), RequestMeta::default());
    }
}
