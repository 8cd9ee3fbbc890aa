//! Authorization gate and request deadline.
//!
//! The gate runs in two layers:
//! - `authenticate` (once per protected router): bearer token, decode,
//!   principal rehydration, permission snapshot, `RequestContext`.
//! - `require` (per route, via [`gated`]): evaluates that route's
//!   `RouteRequirements` against the context.
//!
//! Both failure paths write an audit record before answering.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use juris_auth::{
    AuditRecord, AuthError, CredentialFailure, Principal, PrincipalKind, RouteRequirements, Tenancy, Tenant,
    TenantMember, TokenClaims, authorize,
};
use juris_core::{PortalClientId, SuperadminId, UserId};
use juris_infra::store::{AuditLog, PrincipalStore};
use juris_infra::{Lookup, StoreError};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{RequestContext, request_meta};

pub async fn authenticate(
    State(services): State<Arc<AppServices>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let now = services.clock.now();
    let meta = request_meta(req.headers());

    let principal = match identify(&services, req.headers(), now).await? {
        Ok(principal) => principal,
        Err(err) => {
            info!(target: "security", kind = err.kind(), cause = %err, "request authentication failed");
            services
                .stores
                .audit
                .append(&AuditRecord::token_rejected(&err, now).meta(&meta))
                .await?;
            return Err(ApiError::Unauthenticated);
        }
    };

    let permissions = match principal.tenancy() {
        Some(tenancy) => Some(services.resolver.resolve(&tenancy.membership, now).await?),
        None => None,
    };

    req.extensions_mut()
        .insert(RequestContext::new(principal, permissions, meta));
    Ok(next.run(req).await)
}

/// Attach a route's declarations to one method handler.
pub fn gated(route: MethodRouter, requirements: RouteRequirements) -> MethodRouter {
    route.route_layer(axum::middleware::from_fn_with_state(requirements, require))
}

/// Route-level check; mounted through [`gated`].
pub async fn require(
    State(requirements): State<RouteRequirements>,
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(denial) = authorize(ctx.principal(), ctx.permissions(), &requirements) {
        warn!(
            target: "security",
            tenant_id = ?ctx.tenant_id(),
            principal = ctx.principal().kind().as_str(),
            module = ?denial.module.map(|m| m.as_str()),
            action = ?denial.action,
            requirement = %denial.requirement,
            "permission denied"
        );
        let audit = AuditRecord::permission_denied(ctx.principal(), &denial, services.clock.now()).meta(ctx.meta());
        services.stores.audit.append(&audit).await?;
        return Err(AuthError::PermissionDenied(denial).into());
    }
    Ok(next.run(req).await)
}

/// Cancel the handler once `timeout` elapses. Dropping the future aborts any
/// open transaction.
pub async fn deadline(State(timeout): State<Duration>, req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => {
            warn!(path = %path, timeout_ms = timeout.as_millis() as u64, "request deadline exceeded");
            ApiError::Timeout.into_response()
        }
    }
}

async fn identify(
    services: &AppServices,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Result<Result<Principal, AuthError>, StoreError> {
    let Some(token) = extract_bearer(headers) else {
        return Ok(Err(AuthError::TokenInvalid("missing bearer token".to_string())));
    };
    let decoded = match services.codec.decode(token, now) {
        Ok(decoded) => decoded,
        Err(e) => return Ok(Err(e.into())),
    };
    Ok(rehydrate(services, &decoded.claims)
        .await?
        .map_err(AuthError::InvalidCredentials))
}

/// Reload the principal named by the claims; anything deactivated or
/// suspended since issuance fails authentication.
async fn rehydrate(
    services: &AppServices,
    claims: &TokenClaims,
) -> Result<Result<Principal, CredentialFailure>, StoreError> {
    let principals = &services.stores.principals;

    match claims.kind {
        PrincipalKind::Superadmin => {
            let Ok(id) = claims.sub.parse::<SuperadminId>() else {
                return Ok(Err(CredentialFailure::PrincipalNotFound));
            };
            Ok(match principals.find_superadmin_by_id(id).await? {
                Lookup::Found(admin) => Ok(Principal::Superadmin(admin)),
                Lookup::Inactive => Err(CredentialFailure::SuperadminInactive),
                _ => Err(CredentialFailure::PrincipalNotFound),
            })
        }
        PrincipalKind::User => {
            let Ok(id) = claims.sub.parse::<UserId>() else {
                return Ok(Err(CredentialFailure::PrincipalNotFound));
            };
            let user = match principals.find_user_by_id(id).await? {
                Lookup::Found(user) => user,
                Lookup::Inactive => return Ok(Err(CredentialFailure::UserInactive)),
                _ => return Ok(Err(CredentialFailure::PrincipalNotFound)),
            };

            let Some(tenant_id) = claims.tenant_id else {
                return Ok(Ok(Principal::TenantMember(TenantMember { user, tenancy: None })));
            };
            let tenant = match available(principals.find_tenant_by_id(tenant_id).await?) {
                Ok(tenant) => tenant,
                Err(failure) => return Ok(Err(failure)),
            };
            let membership = match principals.find_membership(tenant_id, user.id).await? {
                Lookup::Found(membership) => membership,
                Lookup::Inactive => return Ok(Err(CredentialFailure::MembershipInactive)),
                _ => return Ok(Err(CredentialFailure::MembershipNotFound)),
            };
            Ok(Ok(Principal::TenantMember(TenantMember {
                user,
                tenancy: Some(Tenancy { tenant, membership }),
            })))
        }
        PrincipalKind::PortalClient => {
            let Ok(id) = claims.sub.parse::<PortalClientId>() else {
                return Ok(Err(CredentialFailure::PrincipalNotFound));
            };
            let client = match principals.find_portal_client_by_id(id).await? {
                Lookup::Found(client) => client,
                _ => return Ok(Err(CredentialFailure::PrincipalNotFound)),
            };
            if claims.tenant_id != Some(client.tenant_id) {
                return Ok(Err(CredentialFailure::TenantNotFound));
            }
            Ok(available(principals.find_tenant_by_id(client.tenant_id).await?)
                .map(|_| Principal::PortalClient(client)))
        }
    }
}

fn available(lookup: Lookup<Tenant>) -> Result<Tenant, CredentialFailure> {
    match lookup {
        Lookup::Found(tenant) => Ok(tenant),
        Lookup::Suspended => Err(CredentialFailure::TenantSuspended),
        Lookup::Inactive => Err(CredentialFailure::TenantInactive),
        Lookup::NotFound => Err(CredentialFailure::TenantNotFound),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
