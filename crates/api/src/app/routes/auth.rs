use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
    routing::{get, post},
};
use serde_json::{Value, json};

use juris_auth::{Principal, RouteRequirements, Surface, TokenClaims, TokenError};

use crate::app::dto::{self, LoginRequest, SuperadminLoginRequest, TokenResponse};
use crate::app::errors::{self, ApiError};
use crate::app::services::AppServices;
use crate::context::{RequestContext, request_meta};
use crate::middleware::gated;

pub fn public_router() -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/superadmin/login", post(superadmin_login))
}

pub fn router() -> Router {
    Router::new()
        .route("/auth/me", gated(get(me), RouteRequirements::authenticated()))
        .route(
            "/auth/me/permissions",
            gated(get(my_permissions), RouteRequirements::in_tenant()),
        )
        .route("/auth/logout", gated(post(logout), RouteRequirements::authenticated()))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let body = dto::json_body(body)?;
    let now = services.clock.now();
    let meta = request_meta(&headers);

    let principal = services
        .login
        .login(&body.email, &body.password, body.tenant_slug.as_deref(), &meta, now)
        .await?;

    let response = match principal {
        Principal::Superadmin(admin) => {
            let issued = services
                .codec
                .issue(Surface::Operational, TokenClaims::for_superadmin(&admin), now)
                .map_err(token_error)?;
            TokenResponse::bearer(issued, json!(admin), None, true)
        }
        Principal::TenantMember(member) => {
            let tenant = member.tenancy.as_ref().map(|t| &t.tenant);
            let issued = services
                .codec
                .issue(Surface::Operational, TokenClaims::for_user(&member.user, tenant), now)
                .map_err(token_error)?;
            TokenResponse::bearer(issued, json!(member.user), tenant, false)
        }
        Principal::PortalClient(_) => {
            return Err(ApiError::Internal("password login yielded a portal client".into()));
        }
    };
    Ok(Json(response))
}

pub async fn superadmin_login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<SuperadminLoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let body = dto::json_body(body)?;
    let now = services.clock.now();

    let admin = services
        .login
        .login_superadmin(&body.email, &body.password, &request_meta(&headers), now)
        .await
        .map_err(errors::superadmin_login_error)?;
    let issued = services
        .codec
        .issue(Surface::Administrative, TokenClaims::for_superadmin(&admin), now)
        .map_err(token_error)?;
    Ok(Json(TokenResponse::bearer(issued, json!(admin), None, true)))
}

pub async fn me(Extension(ctx): Extension<RequestContext>) -> Json<Value> {
    Json(dto::principal_to_json(ctx.principal()))
}

pub async fn my_permissions(Extension(ctx): Extension<RequestContext>) -> Result<Json<Value>, ApiError> {
    let effective = ctx.permissions().ok_or(ApiError::NotFound)?;
    Ok(Json(dto::permissions_to_json(effective)))
}

/// Tokens are stateless; the client discards its copy.
pub async fn logout() -> Json<Value> {
    Json(json!({ "message": "Successfully logged out" }))
}

fn token_error(err: TokenError) -> ApiError {
    ApiError::Internal(err.to_string())
}
