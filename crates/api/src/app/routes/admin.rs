//! Tenant administration: account state and temporary grants.
//!
//! Everything here acts inside the caller's own tenant; targets in other
//! tenants are reported as not found.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    routing::{delete, get, post},
};
use chrono::Duration;
use serde_json::{Value, json};

use juris_auth::{Module, RoleTag, RouteRequirements, User};
use juris_core::{GrantId, TenantId, UserId};

use crate::app::dto::{self, AssignRoleRequest, GrantPermissionRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::middleware::gated;

pub fn router() -> Router {
    let admin = || RouteRequirements::role(RoleTag::Admin);
    Router::new()
        .route(
            "/users/:id/deactivate",
            gated(post(deactivate_user), RouteRequirements::permission(Module::Users, "delete")),
        )
        .route(
            "/users/:id/reactivate",
            gated(post(reactivate_user), RouteRequirements::permission(Module::Users, "delete")),
        )
        .route(
            "/users/:id/unlock",
            gated(post(unlock_user), RouteRequirements::permission(Module::Users, "update")),
        )
        .route("/users/:id/grants", gated(get(list_grants), admin()))
        .route("/temporary-permissions", gated(post(grant_permission), admin()))
        .route("/temporary-permissions/:id", gated(delete(revoke_permission), admin()))
        .route("/temporary-roles", gated(post(assign_role), admin()))
        .route("/temporary-roles/:id", gated(delete(revoke_role), admin()))
}

fn acting(ctx: &RequestContext) -> Result<(TenantId, UserId), ApiError> {
    ctx.tenant_user()
        .ok_or_else(|| ApiError::Forbidden("tenant user required".into()))
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid user id: {raw}")))
}

fn parse_grant_id(raw: &str) -> Result<GrantId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid grant id: {raw}")))
}

fn hours(n: i64) -> Result<Duration, ApiError> {
    Duration::try_hours(n).ok_or_else(|| ApiError::Validation("duration_hours is out of range".into()))
}

fn user_to_json(user: &User) -> Json<Value> {
    Json(json!(user))
}

pub async fn deactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant_id, actor) = acting(&ctx)?;
    let membership = services
        .user_admin
        .deactivate(tenant_id, actor, parse_user_id(&id)?, services.clock.now())
        .await?;
    Ok(Json(json!(membership)))
}

pub async fn reactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant_id, actor) = acting(&ctx)?;
    let membership = services
        .user_admin
        .reactivate(tenant_id, actor, parse_user_id(&id)?, services.clock.now())
        .await?;
    Ok(Json(json!(membership)))
}

pub async fn unlock_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant_id, actor) = acting(&ctx)?;
    let user = services
        .user_admin
        .unlock(tenant_id, actor, parse_user_id(&id)?, services.clock.now())
        .await?;
    Ok(user_to_json(&user))
}

pub async fn list_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant_id, _) = acting(&ctx)?;
    let active = services
        .grants
        .list_active(tenant_id, parse_user_id(&id)?, services.clock.now())
        .await?;
    Ok(Json(json!(active)))
}

pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<GrantPermissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = dto::json_body(body)?;
    let (tenant_id, actor) = acting(&ctx)?;
    let grant = services
        .grants
        .grant_permission(
            tenant_id,
            actor,
            body.user_id,
            body.permissions,
            hours(body.duration_hours)?,
            &body.reason,
            services.clock.now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!(grant))))
}

pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant_id, actor) = acting(&ctx)?;
    let grant = services
        .grants
        .revoke_permission(tenant_id, actor, parse_grant_id(&id)?, services.clock.now())
        .await?;
    Ok(Json(json!(grant)))
}

pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<AssignRoleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = dto::json_body(body)?;
    let (tenant_id, actor) = acting(&ctx)?;
    let assignment = services
        .grants
        .assign_role(
            tenant_id,
            actor,
            body.user_id,
            body.role,
            hours(body.duration_hours)?,
            &body.reason,
            services.clock.now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!(assignment))))
}

pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (tenant_id, actor) = acting(&ctx)?;
    let assignment = services
        .grants
        .revoke_role(tenant_id, actor, parse_grant_id(&id)?, services.clock.now())
        .await?;
    Ok(Json(json!(assignment)))
}
