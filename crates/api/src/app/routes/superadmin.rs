//! Platform administration. Superadmin tokens only.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};

use juris_auth::{Principal, RouteRequirements, Tenant};
use juris_core::{SuperadminId, TenantId};
use juris_infra::NewTenant;

use crate::app::dto::{self, SuspendTenantRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::middleware::gated;

pub fn router() -> Router {
    let superadmin = RouteRequirements::superadmin;
    Router::new()
        .route("/tenants", gated(get(list_tenants), superadmin()))
        .route("/tenants", gated(post(create_tenant), superadmin()))
        .route("/tenants/:id/suspend", gated(post(suspend_tenant), superadmin()))
        .route("/tenants/:id/unsuspend", gated(post(unsuspend_tenant), superadmin()))
        .route("/tenants/:id/deactivate", gated(post(deactivate_tenant), superadmin()))
        .route("/tenants/:id/reactivate", gated(post(reactivate_tenant), superadmin()))
}

fn acting(ctx: &RequestContext) -> Result<SuperadminId, ApiError> {
    match ctx.principal() {
        Principal::Superadmin(admin) => Ok(admin.id),
        _ => Err(ApiError::Forbidden("superadmin required".into())),
    }
}

fn parse_tenant_id(raw: &str) -> Result<TenantId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid tenant id: {raw}")))
}

fn tenant_json(tenant: &Tenant) -> Json<Value> {
    Json(json!(tenant))
}

pub async fn list_tenants(Extension(services): Extension<Arc<AppServices>>) -> Result<Json<Value>, ApiError> {
    let tenants = services.tenant_admin.list().await?;
    Ok(Json(json!({ "items": tenants })))
}

pub async fn create_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<NewTenant>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = dto::json_body(body)?;
    let (tenant, admin) = services
        .tenant_admin
        .create_tenant(acting(&ctx)?, body, services.clock.now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "tenant": tenant, "admin": admin }))))
}

pub async fn suspend_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Result<Json<SuspendTenantRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = dto::json_body(body)?;
    let tenant = services
        .tenant_admin
        .suspend(acting(&ctx)?, parse_tenant_id(&id)?, &body.reason, services.clock.now())
        .await?;
    Ok(tenant_json(&tenant))
}

pub async fn unsuspend_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tenant = services
        .tenant_admin
        .unsuspend(acting(&ctx)?, parse_tenant_id(&id)?, services.clock.now())
        .await?;
    Ok(tenant_json(&tenant))
}

pub async fn deactivate_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tenant = services
        .tenant_admin
        .deactivate(acting(&ctx)?, parse_tenant_id(&id)?, services.clock.now())
        .await?;
    Ok(tenant_json(&tenant))
}

pub async fn reactivate_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tenant = services
        .tenant_admin
        .reactivate(acting(&ctx)?, parse_tenant_id(&id)?, services.clock.now())
        .await?;
    Ok(tenant_json(&tenant))
}
