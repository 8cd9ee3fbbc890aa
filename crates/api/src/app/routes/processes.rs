use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde_json::Value;

use juris_auth::{Module, RouteRequirements};
use juris_infra::EntityKind;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::middleware::gated;

const KIND: EntityKind = EntityKind::Processes;

pub fn router() -> Router {
    let can = |action: &'static str| RouteRequirements::permission(Module::Processes, action);
    Router::new()
        .route("/processes", gated(get(list_processes), can("read")))
        .route("/processes", gated(post(create_process), can("create")))
        .route("/processes/:id", gated(get(get_process), can("read")))
        .route("/processes/:id", gated(delete(delete_process), can("delete")))
}

pub async fn list_processes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    common::list_records(&services.stores, &ctx, KIND, query).await
}

pub async fn get_process(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    common::get_record(&services.stores, &ctx, KIND, &id).await
}

pub async fn create_process(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = dto::json_body(body)?;
    common::create_record(&services.stores, &ctx, KIND, body, services.clock.now()).await
}

pub async fn delete_process(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    common::delete_record(&services.stores, &ctx, KIND, &id, services.clock.now()).await
}
