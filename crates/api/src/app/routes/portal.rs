//! Client-portal routes: portal-client tokens only, narrowed to the
//! caller's own rows by the guard's portal scope.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    routing::get,
};
use serde_json::Value;

use juris_auth::RouteRequirements;
use juris_infra::EntityKind;

use crate::app::errors::ApiError;
use crate::app::routes::common;
use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::middleware::gated;

pub fn router() -> Router {
    Router::new()
        .route(
            "/portal/processes",
            gated(get(list_my_processes), RouteRequirements::portal_client()),
        )
        .route(
            "/portal/processes/:id",
            gated(get(get_my_process), RouteRequirements::portal_client()),
        )
}

pub async fn list_my_processes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    common::list_records(&services.stores, &ctx, EntityKind::Processes, query).await
}

pub async fn get_my_process(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    common::get_record(&services.stores, &ctx, EntityKind::Processes, &id).await
}
