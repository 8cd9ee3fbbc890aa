//! Record handlers shared by the tenant and portal surfaces.
//!
//! Every read and write goes through a `TenantGuard` built from the request
//! context, so the scope predicate comes from the gate, never from the caller.

use std::collections::HashMap;

use axum::{Json, http::StatusCode};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use juris_core::RecordId;
use juris_infra::{EntityKind, Stores, TenantGuard};

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::context::RequestContext;

fn guard(stores: &Stores, ctx: &RequestContext) -> Result<TenantGuard, ApiError> {
    ctx.guard(stores)
        .ok_or_else(|| ApiError::Forbidden("no tenant context".into()))
}

pub fn parse_record_id(raw: &str) -> Result<RecordId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid record id: {raw}")))
}

pub async fn list_records(
    stores: &Stores,
    ctx: &RequestContext,
    kind: EntityKind,
    query: HashMap<String, String>,
) -> Result<Json<Value>, ApiError> {
    let filter = dto::record_filter(query)?;
    let items = guard(stores, ctx)?
        .list(kind, &filter)
        .await?
        .iter()
        .map(dto::record_to_json)
        .collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })))
}

pub async fn get_record(
    stores: &Stores,
    ctx: &RequestContext,
    kind: EntityKind,
    id: &str,
) -> Result<Json<Value>, ApiError> {
    let record = guard(stores, ctx)?.get_by_id(kind, parse_record_id(id)?).await?;
    Ok(Json(dto::record_to_json(&record)))
}

pub async fn create_record(
    stores: &Stores,
    ctx: &RequestContext,
    kind: EntityKind,
    body: Value,
    now: DateTime<Utc>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let fields = dto::object_body(body)?;
    let record = guard(stores, ctx)?.create(kind, fields, now).await?;
    Ok((StatusCode::CREATED, Json(dto::record_to_json(&record))))
}

pub async fn update_record(
    stores: &Stores,
    ctx: &RequestContext,
    kind: EntityKind,
    id: &str,
    body: Value,
    now: DateTime<Utc>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_record_id(id)?;
    let fields = dto::object_body(body)?;
    let record = guard(stores, ctx)?.update(kind, id, fields, now).await?;
    Ok(Json(dto::record_to_json(&record)))
}

pub async fn delete_record(
    stores: &Stores,
    ctx: &RequestContext,
    kind: EntityKind,
    id: &str,
    now: DateTime<Utc>,
) -> Result<StatusCode, ApiError> {
    guard(stores, ctx)?
        .soft_delete(kind, parse_record_id(id)?, now)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
