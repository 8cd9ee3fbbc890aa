//! Request/response bodies and JSON mapping helpers.

use std::collections::HashMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use juris_auth::{EffectivePermissions, IssuedToken, PermissionSet, Principal, RoleTag, Tenant};
use juris_core::UserId;
use juris_infra::{Record, RecordFilter};

use crate::app::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub tenant_slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuperadminLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Value>,
    pub is_super_admin: bool,
}

impl TokenResponse {
    pub fn bearer(issued: IssuedToken, user: Value, tenant: Option<&Tenant>, is_super_admin: bool) -> Self {
        Self {
            access_token: issued.token,
            token_type: "bearer",
            expires_in: issued.expires_in,
            user,
            tenant: tenant.map(tenant_to_json),
            is_super_admin,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub user_id: UserId,
    pub permissions: PermissionSet,
    pub duration_hours: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub user_id: UserId,
    pub role: RoleTag,
    pub duration_hours: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SuspendTenantRequest {
    #[serde(default)]
    pub reason: String,
}

pub fn tenant_to_json(tenant: &Tenant) -> Value {
    json!({
        "id": tenant.id,
        "name": tenant.name,
        "slug": tenant.slug,
        "plan": tenant.plan,
        "active": tenant.active,
        "suspended": tenant.suspended,
    })
}

/// Who the caller is, in the `/auth/me` shape.
pub fn principal_to_json(principal: &Principal) -> Value {
    match principal {
        Principal::Superadmin(admin) => json!({
            "kind": "superadmin",
            "user": admin,
            "tenant": null,
            "is_super_admin": true,
        }),
        Principal::TenantMember(member) => json!({
            "kind": "user",
            "user": member.user,
            "tenant": member.tenancy.as_ref().map(|t| tenant_to_json(&t.tenant)),
            "role": member.tenancy.as_ref().map(|t| t.membership.role),
            "is_super_admin": false,
        }),
        Principal::PortalClient(client) => json!({
            "kind": "portal_client",
            "user": client,
            "tenant": { "id": client.tenant_id },
            "is_super_admin": false,
        }),
    }
}

pub fn permissions_to_json(effective: &EffectivePermissions) -> Value {
    json!({
        "tenant_id": effective.tenant_id,
        "user_id": effective.user_id,
        "role": effective.role,
        "base_role": effective.base_role,
        "modules": effective.list_modules().iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        "permissions": effective.permissions,
        "granted": effective.permissions.granted(),
        "resolved_at": effective.resolved_at,
    })
}

/// Flatten a record: stored fields plus the guard-owned columns.
pub fn record_to_json(record: &Record) -> Value {
    let mut out = record.data.clone();
    out.insert("id".into(), json!(record.id));
    out.insert("tenant_id".into(), json!(record.tenant_id));
    if let Some(client_id) = record.client_id {
        out.insert("client_id".into(), json!(client_id));
    }
    out.insert("created_at".into(), json!(record.created_at));
    out.insert("updated_at".into(), json!(record.updated_at));
    Value::Object(out)
}

/// `limit`/`offset` page the result; every other query key is an equality filter.
pub fn record_filter(query: HashMap<String, String>) -> Result<RecordFilter, ApiError> {
    let mut filter = RecordFilter::default();
    for (key, value) in query {
        match key.as_str() {
            "limit" => {
                filter.limit = Some(
                    value
                        .parse()
                        .map_err(|_| ApiError::Validation("limit must be a non-negative integer".into()))?,
                )
            }
            "offset" => {
                filter.offset = value
                    .parse()
                    .map_err(|_| ApiError::Validation("offset must be a non-negative integer".into()))?
            }
            _ => {
                filter.equals.insert(key, Value::String(value));
            }
        }
    }
    Ok(filter)
}

/// Unwrap a JSON body, answering malformed input with 400 and the wire error shape.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

/// Request bodies for record writes must be JSON objects.
pub fn object_body(body: Value) -> Result<Map<String, Value>, ApiError> {
    match body {
        Value::Object(fields) => Ok(fields),
        _ => Err(ApiError::Validation("request body must be a JSON object".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_splits_paging_from_filters() {
        let query = HashMap::from([
            ("limit".to_string(), "20".to_string()),
            ("status".to_string(), "open".to_string()),
        ]);
        let filter = record_filter(query).unwrap();
        assert_eq!(filter.limit, Some(20));
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.equals.get("status"), Some(&json!("open")));

        let bad = HashMap::from([("offset".to_string(), "-1".to_string())]);
        assert!(matches!(record_filter(bad), Err(ApiError::Validation(_))));
    }

    #[test]
    fn record_bodies_must_be_objects() {
        assert!(object_body(json!({ "name": "ACME" })).is_ok());
        assert!(matches!(object_body(json!([1, 2])), Err(ApiError::Validation(_))));
    }
}
