//! Tenant isolation guard.
//!
//! A guard is built per request from the scope captured by the authorization
//! gate. Every operation passes that scope to the record store, which applies
//! it as a predicate; nothing here can widen it.
//!
//! | Operation | Foreign or missing row |
//! |-----------|------------------------|
//! | `get_by_id` | `NotFound` |
//! | `list` | row never appears |
//! | `create` | scope columns injected; a conflicting `tenant_id`/`client_id` is a `ScopeViolation` |
//! | `update` | `NotFound` |
//! | `soft_delete` | `NotFound` |
//!
//! The portal variant additionally pins `client_id`.
//!
//! Successful mutations hand their audit record to the store, which writes it
//! in the same transaction as the row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{error, instrument};
use uuid::Uuid;

use juris_auth::{Actor, AuditAction, AuditOutcome, AuditRecord, RequestMeta};
use juris_core::{PortalClientId, RecordId};

use crate::store::{AuditLog, EntityKind, Record, RecordFilter, RecordStore, Scope, StoreError, Stores};

/// Keys owned by the guard; never taken from caller data.
const RESERVED_KEYS: [&str; 6] = ["id", "tenant_id", "client_id", "created_at", "updated_at", "deleted_at"];

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("not found")]
    NotFound,

    #[error("validation failed: {0}")]
    Validation(String),

    /// A caller tried to write outside its scope. Programming error.
    #[error("tenant scope violation: {0}")]
    ScopeViolation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct TenantGuard {
    records: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditLog>,
    scope: Scope,
    actor: Actor,
    meta: RequestMeta,
}

impl core::fmt::Debug for TenantGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TenantGuard")
            .field("scope", &self.scope)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

impl TenantGuard {
    pub fn new(stores: &Stores, scope: Scope, actor: Actor) -> Self {
        Self {
            records: stores.records.clone(),
            audit: stores.audit.clone(),
            scope,
            actor,
            meta: RequestMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[instrument(skip(self), fields(tenant_id = %self.scope.tenant_id, table = kind.table()))]
    pub async fn get_by_id(&self, kind: EntityKind, id: RecordId) -> Result<Record, GuardError> {
        self.records
            .fetch(kind, &self.scope, id)
            .await?
            .ok_or(GuardError::NotFound)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %self.scope.tenant_id, table = kind.table()))]
    pub async fn list(&self, kind: EntityKind, filter: &RecordFilter) -> Result<Vec<Record>, GuardError> {
        Ok(self.records.scan(kind, &self.scope, filter).await?)
    }

    #[instrument(skip(self, fields, now), fields(tenant_id = %self.scope.tenant_id, table = kind.table()))]
    pub async fn create(
        &self,
        kind: EntityKind,
        mut fields: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Record, GuardError> {
        self.check_scope_columns(kind, &fields, now).await?;

        let client_id = match self.scope.client_id {
            Some(client_id) => Some(client_id),
            None => fields.get("client_id").map(parse_client_id).transpose()?,
        };
        strip_reserved(&mut fields);

        let record = Record {
            id: RecordId::new(),
            tenant_id: self.scope.tenant_id,
            client_id,
            data: fields,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let audit = self
            .record_audit(AuditAction::RecordCreated, kind, record.id, now)
            .diff(None, Some(Value::Object(record.data.clone())));
        self.records.insert(kind, &record, &audit).await?;
        Ok(record)
    }

    #[instrument(skip(self, fields, now), fields(tenant_id = %self.scope.tenant_id, table = kind.table()))]
    pub async fn update(
        &self,
        kind: EntityKind,
        id: RecordId,
        mut fields: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Record, GuardError> {
        self.check_scope_columns(kind, &fields, now).await?;
        strip_reserved(&mut fields);

        let audit = self.record_audit(AuditAction::RecordUpdated, kind, id, now);
        let (_, after) = self
            .records
            .patch(kind, &self.scope, id, &fields, now, audit)
            .await?
            .ok_or(GuardError::NotFound)?;
        Ok(after)
    }

    #[instrument(skip(self, now), fields(tenant_id = %self.scope.tenant_id, table = kind.table()))]
    pub async fn soft_delete(&self, kind: EntityKind, id: RecordId, now: DateTime<Utc>) -> Result<(), GuardError> {
        let audit = self.record_audit(AuditAction::RecordDeleted, kind, id, now);
        self.records
            .mark_deleted(kind, &self.scope, id, now, audit)
            .await?
            .ok_or(GuardError::NotFound)?;
        Ok(())
    }

    fn record_audit(&self, action: AuditAction, kind: EntityKind, id: RecordId, now: DateTime<Utc>) -> AuditRecord {
        AuditRecord::new(self.actor.clone(), action, AuditOutcome::Success, now)
            .tenant(Some(self.scope.tenant_id))
            .resource(kind.table(), Some(id.to_string()))
            .meta(&self.meta)
    }

    /// Caller-supplied scope columns must agree with the guard's scope.
    async fn check_scope_columns(
        &self,
        kind: EntityKind,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        if let Some(supplied) = fields.get("tenant_id") {
            if !matches_uuid(supplied, self.scope.tenant_id.as_uuid()) {
                return self.violation(kind, "tenant_id", supplied, now).await;
            }
        }
        if let (Some(expected), Some(supplied)) = (self.scope.client_id, fields.get("client_id")) {
            if !matches_uuid(supplied, expected.as_uuid()) {
                return self.violation(kind, "client_id", supplied, now).await;
            }
        }
        Ok(())
    }

    async fn violation(
        &self,
        kind: EntityKind,
        column: &str,
        supplied: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        error!(
            target: "security",
            tenant_id = %self.scope.tenant_id,
            table = kind.table(),
            column,
            supplied = %supplied,
            "write outside the request scope aborted"
        );
        let record = AuditRecord::new(self.actor.clone(), AuditAction::TenantScopeViolation, AuditOutcome::Denied, now)
            .tenant(Some(self.scope.tenant_id))
            .resource(kind.table(), None)
            .meta(&self.meta)
            .details(json!({ "column": column, "supplied": supplied }));
        self.audit.append(&record).await?;
        Err(GuardError::ScopeViolation(format!("{column} does not match the request scope")))
    }
}

fn matches_uuid(value: &Value, expected: &Uuid) -> bool {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .is_some_and(|u| &u == expected)
}

fn parse_client_id(value: &Value) -> Result<PortalClientId, GuardError> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(PortalClientId::from_uuid)
        .ok_or_else(|| GuardError::Validation("client_id must be a UUID string".into()))
}

fn strip_reserved(fields: &mut Map<String, Value>) {
    for key in RESERVED_KEYS {
        fields.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::World;
    use chrono::Duration;
    use juris_core::TenantId;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn guards(world: &World) -> (TenantGuard, TenantGuard) {
        let a = TenantGuard::new(&world.stores, Scope::tenant(world.demo.id), Actor::User { id: world.joao.id });
        let b = TenantGuard::new(&world.stores, Scope::tenant(world.other.id), Actor::User { id: world.pedro.id });
        (a, b)
    }

    #[tokio::test]
    async fn foreign_tenant_sees_not_found_everywhere() {
        let world = World::new().await;
        let (a, b) = guards(&world);
        let record = a
            .create(EntityKind::Clients, fields(json!({ "name": "ACME" })), world.now)
            .await
            .unwrap();

        assert!(matches!(b.get_by_id(EntityKind::Clients, record.id).await, Err(GuardError::NotFound)));
        assert!(b.list(EntityKind::Clients, &RecordFilter::default()).await.unwrap().is_empty());
        assert!(matches!(
            b.update(EntityKind::Clients, record.id, fields(json!({ "name": "x" })), world.now).await,
            Err(GuardError::NotFound)
        ));
        assert!(matches!(
            b.soft_delete(EntityKind::Clients, record.id, world.now).await,
            Err(GuardError::NotFound)
        ));

        let still_there = a.get_by_id(EntityKind::Clients, record.id).await.unwrap();
        assert_eq!(still_there.data["name"], "ACME");
    }

    #[tokio::test]
    async fn create_injects_scope_and_rejects_conflicting_tenant() {
        let world = World::new().await;
        let (a, _) = guards(&world);

        let record = a
            .create(
                EntityKind::Processes,
                fields(json!({ "number": "0001", "tenant_id": world.demo.id.to_string() })),
                world.now,
            )
            .await
            .unwrap();
        assert_eq!(record.tenant_id, world.demo.id);
        assert!(!record.data.contains_key("tenant_id"));

        let err = a
            .create(
                EntityKind::Processes,
                fields(json!({ "number": "0002", "tenant_id": world.other.id.to_string() })),
                world.now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::ScopeViolation(_)));

        let audit = world.backend.audit_records().unwrap();
        assert!(audit.iter().any(|r| r.action == AuditAction::TenantScopeViolation));
        assert_eq!(
            a.list(EntityKind::Processes, &RecordFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn portal_scope_filters_by_client() {
        let world = World::new().await;
        let (a, _) = guards(&world);
        let mine = PortalClientId::new();
        let theirs = PortalClientId::new();
        for (client, number) in [(mine, "A-1"), (theirs, "B-1"), (mine, "A-2")] {
            a.create(
                EntityKind::Processes,
                fields(json!({ "number": number, "client_id": client.to_string() })),
                world.now,
            )
            .await
            .unwrap();
        }

        let portal = TenantGuard::new(
            &world.stores,
            Scope::portal(world.demo.id, mine),
            Actor::PortalClient { id: mine },
        );
        let visible = portal.list(EntityKind::Processes, &RecordFilter::default()).await.unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|r| r.client_id == Some(mine)));
    }

    #[tokio::test]
    async fn update_and_delete_are_audited_with_diffs() {
        let world = World::new().await;
        let (a, _) = guards(&world);
        let record = a
            .create(EntityKind::Clients, fields(json!({ "name": "ACME", "city": "Recife" })), world.now)
            .await
            .unwrap();

        let later = world.now + Duration::minutes(1);
        let updated = a
            .update(EntityKind::Clients, record.id, fields(json!({ "city": "Olinda" })), later)
            .await
            .unwrap();
        assert_eq!(updated.data["city"], "Olinda");
        assert_eq!(updated.data["name"], "ACME");

        a.soft_delete(EntityKind::Clients, record.id, later).await.unwrap();
        assert!(matches!(a.get_by_id(EntityKind::Clients, record.id).await, Err(GuardError::NotFound)));

        let audit = world.backend.audit_records().unwrap();
        let update = audit.iter().find(|r| r.action == AuditAction::RecordUpdated).unwrap();
        assert_eq!(update.old_value.as_ref().unwrap()["city"], "Recife");
        assert_eq!(update.new_value.as_ref().unwrap()["city"], "Olinda");
        assert!(audit.iter().any(|r| r.action == AuditAction::RecordDeleted));
    }

    #[tokio::test]
    async fn audit_rows_commit_with_the_write() {
        let world = World::new().await;
        let (a, _) = guards(&world);
        let record = a
            .create(EntityKind::Clients, fields(json!({ "name": "ACME" })), world.now)
            .await
            .unwrap();
        let audit = world.backend.audit_records().unwrap();
        let created = audit.iter().find(|r| r.action == AuditAction::RecordCreated).unwrap();
        assert_eq!(created.resource_id, Some(record.id.to_string()));
        assert_eq!(created.new_value.as_ref().unwrap()["name"], "ACME");

        // Writes that do not land leave no audit trail behind.
        let orphan = TenantGuard::new(&world.stores, Scope::tenant(TenantId::new()), Actor::User { id: world.joao.id });
        assert!(orphan.create(EntityKind::Clients, fields(json!({ "name": "x" })), world.now).await.is_err());
        let missing = RecordId::new();
        assert!(a.update(EntityKind::Clients, missing, fields(json!({ "name": "y" })), world.now).await.is_err());
        assert!(a.soft_delete(EntityKind::Clients, missing, world.now).await.is_err());

        let audit = world.backend.audit_records().unwrap();
        let mutations = audit
            .iter()
            .filter(|r| {
                matches!(
                    r.action,
                    AuditAction::RecordCreated | AuditAction::RecordUpdated | AuditAction::RecordDeleted
                )
            })
            .count();
        assert_eq!(mutations, 1);
    }
}
