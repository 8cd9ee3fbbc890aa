//! Time-bounded permission and role overlays.
//!
//! Both kinds share the same lifecycle:
//!
//! ```text
//! active ──revoke──▶ inactive (revoked)
//!   │
//!   └──now ≥ expires_at──▶ inactive (auto_expired)
//! ```
//!
//! Both inactive states are terminal.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use juris_core::{DomainError, GrantId, TenantId, UserId};

use crate::permissions::PermissionSet;
use crate::roles::RoleTag;

/// Longest window a temporary grant may cover, in days.
pub const MAX_GRANT_DAYS: i64 = 90;

/// Issuance checks shared by both grant kinds.
pub fn validate_grant_request(duration: Duration, reason: &str) -> Result<(), DomainError> {
    if duration <= Duration::zero() {
        return Err(DomainError::validation("grant duration must be positive"));
    }
    if duration > Duration::days(MAX_GRANT_DAYS) {
        return Err(DomainError::validation("grant duration exceeds 90 days"));
    }
    if reason.trim().is_empty() {
        return Err(DomainError::validation("grant reason is required"));
    }
    Ok(())
}

/// Active-and-unexpired predicate shared by both grant kinds.
fn effective(active: bool, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    active && expires_at > now
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryPermission {
    pub id: GrantId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub permissions: PermissionSet,
    /// The user's effective permissions when the grant was issued.
    pub snapshot: PermissionSet,
    pub granted_by: UserId,
    pub reason: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub auto_expired: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<UserId>,
}

impl TemporaryPermission {
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        user_id: UserId,
        tenant_id: TenantId,
        permissions: PermissionSet,
        snapshot: PermissionSet,
        granted_by: UserId,
        reason: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        validate_grant_request(duration, reason)?;
        Ok(Self {
            id: GrantId::new(),
            user_id,
            tenant_id,
            permissions,
            snapshot,
            granted_by,
            reason: reason.trim().to_string(),
            granted_at: now,
            expires_at: now + duration,
            active: true,
            auto_expired: false,
            revoked_at: None,
            revoked_by: None,
        })
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        effective(self.active, self.expires_at, now)
    }

    /// Still flagged active but past its window: the reaper's target.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at <= now
    }

    pub fn expire(&mut self) {
        self.active = false;
        self.auto_expired = true;
    }

    pub fn revoke(&mut self, by: UserId, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::not_found());
        }
        self.active = false;
        self.revoked_at = Some(now);
        self.revoked_by = Some(by);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryRoleAssignment {
    pub id: GrantId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: RoleTag,
    /// The membership role when the assignment was issued.
    pub original_role: RoleTag,
    pub granted_by: UserId,
    pub reason: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub auto_expired: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<UserId>,
}

impl TemporaryRoleAssignment {
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        user_id: UserId,
        tenant_id: TenantId,
        role: RoleTag,
        original_role: RoleTag,
        granted_by: UserId,
        reason: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        validate_grant_request(duration, reason)?;
        Ok(Self {
            id: GrantId::new(),
            user_id,
            tenant_id,
            role,
            original_role,
            granted_by,
            reason: reason.trim().to_string(),
            granted_at: now,
            expires_at: now + duration,
            active: true,
            auto_expired: false,
            revoked_at: None,
            revoked_by: None,
        })
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        effective(self.active, self.expires_at, now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at <= now
    }

    pub fn expire(&mut self) {
        self.active = false;
        self.auto_expired = true;
    }

    pub fn revoke(&mut self, by: UserId, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::not_found());
        }
        self.active = false;
        self.revoked_at = Some(now);
        self.revoked_by = Some(by);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Module;

    fn grant(now: DateTime<Utc>) -> TemporaryPermission {
        TemporaryPermission::issue(
            UserId::new(),
            TenantId::new(),
            PermissionSet::empty().grant(Module::Processes, &["delete"]),
            PermissionSet::empty(),
            UserId::new(),
            "migration",
            Duration::hours(1),
            now,
        )
        .unwrap()
    }

    #[test]
    fn issuance_rules() {
        assert!(validate_grant_request(Duration::zero(), "x").is_err());
        assert!(validate_grant_request(Duration::days(91), "x").is_err());
        assert!(validate_grant_request(Duration::days(90), "x").is_ok());
        assert!(validate_grant_request(Duration::hours(1), "  ").is_err());
    }

    #[test]
    fn window_is_half_open() {
        let t0 = Utc::now();
        let g = grant(t0);
        assert!(g.is_effective(t0 + Duration::minutes(30)));
        assert!(!g.is_effective(t0 + Duration::hours(1)));
        assert!(g.is_due(t0 + Duration::hours(1)));
        assert!(!g.is_due(t0 + Duration::minutes(59)));
    }

    #[test]
    fn inactive_states_are_terminal() {
        let t0 = Utc::now();
        let mut g = grant(t0);
        g.revoke(UserId::new(), t0).unwrap();
        assert!(g.revoke(UserId::new(), t0).is_err());
        assert!(!g.is_due(t0 + Duration::hours(2)));

        let mut g = grant(t0);
        g.expire();
        assert!(g.auto_expired);
        assert!(g.revoke(UserId::new(), t0).is_err());
    }
}
