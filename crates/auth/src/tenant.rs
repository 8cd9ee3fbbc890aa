//! Tenants and tenant memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use juris_core::{DomainError, TenantId, UserId};

use crate::permissions::PermissionSet;
use crate::roles::RoleTag;

/// A customer organization (a law firm).
///
/// # Invariants
/// - `suspended` ⇒ no tenant-scoped request succeeds.
/// - `!active` ⇒ no login against this tenant succeeds.
/// - Never hard-deleted; deactivation is a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub email: String,
    pub plan: String,
    pub max_users: i32,
    pub max_processes: i32,
    pub active: bool,
    pub suspended: bool,
    pub suspension_reason: Option<String>,
    pub settings: Value,
    pub branding: Value,
    pub created_at: DateTime<Utc>,
}

/// Why a tenant is not available.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TenantUnavailable {
    Inactive,
    Suspended,
}

impl Tenant {
    /// A new tenant on the basic plan: active, not suspended.
    pub fn new(name: impl Into<String>, slug: &str, email: &str, now: DateTime<Utc>) -> Result<Self, DomainError> {
        validate_slug(slug)?;
        Ok(Self {
            id: TenantId::new(),
            name: name.into(),
            slug: slug.to_string(),
            email: email.trim().to_lowercase(),
            plan: "basic".to_string(),
            max_users: 5,
            max_processes: 100,
            active: true,
            suspended: false,
            suspension_reason: None,
            settings: Value::Object(Default::default()),
            branding: Value::Object(Default::default()),
            created_at: now,
        })
    }

    /// Both logins and tenant-scoped requests require an active, non-suspended tenant.
    pub fn availability(&self) -> Result<(), TenantUnavailable> {
        if !self.active {
            return Err(TenantUnavailable::Inactive);
        }
        if self.suspended {
            return Err(TenantUnavailable::Suspended);
        }
        Ok(())
    }

    pub fn suspend(&mut self, reason: &str) -> Result<(), DomainError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("suspension reason is required"));
        }
        if self.suspended {
            return Err(DomainError::invariant("tenant already suspended"));
        }
        self.suspended = true;
        self.suspension_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn unsuspend(&mut self) -> Result<(), DomainError> {
        if !self.suspended {
            return Err(DomainError::invariant("tenant is not suspended"));
        }
        self.suspended = false;
        self.suspension_reason = None;
        Ok(())
    }

    pub fn set_active(&mut self, active: bool) -> Result<(), DomainError> {
        if self.active == active {
            return Err(DomainError::invariant(if active {
                "tenant already active"
            } else {
                "tenant already inactive"
            }));
        }
        self.active = active;
        Ok(())
    }
}

/// Slugs are lowercase ASCII letters, digits and inner hyphens, 1..=63 chars.
pub fn validate_slug(slug: &str) -> Result<(), DomainError> {
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if slug.is_empty() || slug.len() > 63 || !valid_chars || slug.starts_with('-') || slug.ends_with('-') {
        return Err(DomainError::validation(format!("invalid tenant slug '{slug}'")));
    }
    Ok(())
}

/// N:M association of a user to a tenant.
///
/// `(tenant_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: RoleTag,
    /// Custom per-user overlay (layer 2 of resolution).
    pub permissions: PermissionSet,
    pub department: Option<String>,
    pub position: Option<String>,
    pub active: bool,
    pub primary_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: RoleTag, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
            permissions: PermissionSet::empty(),
            department: None,
            position: None,
            active: true,
            primary_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn primary_admin(tenant_id: TenantId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            primary_admin: true,
            ..Self::new(tenant_id, user_id, RoleTag::Admin, now)
        }
    }

    /// Enable or disable access to this one tenant. The user row is untouched.
    pub fn set_active(&mut self, active: bool, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.active == active {
            return Err(DomainError::invariant(if active {
                "membership already active"
            } else {
                "membership already deactivated"
            }));
        }
        self.active = active;
        self.updated_at = now;
        Ok(())
    }
}

/// Refuse to disable the only active primary admin of a tenant.
///
/// `other_primary_admins` counts active primary-admin memberships of the same
/// tenant excluding `target`.
pub fn ensure_primary_admin_remains(target: &Membership, other_primary_admins: usize) -> Result<(), DomainError> {
    if target.active && target.primary_admin && other_primary_admins == 0 {
        return Err(DomainError::conflict("tenant must keep an active primary admin"));
    }
    Ok(())
}

/// Deterministic membership order for tenant-less logins: oldest first, ties by tenant id.
pub fn pick_default_membership(memberships: &[Membership]) -> Option<&Membership> {
    memberships
        .iter()
        .filter(|m| m.active)
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn tenant() -> Tenant {
        Tenant {
            id: TenantId::new(),
            name: "Demo".into(),
            slug: "demo".into(),
            email: "office@demo".into(),
            plan: "basic".into(),
            max_users: 5,
            max_processes: 100,
            active: true,
            suspended: false,
            suspension_reason: None,
            settings: Value::Null,
            branding: Value::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn suspension_requires_reason() {
        let mut t = tenant();
        assert!(t.suspend("   ").is_err());
        t.suspend("unpaid invoices").unwrap();
        assert_eq!(t.availability(), Err(TenantUnavailable::Suspended));
        t.unsuspend().unwrap();
        assert_eq!(t.availability(), Ok(()));
    }

    #[test]
    fn inactive_wins_over_suspended() {
        let mut t = tenant();
        t.suspend("x").unwrap();
        t.set_active(false).unwrap();
        assert_eq!(t.availability(), Err(TenantUnavailable::Inactive));
    }

    #[test]
    fn slug_rules() {
        assert!(validate_slug("demo-firm-2").is_ok());
        assert!(validate_slug("Demo").is_err());
        assert!(validate_slug("-demo").is_err());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("a b").is_err());
    }

    #[test]
    fn default_membership_is_oldest_then_lowest_tenant() {
        let now = Utc::now();
        let user = UserId::new();
        let low = TenantId::from_uuid(Uuid::from_u128(1));
        let high = TenantId::from_uuid(Uuid::from_u128(2));

        let mut older_inactive = Membership::new(TenantId::new(), user, RoleTag::User, now - Duration::days(9));
        older_inactive.active = false;
        let tie_high = Membership::new(high, user, RoleTag::Lawyer, now - Duration::days(1));
        let tie_low = Membership::new(low, user, RoleTag::User, now - Duration::days(1));
        let newer = Membership::new(TenantId::new(), user, RoleTag::Admin, now);

        let all = vec![newer, tie_high, older_inactive, tie_low];
        let picked = pick_default_membership(&all).unwrap();
        assert_eq!(picked.tenant_id, low);
    }

    #[test]
    fn last_primary_admin_cannot_be_disabled() {
        let now = Utc::now();
        let mut admin = Membership::primary_admin(TenantId::new(), UserId::new(), now);
        assert!(matches!(
            ensure_primary_admin_remains(&admin, 0),
            Err(DomainError::Conflict(_))
        ));
        assert!(ensure_primary_admin_remains(&admin, 1).is_ok());

        let lawyer = Membership::new(admin.tenant_id, UserId::new(), RoleTag::Lawyer, now);
        assert!(ensure_primary_admin_remains(&lawyer, 0).is_ok());

        admin.set_active(false, now).unwrap();
        assert!(admin.set_active(false, now).is_err());
        admin.set_active(true, now).unwrap();
    }
}
