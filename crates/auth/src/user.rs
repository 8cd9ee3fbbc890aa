//! Tenant-bound users and the failed-login lockout policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use juris_core::UserId;

/// A tenant-bound principal.
///
/// # Invariants
/// - `email` is globally unique across users (stored lowercase).
/// - `locked_until > now` ⇒ authentication fails regardless of password.
/// - Soft-deactivated, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub oab_number: Option<String>,
    pub oab_state: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub timezone: String,
    pub language: String,
    pub active: bool,
    pub email_verified: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: &str, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: normalize_email(email),
            password_hash,
            oab_number: None,
            oab_state: None,
            phone: None,
            specialty: None,
            timezone: "America/Sao_Paulo".to_string(),
            language: "pt-BR".to_string(),
            active: true,
            email_verified: false,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Count one failed attempt. Returns `true` when this attempt locked the account.
    ///
    /// An expired lock starts a fresh window before counting.
    pub fn record_failed_login(&mut self, policy: &LockoutPolicy, now: DateTime<Utc>) -> bool {
        if self.locked_until.is_some_and(|until| until <= now) {
            self.locked_until = None;
            self.failed_login_attempts = 0;
        }

        self.failed_login_attempts = self.failed_login_attempts.saturating_add(1);
        self.updated_at = now;

        if self.failed_login_attempts >= policy.max_failed_attempts && self.locked_until.is_none() {
            self.locked_until = Some(now + policy.lockout);
            return true;
        }
        false
    }

    pub fn record_successful_login(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.last_login_at = Some(now);
        self.updated_at = now;
    }

    pub fn unlock(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.updated_at = now;
    }
}

/// Emails are compared trimmed and lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Failed-login lockout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger the lock (default: 5).
    pub max_failed_attempts: u32,
    /// Lock duration (default: 30 minutes).
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::minutes(30),
        }
    }
}
