//! Process configuration read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | unset: in-memory stores |
//! | `DATABASE_MAX_CONNECTIONS` | 10 |
//! | `SECRET_KEY` | dev default (warns) |
//! | `SUPERADMIN_SECRET_KEY` | dev default (warns); must differ from `SECRET_KEY` |
//! | `ACCESS_TOKEN_TTL_MINUTES` | 30 |
//! | `SUPERADMIN_TOKEN_TTL_MINUTES` | 1440 |
//! | `ALLOWED_ORIGINS` | empty, comma-separated |
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `REQUEST_TIMEOUT_SECS` | 30 |
//! | `REAPER_INTERVAL_SECS` | 60 |
//! | `MAX_FAILED_LOGINS` | 5 |
//! | `LOCKOUT_MINUTES` | 30 |
//! | `PASSWORD_HASH_COST` | 12 |
//! | `BOOTSTRAP_SUPERADMIN_EMAIL` / `_PASSWORD` | unset: no bootstrap |

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use juris_auth::LockoutPolicy;

const DEV_SECRET_KEY: &str = "dev-operational-secret";
const DEV_SUPERADMIN_SECRET_KEY: &str = "dev-administrative-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a valid number: {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },

    #[error("SECRET_KEY and SUPERADMIN_SECRET_KEY must differ")]
    SharedSigningKey,

    #[error("BOOTSTRAP_SUPERADMIN_EMAIL and BOOTSTRAP_SUPERADMIN_PASSWORD must be set together")]
    PartialBootstrap,
}

/// First superadmin, created at startup when none exists with that email.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapSuperadmin {
    pub email: String,
    pub password: String,
}

impl core::fmt::Debug for BootstrapSuperadmin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootstrapSuperadmin")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub secret_key: String,
    pub superadmin_secret_key: String,
    pub access_token_ttl: Duration,
    pub superadmin_token_ttl: Duration,
    pub allowed_origins: Vec<String>,
    pub bind_addr: String,
    pub request_timeout: StdDuration,
    pub reaper_interval: StdDuration,
    pub lockout: LockoutPolicy,
    pub password_hash_cost: u32,
    pub bootstrap_superadmin: Option<BootstrapSuperadmin>,
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("database_max_connections", &self.database_max_connections)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("superadmin_token_ttl", &self.superadmin_token_ttl)
            .field("allowed_origins", &self.allowed_origins)
            .field("bind_addr", &self.bind_addr)
            .field("request_timeout", &self.request_timeout)
            .field("reaper_interval", &self.reaper_interval)
            .field("lockout", &self.lockout)
            .field("password_hash_cost", &self.password_hash_cost)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret_key = get("SECRET_KEY").unwrap_or_else(|| {
            warn!("SECRET_KEY not set; using insecure dev default");
            DEV_SECRET_KEY.to_string()
        });
        let superadmin_secret_key = get("SUPERADMIN_SECRET_KEY").unwrap_or_else(|| {
            warn!("SUPERADMIN_SECRET_KEY not set; using insecure dev default");
            DEV_SUPERADMIN_SECRET_KEY.to_string()
        });
        if secret_key == superadmin_secret_key {
            return Err(ConfigError::SharedSigningKey);
        }

        let lockout = LockoutPolicy {
            max_failed_attempts: positive(&get, "MAX_FAILED_LOGINS", 5)?,
            lockout: Duration::minutes(positive(&get, "LOCKOUT_MINUTES", 30)?),
        };

        let bootstrap_superadmin = match (get("BOOTSTRAP_SUPERADMIN_EMAIL"), get("BOOTSTRAP_SUPERADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapSuperadmin { email, password }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialBootstrap),
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: positive(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            secret_key,
            superadmin_secret_key,
            access_token_ttl: Duration::minutes(positive(&get, "ACCESS_TOKEN_TTL_MINUTES", 30)?),
            superadmin_token_ttl: Duration::minutes(positive(&get, "SUPERADMIN_TOKEN_TTL_MINUTES", 1440)?),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            request_timeout: StdDuration::from_secs(positive(&get, "REQUEST_TIMEOUT_SECS", 30)?),
            reaper_interval: StdDuration::from_secs(positive(&get, "REAPER_INTERVAL_SECS", 60)?),
            lockout,
            password_hash_cost: positive(&get, "PASSWORD_HASH_COST", 12)?,
            bootstrap_superadmin,
        })
    }
}

fn positive<T>(get: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = get(name) else {
        return Ok(default);
    };
    let value = raw
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber { name, value: raw.clone() })?;
    if value <= T::default() {
        return Err(ConfigError::NotPositive { name });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.access_token_ttl, Duration::minutes(30));
        assert_eq!(cfg.superadmin_token_ttl, Duration::minutes(1440));
        assert_eq!(cfg.request_timeout, StdDuration::from_secs(30));
        assert_eq!(cfg.reaper_interval, StdDuration::from_secs(60));
        assert_eq!(cfg.lockout, LockoutPolicy::default());
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_ne!(cfg.secret_key, cfg.superadmin_secret_key);
    }

    #[test]
    fn equal_signing_keys_are_rejected() {
        let err = config(&[("SECRET_KEY", "same"), ("SUPERADMIN_SECRET_KEY", "same")]).unwrap_err();
        assert_eq!(err, ConfigError::SharedSigningKey);
    }

    #[test]
    fn unparsable_numbers_are_errors() {
        let err = config(&[("ACCESS_TOKEN_TTL_MINUTES", "half an hour")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "ACCESS_TOKEN_TTL_MINUTES", .. }));

        let err = config(&[("REAPER_INTERVAL_SECS", "0")]).unwrap_err();
        assert_eq!(err, ConfigError::NotPositive { name: "REAPER_INTERVAL_SECS" });
    }

    #[test]
    fn origins_and_bootstrap_are_parsed() {
        let cfg = config(&[
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
            ("BOOTSTRAP_SUPERADMIN_EMAIL", "root@juris"),
            ("BOOTSTRAP_SUPERADMIN_PASSWORD", "r00t"),
        ])
        .unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.bootstrap_superadmin.unwrap().email, "root@juris");

        let err = config(&[("BOOTSTRAP_SUPERADMIN_EMAIL", "root@juris")]).unwrap_err();
        assert_eq!(err, ConfigError::PartialBootstrap);
    }
}
