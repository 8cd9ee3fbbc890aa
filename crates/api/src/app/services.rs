//! Service wiring shared by every handler.
//!
//! Built once at startup from config and a storage backend, then threaded
//! through the router as `Extension<Arc<AppServices>>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use juris_auth::user::normalize_email;
use juris_auth::{PasswordVerifier, Superadmin, TokenCodec};
use juris_core::SuperadminId;
use juris_infra::store::{AccountStore, Lookup, PrincipalStore};
use juris_infra::{
    GrantReaper, GrantService, LoginCoordinator, PermissionResolver, ServiceError, Stores, TenantAdmin, UserAdmin,
};

use crate::clock::Clock;
use crate::config::{AppConfig, BootstrapSuperadmin};

pub struct AppServices {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub codec: TokenCodec,
    pub stores: Stores,
    pub verifier: PasswordVerifier,
    pub login: LoginCoordinator,
    pub resolver: PermissionResolver,
    pub grants: GrantService,
    pub tenant_admin: TenantAdmin,
    pub user_admin: UserAdmin,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("config", &self.config)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(config: AppConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        let verifier = PasswordVerifier::new(config.password_hash_cost)?;
        let codec = TokenCodec::new(
            config.secret_key.as_bytes(),
            config.superadmin_secret_key.as_bytes(),
            config.access_token_ttl,
            config.superadmin_token_ttl,
        );
        let resolver = PermissionResolver::new(&stores);

        Ok(Self {
            login: LoginCoordinator::new(&stores, verifier.clone(), config.lockout),
            grants: GrantService::new(&stores, resolver.clone()),
            tenant_admin: TenantAdmin::new(&stores, verifier.clone()),
            user_admin: UserAdmin::new(&stores),
            resolver,
            codec,
            verifier,
            stores,
            clock,
            config,
        })
    }

    pub fn reaper(&self) -> GrantReaper {
        GrantReaper::new(&self.stores)
    }

    /// Create the configured superadmin unless one already exists with that email.
    pub async fn bootstrap_superadmin(&self, bootstrap: &BootstrapSuperadmin) -> Result<(), ServiceError> {
        let email = normalize_email(&bootstrap.email);
        if !matches!(
            self.stores.principals.find_superadmin_by_email(&email).await?,
            Lookup::NotFound
        ) {
            return Ok(());
        }

        let verifier = self.verifier.clone();
        let password = bootstrap.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || verifier.hash(&password)).await??;
        let admin = Superadmin {
            id: SuperadminId::new(),
            name: "Administrator".to_string(),
            email,
            password_hash,
            permissions: BTreeMap::new(),
            active: true,
            last_login_at: None,
            created_at: self.clock.now(),
        };
        self.stores.accounts.insert_superadmin(&admin).await?;
        info!(superadmin_id = %admin.id, "bootstrap superadmin created");
        Ok(())
    }
}
