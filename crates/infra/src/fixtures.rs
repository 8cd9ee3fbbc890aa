//! Seeded in-memory world shared by this crate's tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use juris_auth::{LockoutPolicy, Membership, PasswordVerifier, RoleTag, Superadmin, Tenant, User};
use juris_core::SuperadminId;

use crate::login::LoginCoordinator;
use crate::store::{InMemoryStore, Stores};

pub(crate) struct World {
    pub stores: Stores,
    pub backend: Arc<InMemoryStore>,
    pub verifier: PasswordVerifier,
    pub login: LoginCoordinator,
    pub now: DateTime<Utc>,
    /// Tenant `demo`.
    pub demo: Tenant,
    /// Tenant `other`.
    pub other: Tenant,
    /// Lawyer in `demo`, password `p@ss`.
    pub joao: User,
    /// Admin in `demo`, password `adm1n`.
    pub maria: User,
    /// Lawyer in `other`, password `p@ss`.
    pub pedro: User,
    /// Password `r00t`.
    pub root: Superadmin,
}

impl World {
    pub async fn new() -> Self {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let (stores, backend) = Stores::in_memory();
        let verifier = PasswordVerifier::new(4).unwrap();

        let demo = Tenant::new("Demo Advocacia", "demo", "office@demo", now).unwrap();
        let other = Tenant::new("Other Advocacia", "other", "office@other", now).unwrap();
        backend.insert_tenant(demo.clone()).unwrap();
        backend.insert_tenant(other.clone()).unwrap();

        let joao = User::new("João", "joao@demo", verifier.hash("p@ss").unwrap(), now);
        let maria = User::new("Maria", "maria@demo", verifier.hash("adm1n").unwrap(), now);
        let pedro = User::new("Pedro", "pedro@other", verifier.hash("p@ss").unwrap(), now);
        for user in [&joao, &maria, &pedro] {
            stores.accounts.insert_user(user).await.unwrap();
        }
        for membership in [
            Membership::new(demo.id, joao.id, RoleTag::Lawyer, now),
            Membership::primary_admin(demo.id, maria.id, now),
            Membership::new(other.id, pedro.id, RoleTag::Lawyer, now),
        ] {
            stores.accounts.insert_membership(&membership).await.unwrap();
        }

        let root = Superadmin {
            id: SuperadminId::new(),
            name: "Root".into(),
            email: "root@juris".into(),
            password_hash: verifier.hash("r00t").unwrap(),
            permissions: BTreeMap::new(),
            active: true,
            last_login_at: None,
            created_at: now,
        };
        stores.accounts.insert_superadmin(&root).await.unwrap();

        let login = LoginCoordinator::new(&stores, verifier.clone(), LockoutPolicy::default());

        Self {
            stores,
            backend,
            verifier,
            login,
            now,
            demo,
            other,
            joao,
            maria,
            pedro,
            root,
        }
    }
}
