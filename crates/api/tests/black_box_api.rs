use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::StatusCode;
use serde_json::{Value, json};

use juris_api::app::{self, AppServices};
use juris_api::clock::{Clock, ManualClock};
use juris_api::config::AppConfig;
use juris_auth::{
    AuditAction, AuditRecord, Membership, PortalClient, RoleTag, Surface, Tenant, TokenClaims, User,
};
use juris_core::{GrantId, PortalClientId};
use juris_infra::store::{AccountStore, GrantStore};
use juris_infra::{InMemoryStore, Stores};

const OPERATIONAL_SECRET: &str = "test-operational-secret";
const ADMINISTRATIVE_SECRET: &str = "test-administrative-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    client: reqwest::Client,
    services: Arc<AppServices>,
    backend: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    demo: Tenant,
    other: Tenant,
    joao: User,
    maria: User,
    pedro: User,
}

impl TestServer {
    /// Tenants `demo` and `other`; joao (lawyer), maria (admin) and rita
    /// (receptionist) in demo; pedro (lawyer) in other; superadmin root.
    async fn spawn() -> Self {
        let config = AppConfig::from_lookup(|name| match name {
            "SECRET_KEY" => Some(OPERATIONAL_SECRET.to_string()),
            "SUPERADMIN_SECRET_KEY" => Some(ADMINISTRATIVE_SECRET.to_string()),
            "PASSWORD_HASH_COST" => Some("4".to_string()),
            "BOOTSTRAP_SUPERADMIN_EMAIL" => Some("root@juris".to_string()),
            "BOOTSTRAP_SUPERADMIN_PASSWORD" => Some("r00t".to_string()),
            _ => None,
        })
        .expect("test config");

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let (stores, backend) = Stores::in_memory();
        let services = Arc::new(AppServices::new(config.clone(), stores, clock.clone()).unwrap());
        services
            .bootstrap_superadmin(config.bootstrap_superadmin.as_ref().unwrap())
            .await
            .unwrap();

        let demo = Tenant::new("Demo Advocacia", "demo", "office@demo", start).unwrap();
        let other = Tenant::new("Other Advocacia", "other", "office@other", start).unwrap();
        backend.insert_tenant(demo.clone()).unwrap();
        backend.insert_tenant(other.clone()).unwrap();

        let hash = |pw: &str| services.verifier.hash(pw).unwrap();
        let joao = User::new("João", "joao@demo", hash("p@ss"), start);
        let maria = User::new("Maria", "maria@demo", hash("adm1n"), start);
        let rita = User::new("Rita", "rita@demo", hash("p@ss"), start);
        let pedro = User::new("Pedro", "pedro@other", hash("p@ss"), start);
        for user in [&joao, &maria, &rita, &pedro] {
            services.stores.accounts.insert_user(user).await.unwrap();
        }
        for membership in [
            Membership::new(demo.id, joao.id, RoleTag::Lawyer, start),
            Membership::primary_admin(demo.id, maria.id, start),
            Membership::new(demo.id, rita.id, RoleTag::Receptionist, start),
            Membership::new(other.id, pedro.id, RoleTag::Lawyer, start),
        ] {
            services.stores.accounts.insert_membership(&membership).await.unwrap();
        }

        let router = app::build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            handle,
            client: reqwest::Client::new(),
            services,
            backend,
            clock,
            demo,
            other,
            joao,
            maria,
            pedro,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn login(&self, email: &str, password: &str, tenant_slug: Option<&str>) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password, "tenant_slug": tenant_slug }))
            .send()
            .await
            .unwrap()
    }

    async fn token(&self, email: &str, password: &str, tenant_slug: &str) -> String {
        let res = self.login(email, password, Some(tenant_slug)).await;
        assert_eq!(res.status(), StatusCode::OK, "login for {email} failed");
        let body: Value = res.json().await.unwrap();
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn delete(&self, path: &str, token: &str) -> reqwest::Response {
        self.client.delete(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    async fn create(&self, path: &str, token: &str, body: Value) -> String {
        let res = self.post(path, token, body).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    fn audit(&self) -> Vec<AuditRecord> {
        self.backend.audit_records().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Decode without checking `exp`: the test clock is not the wall clock.
fn decode_claims(token: &str, secret: &str) -> Value {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    jsonwebtoken::decode::<Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .expect("token should verify")
        .claims
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_login_happy_path() {
    let srv = TestServer::spawn().await;

    let res = srv.login("joao@demo", "p@ss", Some("demo")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 30 * 60);
    assert_eq!(body["tenant"]["slug"], "demo");
    assert!(body["user"].get("password_hash").is_none());

    let claims = decode_claims(body["access_token"].as_str().unwrap(), OPERATIONAL_SECRET);
    assert_eq!(claims["sub"], srv.joao.id.to_string());
    assert_eq!(claims["tenant_id"], srv.demo.id.to_string());
    assert_eq!(claims["is_super_admin"], false);

    let token = body["access_token"].as_str().unwrap();
    let me: Value = srv.get("/auth/me", token).await.json().await.unwrap();
    assert_eq!(me["is_super_admin"], false);
    assert_eq!(me["tenant"]["id"], srv.demo.id.to_string());

    let perms: Value = srv.get("/auth/me/permissions", token).await.json().await.unwrap();
    assert_eq!(perms["role"], "lawyer");
    assert!(perms["granted"].as_array().unwrap().iter().any(|g| g == "processes.read"));
}

#[tokio::test]
async fn suspended_tenant_blocks_login() {
    let srv = TestServer::spawn().await;
    let mut demo = srv.demo.clone();
    demo.suspend("billing overdue").unwrap();
    srv.backend.put_tenant(demo).unwrap();

    let res = srv.login("joao@demo", "p@ss", Some("demo")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Incorrect email or password");

    assert!(srv.audit().iter().any(|r| {
        r.action == AuditAction::InvalidCredentials && r.cause.as_deref() == Some("tenant_suspended")
    }));
}

#[tokio::test]
async fn bad_password_and_unknown_tenant_look_identical() {
    let srv = TestServer::spawn().await;

    let bad_password = srv.login("joao@demo", "wrong", Some("demo")).await;
    let bad_tenant = srv.login("joao@demo", "p@ss", Some("nowhere")).await;
    let unknown = srv.login("nobody@demo", "p@ss", None).await;

    for res in [bad_password, bad_tenant, unknown] {
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body, json!({ "detail": "Incorrect email or password" }));
    }
}

#[tokio::test]
async fn cross_tenant_read_is_not_found() {
    let srv = TestServer::spawn().await;
    let maria = srv.token("maria@demo", "adm1n", "demo").await;
    let record_id = srv.create("/clients", &maria, json!({ "name": "ACME Ltda" })).await;

    let pedro = srv.token("pedro@other", "p@ss", "other").await;
    let res = srv.get(&format!("/clients/{record_id}"), &pedro).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let listed: Value = srv.get("/clients", &pedro).await.json().await.unwrap();
    assert!(listed["items"].as_array().unwrap().is_empty());

    let joao = srv.token("joao@demo", "p@ss", "demo").await;
    let res = srv.get(&format!("/clients/{record_id}"), &joao).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tenant_id"], srv.demo.id.to_string());
}

#[tokio::test]
async fn foreign_tenant_id_in_body_is_a_server_error() {
    let srv = TestServer::spawn().await;
    let maria = srv.token("maria@demo", "adm1n", "demo").await;

    let res = srv
        .post(
            "/clients",
            &maria,
            json!({ "name": "Sneaky", "tenant_id": srv.other.id.to_string() }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(srv.audit().iter().any(|r| r.action == AuditAction::TenantScopeViolation));
}

#[tokio::test]
async fn permission_denial_is_403_and_audited() {
    let srv = TestServer::spawn().await;
    let rita = srv.token("rita@demo", "p@ss", "demo").await;

    let res = srv.get("/processes", &rita).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let denial = srv
        .audit()
        .into_iter()
        .find(|r| r.action == AuditAction::PermissionDenied)
        .expect("denial audited");
    assert_eq!(denial.details["module"], "processes");
    assert_eq!(denial.details["action"], "read");
    assert_eq!(denial.tenant_id, Some(srv.demo.id));
}

#[tokio::test]
async fn temporary_grant_then_expiration() {
    let srv = TestServer::spawn().await;
    let t0 = srv.now();

    let maria = srv.token("maria@demo", "adm1n", "demo").await;
    let res = srv
        .post(
            "/admin/temporary-permissions",
            &maria,
            json!({
                "user_id": srv.joao.id,
                "permissions": { "processes": { "delete": true } },
                "duration_hours": 1,
                "reason": "migration",
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let grant: Value = res.json().await.unwrap();
    let grant_id: GrantId = grant["id"].as_str().unwrap().parse().unwrap();

    let first = srv.create("/processes", &maria, json!({ "number": "0001" })).await;
    let second = srv.create("/processes", &maria, json!({ "number": "0002" })).await;

    srv.clock.set(t0 + ChronoDuration::minutes(30));
    let joao = srv.token("joao@demo", "p@ss", "demo").await;
    let res = srv.delete(&format!("/processes/{first}"), &joao).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    srv.clock.set(t0 + ChronoDuration::minutes(65));
    let report = srv.services.reaper().run_once(srv.now()).await.unwrap().unwrap();
    assert_eq!(report.expired_permissions, vec![grant_id]);

    let joao = srv.token("joao@demo", "p@ss", "demo").await;
    let res = srv.delete(&format!("/processes/{second}"), &joao).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let row = srv
        .services
        .stores
        .grants
        .permission_record(srv.demo.id, grant_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.active);
    assert!(row.auto_expired);

    let expirations = srv
        .audit()
        .iter()
        .filter(|r| r.action == AuditAction::TemporaryPermissionExpired)
        .count();
    assert_eq!(expirations, 1);
}

#[tokio::test]
async fn lockout_then_cooldown() {
    let srv = TestServer::spawn().await;
    let t = srv.now();

    for i in 0..5 {
        srv.clock.set(t + ChronoDuration::seconds(10 * i));
        let res = srv.login("joao@demo", "wrong", Some("demo")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
    let fifth = t + ChronoDuration::seconds(40);
    let user = srv.services.stores.accounts.user_record(srv.joao.id).await.unwrap().unwrap();
    assert_eq!(user.locked_until, Some(fifth + ChronoDuration::minutes(30)));

    srv.clock.set(fifth + ChronoDuration::minutes(29));
    let res = srv.login("joao@demo", "p@ss", Some("demo")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    srv.clock.set(fifth + ChronoDuration::minutes(31));
    let res = srv.login("joao@demo", "p@ss", Some("demo")).await;
    assert_eq!(res.status(), StatusCode::OK);

    let user = srv.services.stores.accounts.user_record(srv.joao.id).await.unwrap().unwrap();
    assert_eq!(user.failed_login_attempts, 0);
    assert_eq!(user.locked_until, None);
}

#[tokio::test]
async fn missing_forged_and_expired_tokens_are_401() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/clients")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()["www-authenticate"], "Bearer");

    // Administrative kid, signed with the operational key.
    let claims = TokenClaims::for_user(&srv.maria, Some(&srv.demo));
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("administrative".to_string());
    let mut forged = serde_json::to_value(&claims).unwrap();
    forged["iat"] = json!(srv.now().timestamp());
    forged["exp"] = json!((srv.now() + ChronoDuration::minutes(5)).timestamp());
    let forged = jsonwebtoken::encode(&header, &forged, &EncodingKey::from_secret(OPERATIONAL_SECRET.as_bytes()))
        .unwrap();
    assert_eq!(srv.get("/clients", &forged).await.status(), StatusCode::UNAUTHORIZED);

    let token = srv.token("maria@demo", "adm1n", "demo").await;
    srv.clock.advance(ChronoDuration::minutes(31));
    assert_eq!(srv.get("/clients", &token).await.status(), StatusCode::UNAUTHORIZED);

    let audit = srv.audit();
    assert!(audit.iter().any(|r| r.action == AuditAction::TokenInvalid));
    assert!(audit.iter().any(|r| r.action == AuditAction::TokenExpired));
}

#[tokio::test]
async fn superadmin_is_never_tenant_scoped() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .post(srv.url("/auth/superadmin/login"))
        .json(&json!({ "email": "root@juris", "password": "r00t" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let token = body["access_token"].as_str().unwrap().to_string();
    let claims = decode_claims(&token, ADMINISTRATIVE_SECRET);
    assert_eq!(claims["is_super_admin"], true);
    assert!(claims["tenant_id"].is_null());

    assert_eq!(srv.get("/clients", &token).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(srv.get("/superadmin/tenants", &token).await.status(), StatusCode::OK);

    let maria = srv.token("maria@demo", "adm1n", "demo").await;
    assert_eq!(srv.get("/superadmin/tenants", &maria).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn superadmin_tenant_lifecycle() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .post(srv.url("/auth/superadmin/login"))
        .json(&json!({ "email": "root@juris", "password": "r00t" }))
        .send()
        .await
        .unwrap();
    let root: Value = res.json().await.unwrap();
    let root = root["access_token"].as_str().unwrap().to_string();

    let res = srv
        .post(
            "/superadmin/tenants",
            &root,
            json!({
                "name": "Nova Advocacia",
                "slug": "nova",
                "email": "office@nova",
                "admin_name": "Ana",
                "admin_email": "ana@nova",
                "admin_password": "s3cret",
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    let tenant_id = created["tenant"]["id"].as_str().unwrap().to_string();

    let duplicate = srv
        .post(
            "/superadmin/tenants",
            &root,
            json!({
                "name": "Again",
                "slug": "nova",
                "email": "x@nova",
                "admin_name": "X",
                "admin_email": "x@nova",
                "admin_password": "x",
            }),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let ana = srv.token("ana@nova", "s3cret", "nova").await;
    assert_eq!(srv.get("/clients", &ana).await.status(), StatusCode::OK);

    let no_reason = srv
        .post(&format!("/superadmin/tenants/{tenant_id}/suspend"), &root, json!({ "reason": " " }))
        .await;
    assert_eq!(no_reason.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .post(
            &format!("/superadmin/tenants/{tenant_id}/suspend"),
            &root,
            json!({ "reason": "billing overdue" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    // Tokens issued before the suspension stop working on the next request.
    assert_eq!(srv.get("/clients", &ana).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn account_administration_is_tenant_scoped() {
    let srv = TestServer::spawn().await;
    let maria = srv.token("maria@demo", "adm1n", "demo").await;
    let joao = srv.token("joao@demo", "p@ss", "demo").await;

    let res = srv
        .post(&format!("/admin/users/{}/deactivate", srv.joao.id), &maria, json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(srv.get("/auth/me", &joao).await.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .post(&format!("/admin/users/{}/reactivate", srv.joao.id), &maria, json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    // Accounts in another tenant look like missing ones.
    let res = srv
        .post(&format!("/admin/users/{}/deactivate", srv.pedro.id), &maria, json!({}))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let joao_admin = srv
        .post(&format!("/admin/users/{}/unlock", srv.maria.id), &joao, json!({}))
        .await;
    assert_eq!(joao_admin.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn portal_client_sees_only_its_processes() {
    let srv = TestServer::spawn().await;
    let client = PortalClient {
        id: PortalClientId::new(),
        tenant_id: srv.demo.id,
        name: "Carlos".into(),
        email: Some("carlos@client".into()),
        phone: None,
        active: true,
    };
    srv.services.stores.accounts.insert_portal_client(&client).await.unwrap();

    let maria = srv.token("maria@demo", "adm1n", "demo").await;
    let mine = srv
        .create("/processes", &maria, json!({ "number": "0001", "client_id": client.id.to_string() }))
        .await;
    let theirs = srv.create("/processes", &maria, json!({ "number": "0002" })).await;

    let portal = srv
        .services
        .codec
        .issue(Surface::Operational, TokenClaims::for_portal_client(&client), srv.now())
        .unwrap()
        .token;

    let listed: Value = srv.get("/portal/processes", &portal).await.json().await.unwrap();
    let items = listed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], mine);

    assert_eq!(srv.get(&format!("/portal/processes/{mine}"), &portal).await.status(), StatusCode::OK);
    assert_eq!(
        srv.get(&format!("/portal/processes/{theirs}"), &portal).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(srv.get("/processes", &portal).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(srv.get("/portal/processes", &maria).await.status(), StatusCode::FORBIDDEN);
}
