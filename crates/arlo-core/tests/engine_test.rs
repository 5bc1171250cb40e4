#![allow(clippy::unwrap_used)]
// End-to-end engine tests against a wiremock cloud.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arlo_core::{
    AuthError, AuthFlow, CodeRetry, ConnectionState, CoreError, Credentials, DeviceType, DomainEvent, Endpoints,
    Engine, EngineConfig, EngineDeps, MailboxConnection, OneTimeCodeSource, ReconnectConfig, SessionState,
};

const CONNECTED: &str = "event: message\ndata: {\"status\":\"connected\"}\n\n";
const REMOTE_LOGOUT: &str = "event: message\ndata: {\"action\":\"logout\"}\n\n";

// ── Helpers ─────────────────────────────────────────────────────────

fn oc_ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "meta": { "code": 200 }, "data": data }))
}

fn cloud_ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

fn push_flow() -> AuthFlow {
    AuthFlow::Push {
        mobile_payload: SecretString::from("payload".to_string()),
        saved_token: None,
    }
}

fn config(server: &MockServer, dir: &tempfile::TempDir, flow: AuthFlow) -> EngineConfig {
    let mut config = EngineConfig::new(
        Credentials {
            email: "a@b.c".into(),
            password: SecretString::from("pw".to_string()),
        },
        flow,
    );
    config.endpoints =
        Endpoints::new(&format!("{}/api", server.uri()), &format!("{}/hmsweb", server.uri())).unwrap();
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_retries: Some(0),
    };
    config.keepalive = Duration::from_secs(3600);
    config.credential_dir = dir.path().to_path_buf();
    config
}

fn engine(server: &MockServer, dir: &tempfile::TempDir) -> Engine {
    Engine::new(config(server, dir, push_flow())).unwrap()
}

/// Hands out a fixed mail body and counts how often it was asked.
struct ScriptedMailbox {
    body: &'static str,
    fetches: AtomicUsize,
}

#[async_trait]
impl OneTimeCodeSource for ScriptedMailbox {
    async fn fetch_code(&self, _: &MailboxConnection, subject: &str) -> Result<Option<String>, CoreError> {
        assert_eq!(subject, arlo_core::mailbox::SUBJECT_FILTER);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.body.to_owned()))
    }
}

fn email_engine(server: &MockServer, dir: &tempfile::TempDir, mailbox: Arc<ScriptedMailbox>) -> Engine {
    let flow = AuthFlow::Email {
        mailbox: MailboxConnection::default(),
        retry: CodeRetry {
            attempts: 2,
            delay: Duration::ZERO,
        },
    };
    let deps = EngineDeps {
        code_source: Some(mailbox),
        ..EngineDeps::default()
    };
    Engine::with_deps(config(server, dir, flow), deps).unwrap()
}

/// Email handshake up to the code submission, which each test mounts.
async fn mount_email_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(oc_ok(json!({ "token": "primary", "authenticated": 1_700_000_000, "mfa": true })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/getFactors"))
        .respond_with(oc_ok(json!({ "items": [{ "factorType": "EMAIL", "factorId": "F-MAIL" }] })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/startAuth"))
        .and(body_partial_json(json!({ "factorId": "F-MAIL" })))
        .respond_with(oc_ok(json!({ "factorAuthCode": "FAC-1" })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/validateAccessToken"))
        .respond_with(oc_ok(json!({})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hmsweb/users/session/v2"))
        .respond_with(cloud_ok(json!({ "token": "session", "userId": "U-1" })))
        .mount(server)
        .await;
}

async fn mount_push_login(server: &MockServer, factor_type: &str) {
    mount_push_login_expiring(server, factor_type, 3600).await;
}

async fn mount_push_login_expiring(server: &MockServer, factor_type: &str, expired_in: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v2/ocAuth_PHP_MFA"))
        .respond_with(oc_ok(json!({ "token": "primary", "authenticated": 1, "mfa": true })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/ocGetFactors_PHP_MFA"))
        .respond_with(oc_ok(json!({
            "items": [{ "factorType": factor_type, "factorId": "F1", "applicationId": "APP" }]
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/ocStart2FAauth_PHP_MFA"))
        .respond_with(oc_ok(json!({ "accessToken": { "token": "access", "expiredIn": expired_in } })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/ocAccessTokenValidate_PHP_MFA"))
        .respond_with(oc_ok(json!({ "tokenValidated": true })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hmsweb/users/session/v2"))
        .respond_with(cloud_ok(json!({ "token": "session", "userId": "U-1", "serialNumber": "SN-1" })))
        .mount(server)
        .await;
}

async fn mount_household(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/hmsweb/v2/users/devices"))
        .respond_with(cloud_ok(json!([
            { "deviceId": "HUB1", "deviceType": "basestation", "deviceName": "Home", "userId": "U-1" },
            { "deviceId": "CAM1", "deviceType": "camera", "parentId": "HUB1" },
            { "deviceId": "CAM2", "deviceType": "camera", "parentId": "HUB1" }
        ])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/hmsweb/users/devices/notify/.+$"))
        .respond_with(cloud_ok(json!({})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hmsweb/users/devices/automation/active"))
        .respond_with(cloud_ok(json!([
            { "gatewayId": "OTHER", "activeModes": ["mode0"] },
            { "gatewayId": "HUB1", "activeModes": ["mode1"] }
        ])))
        .mount(server)
        .await;
}

/// Serve `connections` connected streams, then reject the session.
async fn mount_stream(server: &MockServer, connections: u64) {
    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONNECTED))
        .up_to_n_times(connections)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
}

async fn wait_for_state(engine: &Engine, target: ConnectionState) {
    let mut rx = engine.connection_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
        .await
        .expect("state not reached in time")
        .unwrap();
}

async fn wait_for_session(engine: &Engine, target: SessionState) {
    let mut rx = engine.session().subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
        .await
        .expect("session state not reached in time")
        .unwrap();
}

async fn request_count(server: &MockServer, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == url_path)
        .count()
}

async fn subscription_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/hmsweb/users/devices/notify/"))
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter(|body| {
            body.get("resource")
                .and_then(Value::as_str)
                .is_some_and(|res| res.starts_with("subscriptions/"))
        })
        .count()
}

async fn notify_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/hmsweb/users/devices/notify/"))
        .count()
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn push_login_discovers_household() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "PUSH").await;
    mount_household(&server).await;
    mount_stream(&server, 1).await;

    let engine = engine(&server, &dir);
    let session = engine.login().await.unwrap();
    assert_eq!(session.identity.user_id, "U-1");
    assert_eq!(session.identity.serial_number.as_deref(), Some("SN-1"));
    assert_eq!(engine.session_state(), SessionState::Authenticated);
    assert!(session.token_expiry.is_some());

    let count = engine.wait_until_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(count, 3);
    assert_eq!(engine.registry().devices_of_type(DeviceType::Camera).len(), 2);
    assert_eq!(engine.registry().hub().unwrap().armed, Some(true));

    engine.shutdown().await;
}

#[tokio::test]
async fn login_without_matching_factor_leaves_session_unauthenticated() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "EMAIL").await;
    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CONNECTED))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(&server, &dir);
    let err = engine.login().await.unwrap_err();

    assert!(
        matches!(err, CoreError::Auth(AuthError::NoFactorAvailable { ref factor }) if factor == "PUSH"),
        "got {err:?}"
    );
    assert_eq!(engine.session_state(), SessionState::Unauthenticated);
    assert!(engine.session().session().is_none());
    assert!(!engine.session().is_valid());

    // No session exchange happened, so no bearer token was ever issued.
    let exchanged = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .any(|r| r.url.path() == "/hmsweb/users/session/v2");
    assert!(!exchanged);
}

#[tokio::test]
async fn email_login_submits_code_from_mailbox() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_email_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/finishAuth"))
        .and(body_partial_json(json!({ "factorAuthCode": "FAC-1", "otp": "123456" })))
        .respond_with(oc_ok(json!({ "token": "access", "expiresIn": 3600 })))
        .expect(1)
        .mount(&server)
        .await;

    let mailbox = Arc::new(ScriptedMailbox {
        body: "Your one-time code is 123456.",
        fetches: AtomicUsize::new(0),
    });
    let engine = email_engine(&server, &dir, Arc::clone(&mailbox));
    let session = engine.login().await.unwrap();

    assert_eq!(session.identity.user_id, "U-1");
    assert!(session.token_expiry.is_some());
    assert_eq!(engine.session_state(), SessionState::Authenticated);
    assert_eq!(mailbox.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(request_count(&server, "/hmsweb/users/session/v2").await, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn rejected_code_is_an_invalid_code_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_email_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/finishAuth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "meta": { "code": 400, "message": "otp mismatch" }, "data": {} })),
        )
        .mount(&server)
        .await;

    let mailbox = Arc::new(ScriptedMailbox {
        body: "code 654321",
        fetches: AtomicUsize::new(0),
    });
    let engine = email_engine(&server, &dir, mailbox);
    let err = engine.login().await.unwrap_err();

    assert!(
        matches!(err, CoreError::Auth(AuthError::InvalidCode(ref m)) if m.contains("otp mismatch")),
        "got {err:?}"
    );
    assert_eq!(engine.session_state(), SessionState::Unauthenticated);
    assert!(engine.session().session().is_none());
    assert_eq!(request_count(&server, "/hmsweb/users/session/v2").await, 0);
}

#[tokio::test]
async fn token_lifetime_elapsing_expires_session() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login_expiring(&server, "PUSH", 1).await;
    mount_household(&server).await;
    mount_stream(&server, 1).await;

    let engine = engine(&server, &dir);
    let mut events = engine.events();
    engine.login().await.unwrap();
    assert_eq!(engine.session_state(), SessionState::Authenticated);

    let logged_out = async {
        loop {
            if let DomainEvent::LoggedOut { remote } = *events.recv().await.unwrap() {
                return remote;
            }
        }
    };
    let remote = tokio::time::timeout(Duration::from_secs(5), logged_out)
        .await
        .expect("expiry did not fire");
    assert!(!remote);
    assert_eq!(engine.session_state(), SessionState::Expired);
    assert!(engine.session().session().is_none());
    assert_eq!(*engine.connection_state().borrow(), ConnectionState::Disconnected);

    engine.shutdown().await;
}

// ── Stream lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_resubscribes_hub_once_per_drop() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "PUSH").await;
    mount_household(&server).await;
    mount_stream(&server, 3).await;

    let engine = engine(&server, &dir);
    engine.login().await.unwrap();
    wait_for_state(&engine, ConnectionState::Failed).await;

    // One subscription on discovery, one per reconnect.
    assert_eq!(subscription_count(&server).await, 3);
    let devices_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/hmsweb/v2/users/devices")
        .count();
    assert_eq!(devices_fetches, 1, "reconnect must not rediscover");

    engine.shutdown().await;
}

#[tokio::test]
async fn siren_while_disconnected_sends_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "PUSH").await;
    mount_household(&server).await;
    mount_stream(&server, 1).await;

    let engine = engine(&server, &dir);
    engine.login().await.unwrap();
    engine.wait_until_ready(Duration::from_secs(5)).await.unwrap();
    wait_for_state(&engine, ConnectionState::Failed).await;

    let before = notify_count(&server).await;
    let err = engine.commands().siren_on("CAM1").await.unwrap_err();
    assert!(matches!(err, CoreError::Disconnected));
    assert_eq!(notify_count(&server).await, before);

    engine.shutdown().await;
}

#[tokio::test]
async fn missing_hub_fails_discovery() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "PUSH").await;
    Mock::given(method("GET"))
        .and(path("/hmsweb/v2/users/devices"))
        .respond_with(cloud_ok(json!([{ "deviceId": "CAM1", "deviceType": "camera" }])))
        .mount(&server)
        .await;
    mount_stream(&server, 1).await;

    let engine = engine(&server, &dir);
    let mut events = engine.events();
    engine.login().await.unwrap();

    let err = engine.wait_until_ready(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, CoreError::Rejected { .. }), "got {err:?}");
    assert!(engine.registry().is_empty());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(*event, arlo_core::DomainEvent::DiscoveryFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    engine.shutdown().await;
}

#[tokio::test]
async fn logout_clears_session_and_stops_stream() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "PUSH").await;
    mount_household(&server).await;
    mount_stream(&server, 1).await;
    Mock::given(method("PUT"))
        .and(path("/hmsweb/logout"))
        .respond_with(cloud_ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server, &dir);
    engine.login().await.unwrap();
    engine.wait_until_ready(Duration::from_secs(5)).await.unwrap();

    tokio_test::assert_ok!(engine.logout().await);
    assert_eq!(engine.session_state(), SessionState::Unauthenticated);
    assert_eq!(*engine.connection_state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn remote_logout_expires_session_then_logs_in_again() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_push_login(&server, "PUSH").await;
    mount_household(&server).await;
    // Connected, then a logout pushed by another client, then one more
    // connection for the re-login before the stream is rejected.
    for body in [CONNECTED, REMOTE_LOGOUT, CONNECTED] {
        Mock::given(method("GET"))
            .and(path("/hmsweb/client/subscribe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .up_to_n_times(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/hmsweb/client/subscribe"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = config(&server, &dir, push_flow());
    config.relogin_delay = Duration::from_millis(300);
    let engine = Engine::new(config).unwrap();
    engine.login().await.unwrap();

    wait_for_session(&engine, SessionState::Expired).await;
    assert_eq!(*engine.connection_state().borrow(), ConnectionState::Disconnected);
    assert!(engine.session().session().is_none());
    assert_eq!(request_count(&server, "/hmsweb/users/session/v2").await, 1);

    wait_for_session(&engine, SessionState::Authenticated).await;
    assert_eq!(request_count(&server, "/hmsweb/users/session/v2").await, 2);

    engine.shutdown().await;
}
