//! End-to-end tests of the HTTP surface
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot` against
//! the dummy driver, whose consoles emit `"0\n"`, `"1\n"`, ... so a test can
//! tell exactly which part of a console stream a viewer saw.

use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gateway::driver::{ConsoleDriver, DummyDriver};
use gateway::{AdminGate, AppState, Gateway, MemoryNodeStore};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

const ADMIN_SECRET: &str = "correct-horse";
const WAIT: Duration = Duration::from_secs(5);

const NODE_BODY: &str = r#"{"type":"ipmi","info":{"addr":"10.0.0.3","user":"ipmiuser","pass":"secret"}}"#;

fn app() -> Router {
    app_with(ConsoleDriver::Dummy(DummyDriver::new(Duration::from_millis(5))))
}

fn app_with(driver: ConsoleDriver) -> Router {
    let gateway = Arc::new(Gateway::new(
        Arc::new(MemoryNodeStore::new()),
        driver,
        256,
        Arc::new(None),
    ));
    gateway::router(AppState::new(
        gateway,
        AdminGate::new(ADMIN_SECRET),
        Arc::new(None),
    ))
}

fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

fn admin_request(method: &str, uri: &str, auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn put_node(app: &Router, id: &str) {
    let auth = basic("admin", ADMIN_SECRET);
    let (status, _) = send(
        app,
        admin_request("PUT", &format!("/node/{}", id), Some(&auth), NODE_BODY),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn issue_token(app: &Router, id: &str) -> String {
    let auth = basic("admin", ADMIN_SECRET);
    let (status, body) = send(
        app,
        admin_request(
            "POST",
            &format!("/node/{}/console-endpoints", id),
            Some(&auth),
            "",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["token"].as_str().unwrap().to_string()
}

async fn revoke(app: &Router, id: &str) -> StatusCode {
    let auth = basic("admin", ADMIN_SECRET);
    send(
        app,
        admin_request("DELETE", &format!("/node/{}/token", id), Some(&auth), ""),
    )
    .await
    .0
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Reads a console body line by line
struct ConsoleReader {
    body: Body,
    buf: Vec<u8>,
}

impl ConsoleReader {
    async fn open(app: &Router, id: &str, token: &str) -> Self {
        let response = get(app, &format!("/node/{}/console?token={}", id, token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        Self {
            body: response.into_body(),
            buf: Vec::new(),
        }
    }

    /// Index of the next console line, `None` once the stream has ended
    async fn next_line(&mut self) -> Option<u64> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8(line).unwrap();
                return Some(line.trim().parse().unwrap());
            }
            match timeout(WAIT, self.body.frame()).await.unwrap() {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                _ => return None,
            }
        }
    }
}

#[tokio::test]
async fn admin_requests_without_credentials_are_hidden() {
    let app = app();

    let requests = [
        ("PUT", "/node/n1", NODE_BODY),
        ("POST", "/node/n1/console-endpoints", ""),
        ("DELETE", "/node/n1/token", ""),
        ("DELETE", "/node/n1", ""),
    ];

    for (method, uri, body) in requests {
        let (status, _) = send(&app, admin_request(method, uri, None, body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
    }

    // Nothing was created by the refused PUT
    put_node(&app, "other").await;
    let auth = basic("admin", ADMIN_SECRET);
    let (status, _) = send(
        &app,
        admin_request("POST", "/node/n1/console-endpoints", Some(&auth), ""),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_credentials_look_like_missing_nodes() {
    let app = app();
    put_node(&app, "n1").await;

    let wrong = [
        basic("admin", "wrong"),
        basic("root", ADMIN_SECRET),
        "Bearer wrong".to_string(),
        "Digest abc".to_string(),
    ];

    let (_, missing_body) = send(
        &app,
        admin_request(
            "POST",
            "/node/absent/console-endpoints",
            Some(&basic("admin", ADMIN_SECRET)),
            "",
        ),
    )
    .await;

    for auth in &wrong {
        let (status, body) = send(
            &app,
            admin_request("POST", "/node/n1/console-endpoints", Some(auth), ""),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, missing_body);
    }

    let bearer = format!("Bearer {}", ADMIN_SECRET);
    let (status, _) = send(
        &app,
        admin_request("POST", "/node/n1/console-endpoints", Some(&bearer), ""),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_lifecycle_with_credentials() {
    let app = app();
    let auth = basic("admin", ADMIN_SECRET);

    let steps = [
        ("PUT", "/node/n1", NODE_BODY, StatusCode::OK),
        ("POST", "/node/n1/console-endpoints", "", StatusCode::OK),
        ("DELETE", "/node/n1", "", StatusCode::OK),
        ("POST", "/node/n1/console-endpoints", "", StatusCode::NOT_FOUND),
    ];

    for (method, uri, body, expected) in steps {
        let (status, _) = send(&app, admin_request(method, uri, Some(&auth), body)).await;
        assert_eq!(status, expected, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn invalid_descriptor_is_rejected_only_after_auth() {
    let app = app();
    let bad = r#"{"type":"ipmi","info":{"host":"","user":"u","pass":"p"}}"#;

    let (status, _) = send(&app, admin_request("PUT", "/node/n1", None, bad)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let auth = basic("admin", ADMIN_SECRET);
    let (status, _) = send(&app, admin_request("PUT", "/node/n1", Some(&auth), bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        admin_request("PUT", "/node/n1", Some(&auth), r#"{"type":"redfish"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tokens_are_distinct_and_bound_to_their_node() {
    let app = app();
    put_node(&app, "a").await;
    put_node(&app, "b").await;

    let t1 = issue_token(&app, "a").await;
    let t2 = issue_token(&app, "a").await;
    assert_ne!(t1, t2);
    assert_eq!(t1.len(), 32);

    issue_token(&app, "b").await;
    let response = get(&app, &format!("/node/b/console?token={}", t1)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn console_requires_valid_token() {
    let app = app();
    put_node(&app, "n1").await;
    issue_token(&app, "n1").await;

    for uri in [
        "/node/n1/console",
        "/node/n1/console?token=",
        "/node/n1/console?token=not-hex",
        "/node/n1/console?token=00000000000000000000000000000000",
        "/node/absent/console?token=00000000000000000000000000000000",
    ] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn console_continues_across_token_churn() {
    let app = app();
    put_node(&app, "n1").await;

    let t1 = issue_token(&app, "n1").await;
    let mut v1 = ConsoleReader::open(&app, "n1", &t1).await;

    let first = v1.next_line().await.unwrap();
    let mut last = first;
    for _ in 0..5 {
        let next = v1.next_line().await.unwrap();
        assert_eq!(next, last + 1);
        last = next;
    }

    assert_eq!(revoke(&app, "n1").await, StatusCode::OK);
    assert!(v1.next_line().await.is_none());

    let response = get(&app, &format!("/node/n1/console?token={}", t1)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let t2 = issue_token(&app, "n1").await;
    let mut v2 = ConsoleReader::open(&app, "n1", &t2).await;
    let resumed = v2.next_line().await.unwrap();
    assert!(resumed > last, "{} should follow {}", resumed, last);
    assert_eq!(v2.next_line().await.unwrap(), resumed + 1);
}

#[tokio::test]
async fn revoke_ends_every_viewer_of_the_node() {
    let app = app();
    put_node(&app, "n1").await;
    put_node(&app, "n2").await;

    let t1 = issue_token(&app, "n1").await;
    let t2 = issue_token(&app, "n1").await;
    let other = issue_token(&app, "n2").await;

    let mut a = ConsoleReader::open(&app, "n1", &t1).await;
    let mut b = ConsoleReader::open(&app, "n1", &t2).await;
    let mut c = ConsoleReader::open(&app, "n2", &other).await;
    a.next_line().await.unwrap();
    b.next_line().await.unwrap();
    c.next_line().await.unwrap();

    assert_eq!(revoke(&app, "n1").await, StatusCode::OK);
    assert!(a.next_line().await.is_none());
    assert!(b.next_line().await.is_none());
    assert!(c.next_line().await.is_some());
}

#[tokio::test]
async fn revoke_on_unknown_node_is_not_found() {
    let app = app();
    assert_eq!(revoke(&app, "absent").await, StatusCode::NOT_FOUND);

    put_node(&app, "n1").await;
    assert_eq!(revoke(&app, "n1").await, StatusCode::OK);
}

#[tokio::test]
async fn active_token_attaches_repeatedly() {
    let app = app();
    put_node(&app, "n1").await;
    let token = issue_token(&app, "n1").await;

    let mut first = ConsoleReader::open(&app, "n1", &token).await;
    let line = first.next_line().await.unwrap();
    drop(first);

    let mut second = ConsoleReader::open(&app, "n1", &token).await;
    let mut third = ConsoleReader::open(&app, "n1", &token).await;
    assert!(second.next_line().await.unwrap() > line);
    assert!(third.next_line().await.unwrap() > line);
}

#[tokio::test]
async fn viewers_see_the_same_lines() {
    let app = app();
    put_node(&app, "n1").await;
    let token = issue_token(&app, "n1").await;

    let mut a = ConsoleReader::open(&app, "n1", &token).await;
    let mut b = ConsoleReader::open(&app, "n1", &token).await;

    let mut seen_a: Vec<u64> = Vec::new();
    let mut seen_b: Vec<u64> = Vec::new();
    for _ in 0..10 {
        seen_a.push(a.next_line().await.unwrap());
        seen_b.push(b.next_line().await.unwrap());
    }

    // b attached after a, so its stream is a contiguous tail of a's
    let offset = (seen_b[0] - seen_a[0]) as usize;
    for i in 0..10usize.saturating_sub(offset) {
        assert_eq!(seen_a[i + offset], seen_b[i]);
    }
    assert!(seen_b.windows(2).all(|w| w[1] == w[0] + 1));
}

#[tokio::test]
async fn deleting_a_node_cascades() {
    let app = app();
    put_node(&app, "n1").await;
    let token = issue_token(&app, "n1").await;
    let mut viewer = ConsoleReader::open(&app, "n1", &token).await;
    viewer.next_line().await.unwrap();

    let auth = basic("admin", ADMIN_SECRET);
    let (status, _) = send(&app, admin_request("DELETE", "/node/n1", Some(&auth), "")).await;
    assert_eq!(status, StatusCode::OK);

    assert!(viewer.next_line().await.is_none());
    let response = get(&app, &format!("/node/n1/console?token={}", token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        admin_request("POST", "/node/n1/console-endpoints", Some(&auth), ""),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, admin_request("DELETE", "/node/n1", Some(&auth), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn replacing_a_node_ends_its_viewers() {
    let app = app();
    put_node(&app, "n1").await;
    let token = issue_token(&app, "n1").await;
    let mut viewer = ConsoleReader::open(&app, "n1", &token).await;
    viewer.next_line().await.unwrap();

    // Same descriptor: nothing changes
    put_node(&app, "n1").await;
    assert!(viewer.next_line().await.is_some());

    let auth = basic("admin", ADMIN_SECRET);
    let moved = r#"{"type":"ipmi","info":{"host":"10.0.0.99","user":"ipmiuser","pass":"secret"}}"#;
    let (status, body) = send(&app, admin_request("PUT", "/node/n1", Some(&auth), moved)).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "replaced");

    assert!(viewer.next_line().await.is_none());
    let response = get(&app, &format!("/node/n1/console?token={}", token)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn power_endpoints_use_console_tokens() {
    let app = app();
    put_node(&app, "n1").await;
    let token = issue_token(&app, "n1").await;

    let post = |uri: String, body: &'static str| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    };

    let (status, _) = send(&app, post(format!("/node/n1/power_off?token={}", token), "")).await;
    assert_eq!(status, StatusCode::OK);

    let response = get(&app, &format!("/node/n1/power_status?token={}", token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["power_status"], "off");

    let (status, _) = send(
        &app,
        post(
            format!("/node/n1/power_cycle?token={}", token),
            r#"{"force":true}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = get(&app, &format!("/node/n1/power_status?token={}", token)).await;
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["power_status"], "on");

    assert_eq!(revoke(&app, "n1").await, StatusCode::OK);
    let (status, _) = send(&app, post(format!("/node/n1/power_off?token={}", token), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, post("/node/n1/power_off".to_string(), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let app = app();

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&app, "/no/such/route").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_bodies_do_not_bypass_hiding() {
    let app = app();
    put_node(&app, "n1").await;
    let huge = "x".repeat(3 * 1024 * 1024);

    let (status, body) = send(&app, admin_request("PUT", "/node/n1", None, &huge)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"404 page not found");

    let wrong = basic("admin", "wrong");
    let (status, _) = send(&app, admin_request("PUT", "/node/n1", Some(&wrong), &huge)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        admin_request(
            "POST",
            "/node/n1/power_cycle?token=00000000000000000000000000000000",
            None,
            &huge,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Only an authorized caller learns the body was too large
    let auth = basic("admin", ADMIN_SECRET);
    let (status, _) = send(&app, admin_request("PUT", "/node/n1", Some(&auth), &huge)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_methods_on_known_paths_are_hidden() {
    let app = app();
    put_node(&app, "n1").await;

    let requests = [
        ("GET", "/node/n1"),
        ("POST", "/node/n1"),
        ("GET", "/node/n1/console-endpoints"),
        ("PUT", "/node/n1/token"),
        ("POST", "/node/n1/console"),
        ("GET", "/node/n1/power_off"),
        ("DELETE", "/health"),
    ];

    for (method, uri) in requests {
        let (status, body) = send(&app, admin_request(method, uri, None, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body, b"404 page not found", "{} {}", method, uri);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn unreachable_backend_fails_the_attach_only() {
    use gateway::driver::IpmitoolDriver;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("ipmitool");
    let app = app_with(ConsoleDriver::Ipmitool(IpmitoolDriver::new(program.clone())));

    put_node(&app, "n1").await;
    let token = issue_token(&app, "n1").await;
    let uri = format!("/node/n1/console?token={}", token);

    let response = get(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // The console was left unattached, so the next attach opens the backend again
    std::fs::write(&program, "#!/bin/sh\necho 0\necho 1\nsleep 5\n").unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut viewer = ConsoleReader::open(&app, "n1", &token).await;
    assert_eq!(viewer.next_line().await, Some(0));
    assert_eq!(viewer.next_line().await, Some(1));
}
