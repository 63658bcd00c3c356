use axum::{
    Extension, Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    middleware,
    routing::get,
};
use entitlement_gate::{
    app::{AppState, build_router, require_entitlement},
    error::DenialReason,
    gate::EntitlementAccessController,
    models::{AuthorizationRequest, AuthorizedIdentity},
    registry::{ControllerOptions, ControllerRegistry},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const PEM: &str = "-----BEGIN CERTIFICATE-----MIIB-----END CERTIFICATE-----";
const MANIFEST: &str = "/v2/foo/bar/manifests/latest";

async fn verification_service(status: u16, body: Value) -> MockServer {
    let service = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&service)
        .await;
    service
}

fn controller_for(service: &MockServer) -> EntitlementAccessController {
    let options: ControllerOptions = [
        ("realm".to_string(), serde_yaml::Value::from("registry")),
        (
            "servicePath".to_string(),
            serde_yaml::Value::from(service.uri()),
        ),
    ]
    .into_iter()
    .collect();
    EntitlementAccessController::from_options(&options).expect("controller")
}

fn app_for(controller: EntitlementAccessController, trust_proxy: bool) -> Router {
    build_router(AppState {
        controller: Arc::new(controller),
        trust_proxy,
    })
}

fn registry_request(method: Method, uri: &str, cert: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cert) = cert {
        builder = builder.header("SSL_CLIENT_CERT", cert);
    }
    builder.body(Body::empty()).expect("request")
}

async fn send(app: &Router, req: Request<Body>) -> axum::http::Response<Body> {
    app.clone().oneshot(req).await.expect("response")
}

async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

async fn verify_calls(service: &MockServer) -> Vec<Value> {
    service
        .received_requests()
        .await
        .expect("received requests")
        .iter()
        .filter(|request| request.url.path() == "/verify")
        .map(|request| serde_json::from_slice(&request.body).expect("json payload"))
        .collect()
}

#[tokio::test]
async fn verified_certificate_is_authenticated_with_library_path() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let app = app_for(controller_for(&service), false);

    let resp = send(&app, registry_request(Method::GET, MANIFEST, Some(PEM))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("x-entitlement-identity")
            .and_then(|value| value.to_str().ok()),
        Some("entitled")
    );
    assert_eq!(body_json(resp).await, json!({"name": "entitled"}));

    let calls = verify_calls(&service).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["data"]["pem_data"], PEM);
    assert_eq!(
        calls[0]["data"]["path"],
        "/content/dist/rhel/server/7/7Server/x86_64/containers/registry/foo/"
    );
}

#[tokio::test]
async fn missing_certificate_is_challenged_without_outbound_call() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let app = app_for(controller_for(&service), false);

    for (method, uri) in [(Method::GET, MANIFEST), (Method::GET, "/v2/"), (Method::PUT, MANIFEST)] {
        let resp = send(&app, registry_request(method, uri, None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok()),
            Some("Entitlement realm=\"registry\"")
        );
        assert_eq!(
            body_json(resp).await,
            json!({"error": "Authentication Failure"})
        );
    }
    assert!(verify_calls(&service).await.is_empty());
}

#[tokio::test]
async fn ping_and_bypass_methods_skip_verification() {
    let service = verification_service(200, json!({"verified": "false"})).await;
    let app = app_for(controller_for(&service), false);

    for (method, uri) in [
        (Method::GET, "/v2/"),
        (Method::HEAD, MANIFEST),
        (Method::PUT, MANIFEST),
        (Method::POST, "/v2/foo/bar/blobs/uploads/"),
        (Method::PATCH, "/v2/foo/bar/blobs/uploads/abc"),
    ] {
        let resp = send(&app, registry_request(method.clone(), uri, Some(PEM))).await;
        assert_eq!(resp.status(), StatusCode::OK, "{method} {uri}");
        assert_eq!(
            resp.headers()
                .get("x-entitlement-identity")
                .and_then(|value| value.to_str().ok()),
            Some("entitled-ping")
        );
    }
    assert!(verify_calls(&service).await.is_empty());
}

#[tokio::test]
async fn unresolvable_path_is_challenged_without_outbound_call() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let app = app_for(controller_for(&service), false);

    for uri in ["/v2/_catalog", "/v2/foo/bar", "/v2/?check=1"] {
        let resp = send(&app, registry_request(Method::GET, uri, Some(PEM))).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
    assert!(verify_calls(&service).await.is_empty());
}

#[tokio::test]
async fn unverified_certificate_is_challenged() {
    let service = verification_service(200, json!({"verified": "false"})).await;
    let controller = controller_for(&service);

    let req = AuthorizationRequest::new("GET", MANIFEST).with_credential(PEM);
    let challenge = controller.authorize(&req).await.expect_err("denied");
    assert!(matches!(challenge.reason(), DenialReason::NotVerified));
    assert_eq!(verify_calls(&service).await.len(), 1);
}

#[tokio::test]
async fn service_error_is_challenged_with_generic_message() {
    let service = verification_service(500, json!({"error": "db down"})).await;
    let app = app_for(controller_for(&service), false);

    let resp = send(&app, registry_request(Method::GET, MANIFEST, Some(PEM))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body, json!({"error": "Authentication Failure"}));
    let rendered = body.to_string();
    assert!(!rendered.contains("500"));
    assert!(!rendered.contains("db down"));
}

#[tokio::test]
async fn unreachable_service_is_challenged() {
    let options: ControllerOptions = [
        ("realm".to_string(), serde_yaml::Value::from("registry")),
        (
            "servicePath".to_string(),
            serde_yaml::Value::from("http://127.0.0.1:9"),
        ),
    ]
    .into_iter()
    .collect();
    let controller = EntitlementAccessController::from_options(&options).expect("controller");

    let req = AuthorizationRequest::new("GET", MANIFEST).with_credential(PEM);
    let challenge = controller.authorize(&req).await.expect_err("denied");
    assert!(matches!(
        challenge.reason(),
        DenialReason::VerificationFailed(_)
    ));
    assert_eq!(challenge.to_string(), "Authentication Failure");
}

#[tokio::test]
async fn repeated_requests_reach_the_service_every_time() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let controller = controller_for(&service);

    let req = AuthorizationRequest::new("GET", MANIFEST).with_credential(PEM);
    let first = controller.authorize(&req).await.expect("first");
    let second = controller.authorize(&req).await.expect("second");
    assert_eq!(first, second);
    assert_eq!(first, AuthorizedIdentity::entitled());
    assert_eq!(verify_calls(&service).await.len(), 2);
}

#[tokio::test]
async fn host_deadline_cancels_outbound_call() {
    let service = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"verified": "true"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&service)
        .await;
    let controller = controller_for(&service);

    let req = AuthorizationRequest::new("GET", MANIFEST).with_credential(PEM);
    let started = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_millis(200), controller.authorize(&req)).await;
    let elapsed = started.elapsed();
    assert!(outcome.is_err());
    assert!(
        elapsed < Duration::from_secs(2),
        "deadline not honoured: {elapsed:?}"
    );

    // The request was in flight when the deadline dropped it.
    assert_eq!(verify_calls(&service).await.len(), 1);
}

#[tokio::test]
async fn dropped_authorization_never_reports_a_result() {
    let service = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"verified": "true"}))
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&service)
        .await;
    let controller = Arc::new(controller_for(&service));

    let (tx, rx) = std::sync::mpsc::channel();
    let task = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let req = AuthorizationRequest::new("GET", MANIFEST).with_credential(PEM);
            let outcome = controller.authorize(&req).await;
            let _ = tx.send(outcome.is_ok());
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    task.abort();
    assert!(task.await.expect_err("aborted").is_cancelled());

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(verify_calls(&service).await.len(), 1);
}

#[tokio::test]
async fn forwarded_target_is_used_when_proxy_is_trusted() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let app = app_for(controller_for(&service), true);

    let req = Request::builder()
        .method(Method::GET)
        .uri("/auth")
        .header("SSL_CLIENT_CERT", PEM)
        .header("x-forwarded-method", "GET")
        .header("x-forwarded-uri", "/v2/acme/tools/cli/tags/list")
        .body(Body::empty())
        .expect("request");
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let calls = verify_calls(&service).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0]["data"]["path"],
        "/content/dist/rhel/server/7/7Server/x86_64/containers/registry/acme/tools/"
    );
}

#[tokio::test]
async fn middleware_guards_host_router() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let registry = ControllerRegistry::with_builtin();
    let options: ControllerOptions = [
        ("realm".to_string(), serde_yaml::Value::from("registry")),
        (
            "servicePath".to_string(),
            serde_yaml::Value::from(service.uri()),
        ),
    ]
    .into_iter()
    .collect();
    let state = AppState {
        controller: registry.create("entitlement", &options).expect("controller"),
        trust_proxy: false,
    };

    async fn manifest(Extension(identity): Extension<AuthorizedIdentity>) -> String {
        format!("served to {}", identity.name)
    }

    let app = Router::new()
        .route("/v2/{*rest}", get(manifest))
        .layer(middleware::from_fn_with_state(state, require_entitlement));

    let resp = send(&app, registry_request(Method::GET, MANIFEST, Some(PEM))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    assert_eq!(&bytes[..], b"served to entitled");

    let resp = send(&app, registry_request(Method::GET, MANIFEST, None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn middleware_uses_repository_from_route_params() {
    let service = verification_service(200, json!({"verified": "true"})).await;
    let state = AppState {
        controller: Arc::new(controller_for(&service)),
        trust_proxy: false,
    };

    async fn referrers(Extension(identity): Extension<AuthorizedIdentity>) -> String {
        identity.name
    }

    let app = Router::new()
        .route("/v2/{ns}/{repo}/referrers/{digest}", get(referrers))
        .route_layer(middleware::from_fn_with_state(state, require_entitlement));

    let resp = send(
        &app,
        registry_request(Method::GET, "/v2/foo/bar/referrers/sha256:abc", Some(PEM)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let calls = verify_calls(&service).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0]["data"]["path"],
        "/content/dist/rhel/server/7/7Server/x86_64/containers/registry/foo/"
    );
}
