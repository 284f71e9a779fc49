#![cfg(all(feature = "axum", feature = "client"))]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http_body_util::BodyExt;
use secrecy::ExposeSecret;
use serde_json::json;
use time::OffsetDateTime;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shopify_token_exchange::middleware::{CurrentSession, X_REQUESTED_WITH, protect};
use shopify_token_exchange::{
    ExchangeConfig, ExchangeError, ExchangeRequest, MemorySessionStore, Session, SessionConfig,
    SessionOrchestrator, SessionSettings, SessionStore, TenantId, TokenExchange,
};

const APP_HOST: &str = "https://app.example.com";

#[derive(Clone, Default)]
struct CountingExchange {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl TokenExchange for CountingExchange {
    async fn exchange(&self, request: &ExchangeRequest) -> Result<Session, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExchangeError::Http {
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(Session::offline(request.tenant.clone(), "off_exchanged"))
    }
}

async fn orders(session: CurrentSession) -> String {
    format!(
        "{} {}",
        session.tenant(),
        session.access_token.expose_secret()
    )
}

async fn public(session: Option<CurrentSession>) -> String {
    match session {
        Some(s) => s.tenant().to_string(),
        None => "anonymous".into(),
    }
}

fn app<S: SessionStore>(orchestrator: SessionOrchestrator<S, CountingExchange>) -> Router {
    protect(Router::new().route("/orders", get(orders)), orchestrator)
        .merge(Router::new().route("/public", get(public)).route("/leak", get(orders)))
}

fn settings() -> SessionSettings {
    SessionSettings::new(APP_HOST.parse().unwrap())
}

fn identity_token() -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = json!({
        "iss": "https://shop-1.example/admin",
        "dest": "https://shop-1.example",
        "aud": "api-key",
        "sub": "42",
        "exp": now + 60,
        "nbf": now - 5,
    });
    format!(
        "{}.{}.c2lnbmF0dXJl",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
    )
}

fn get_request(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

fn authorized(uri: &str) -> Request<Body> {
    get_request(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", identity_token()))
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn xhr_without_token_gets_retry_header() {
    let exchange = CountingExchange::default();
    let orchestrator = SessionOrchestrator::new(MemorySessionStore::new(), exchange.clone(), settings());

    let response = app(orchestrator)
        .oneshot(
            get_request("/orders")
                .header(X_REQUESTED_WITH, "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()["X-Shopify-Retry-Invalid-Session-Request"],
        "1"
    );
    assert_eq!(
        body_string(response).await,
        r#"{"errors":[{"message":"unauthorized"}]}"#
    );
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn navigation_without_token_is_redirected() {
    let orchestrator =
        SessionOrchestrator::new(MemorySessionStore::new(), CountingExchange::default(), settings());

    let response = app(orchestrator)
        .oneshot(get_request("/orders?page=2").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://app.example.com/patch_session_token?page=2\
         &shopify-reload=https%3A%2F%2Fapp.example.com%2Forders%3Fpage%3D2"
    );
}

#[tokio::test]
async fn invalid_token_is_bounced() {
    let orchestrator =
        SessionOrchestrator::new(MemorySessionStore::new(), CountingExchange::default(), settings());

    let response = app(orchestrator)
        .oneshot(
            get_request("/orders")
                .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
                .header(X_REQUESTED_WITH, "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stored_session_reaches_handler_without_exchange() {
    let store = MemorySessionStore::new();
    store
        .store(&Session::offline(TenantId("shop-1.example".into()), "off_stored"))
        .await
        .unwrap();
    let exchange = CountingExchange::default();
    let orchestrator = SessionOrchestrator::new(store, exchange.clone(), settings());

    let response = app(orchestrator).oneshot(authorized("/orders")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "shop-1.example off_stored");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn new_session_is_exchanged_and_stored() {
    let exchange = CountingExchange::default();
    let orchestrator =
        SessionOrchestrator::new(MemorySessionStore::new(), exchange.clone(), settings());
    let app = app(orchestrator.clone());

    let response = app.clone().oneshot(authorized("/orders")).await.unwrap();
    assert_eq!(body_string(response).await, "shop-1.example off_exchanged");

    let response = app.oneshot(authorized("/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.store().len().await, 1);
}

#[tokio::test]
async fn fatal_exchange_error_is_internal_error() {
    let exchange = CountingExchange {
        fail: true,
        ..Default::default()
    };
    let orchestrator = SessionOrchestrator::new(MemorySessionStore::new(), exchange, settings());

    let response = app(orchestrator.clone()).oneshot(authorized("/orders")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(orchestrator.store().is_empty().await);
}

#[tokio::test]
async fn unprotected_routes_have_no_session() {
    let orchestrator =
        SessionOrchestrator::new(MemorySessionStore::new(), CountingExchange::default(), settings());
    let app = app(orchestrator);

    let response = app.clone().oneshot(authorized("/public")).await.unwrap();
    assert_eq!(body_string(response).await, "anonymous");

    let response = app.oneshot(authorized("/leak")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_exchange_client_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "client_id": "api-key",
            "requested_token_type": "urn:shopify:params:oauth:token-type:offline-access-token",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "off_live",
            "scope": "read_orders",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let exchange = ExchangeConfig::new("api-key", "api-secret")
        .with_endpoint(server.uri().parse().unwrap());
    let config = SessionConfig::new(exchange, APP_HOST.parse().unwrap());
    let orchestrator = SessionOrchestrator::from_config(config, MemorySessionStore::new());
    let app = protect(Router::new().route("/orders", get(orders)), orchestrator);

    let response = app.oneshot(authorized("/orders")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "shop-1.example off_live");
}
