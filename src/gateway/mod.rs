//! Axum-based HTTP gateway over the session service.
//!
//! - Request body size limits (16KB max)
//! - Request timeouts from `[gateway] request_timeout_secs`
//! - `x-request-id` propagation (taken from the request or generated)
//! - Client address from `X-Real-IP`, then `X-Forwarded-For`, then the TCP peer
//! - Panics in handlers become a plain 500

use crate::auth::{Email, RequestContext, SessionError, SessionService};
use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

/// Maximum request body size (16KB). The only body is `{"email": ...}`.
pub const MAX_BODY_SIZE: usize = 16_384;
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const REAL_IP_HEADER: &str = "x-real-ip";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Longest client-supplied request id that is echoed back verbatim.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    /// Applies its own operation timeout when the request carries no deadline.
    pub sessions: SessionService,
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Build the router with all routes and middleware.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    // ── CORS: token endpoints are called from browsers ──
    let cors = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(Duration::from_secs(300));

    Router::new()
        .route("/health", get(handle_health))
        .route("/create", post(handle_create))
        .route("/tokens/{id}", get(handle_tokens))
        .route("/refresh-tokens", get(handle_refresh_tokens))
        .route("/current-user", get(handle_current_user))
        .with_state(state)
        .layer(middleware::from_fn(request_id_and_log))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Serve the gateway until Ctrl-C or SIGTERM.
pub async fn run_gateway(host: &str, port: u16, config: &Config, sessions: SessionService) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local = listener.local_addr()?;

    let state = AppState { sessions };
    let app = router(
        state,
        Duration::from_secs(config.gateway.request_timeout_secs),
    );

    tracing::info!(addr = %local, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Gateway server error")?;

    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// MIDDLEWARE
// ══════════════════════════════════════════════════════════════════════════════

/// Ensure every request carries an `x-request-id`, echo it on the response
/// and log the outcome.
async fn request_id_and_log(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(generated_request_id);
    req.headers_mut()
        .insert(REQUEST_ID_HEADER, request_id.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let mut response = next.run(req).await;

    tracing::info!(
        request_id = request_id.to_str().unwrap_or_default(),
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Request completed"
    );
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

/// Recovery for a panicking handler. The payload is logged, never returned.
fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = detail, "Handler panicked");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

fn generated_request_id() -> HeaderValue {
    // A hyphenated UUID is always a valid header value.
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

// ══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Request body for identity creation.
#[derive(Debug, Deserialize)]
struct CreateBody {
    email: String,
}

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /create: register a new identity.
async fn handle_create(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            tracing::debug!(error = %e, "Undecodable create body");
            return error_body(StatusCode::BAD_REQUEST, "Bad request");
        }
    };

    let email = match Email::parse(&body.email) {
        Ok(email) => email,
        Err(e) => return error_body(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };

    let ctx = request_context(&headers);
    match state
        .sessions
        .create_identity(&ctx, &email, &client_ip(&headers, peer))
        .await
    {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": id,
                "detail": "identity created",
            })),
        ),
        Err(e) => service_error(&e),
    }
}

/// GET /tokens/{id}: issue a token pair for an existing identity.
async fn handle_tokens(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> ApiResponse {
    let Ok(id) = Uuid::parse_str(&raw_id) else {
        return error_body(StatusCode::BAD_REQUEST, "Bad request");
    };

    let ctx = request_context(&headers);
    match state
        .sessions
        .issue_token_pair(&ctx, id, &client_ip(&headers, peer))
        .await
    {
        Ok(pair) => (StatusCode::OK, Json(serde_json::json!(pair))),
        Err(e) => service_error(&e),
    }
}

/// GET /refresh-tokens: rotate using `Authorization: Bearer <refresh>`.
async fn handle_refresh_tokens(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return error_body(StatusCode::BAD_REQUEST, "Refresh token is required");
    };

    let ctx = request_context(&headers);
    match state
        .sessions
        .refresh_token_pair(&ctx, token, &client_ip(&headers, peer))
        .await
    {
        Ok(pair) => (StatusCode::OK, Json(serde_json::json!(pair))),
        // Every failure looks the same to the caller.
        Err(_) => unauthorized(),
    }
}

/// GET /current-user: resolve `Authorization: Bearer <access>`.
async fn handle_current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return error_body(StatusCode::UNAUTHORIZED, "Access token is required");
    };

    let ctx = request_context(&headers);
    match state.sessions.resolve_identity(&ctx, token).await {
        Ok(identity) => (StatusCode::OK, Json(serde_json::json!(identity))),
        Err(_) => unauthorized(),
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(RequestContext::generate, RequestContext::new)
}

/// Best-effort client address. Proxy headers are untrusted and only feed
/// the advisory IP recorded in tokens.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    from_header(REAL_IP_HEADER)
        .or_else(|| from_header(FORWARDED_FOR_HEADER))
        .unwrap_or_else(|| peer.ip())
        .to_string()
}

fn error_body(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

fn unauthorized() -> ApiResponse {
    error_body(StatusCode::UNAUTHORIZED, "Unauthorized")
}

/// Status mapping for the endpoints that distinguish failure kinds.
fn service_error(err: &SessionError) -> ApiResponse {
    match err {
        SessionError::Validation(reason) => error_body(StatusCode::UNPROCESSABLE_ENTITY, reason),
        SessionError::DuplicateIdentity => {
            error_body(StatusCode::CONFLICT, "Identity with this email already exists")
        }
        SessionError::NotFound => error_body(StatusCode::NOT_FOUND, "Identity not found"),
        SessionError::Unauthorized => unauthorized(),
        SessionError::DeadlineExceeded { .. } => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, "Request timed out")
        }
        SessionError::Storage { .. } | SessionError::Signing { .. } => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Secret, TokenCodec, TokenPair};
    use crate::config::TokenSettings;
    use crate::db::testing::test_pool;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request as HttpRequest;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (TempDir, AppState) {
        let (tmp, pool) = test_pool();
        let settings = TokenSettings {
            issuer: "keyturn-test".into(),
            access_secret: Secret::new("gateway-access"),
            refresh_secret: Secret::new("gateway-refresh"),
            access_lifetime: Duration::from_secs(900),
            refresh_lifetime: Duration::from_secs(86_400),
        };
        let state = AppState {
            sessions: SessionService::sqlite(pool, settings, Duration::from_secs(5)),
        };
        (tmp, state)
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40_000)))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    async fn json_of(response: ApiResponse) -> (StatusCode, serde_json::Value) {
        let response = response.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn create(state: &AppState, email: &str) -> ApiResponse {
        handle_create(
            State(state.clone()),
            peer(),
            HeaderMap::new(),
            Ok(Json(CreateBody {
                email: email.into(),
            })),
        )
        .await
    }

    async fn create_and_issue(state: &AppState) -> (Uuid, TokenPair) {
        let (_, body) = json_of(create(state, "a@x.com").await).await;
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let (status, body) = json_of(
            handle_tokens(
                State(state.clone()),
                peer(),
                HeaderMap::new(),
                Path(id.to_string()),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (id, serde_json::from_value(body).unwrap())
    }

    fn test_router(state: AppState) -> Router {
        router(state, Duration::from_secs(5))
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40_000))))
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer_token(&bearer("abc")), Some("abc"));
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&basic), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&empty), None);
    }

    #[test]
    fn request_context_uses_header_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));
        let ctx = request_context(&headers);
        assert_eq!(ctx.request_id, "req-42");
        // The service applies its configured timeout.
        assert!(ctx.deadline.is_none());
    }

    #[test]
    fn client_ip_prefers_real_ip_then_forwarded_for() {
        let peer = SocketAddr::from(([10, 0, 0, 1], 40_000));

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), "10.0.0.1");

        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers, peer), "203.0.113.7");

        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers, peer), "198.51.100.4");
    }

    #[test]
    fn client_ip_ignores_unparseable_headers() {
        let peer = SocketAddr::from(([10, 0, 0, 1], 40_000));
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("not-an-ip"));
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("unknown"));
        assert_eq!(client_ip(&headers, peer), "10.0.0.1");

        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("2001:db8::1"));
        assert_eq!(client_ip(&headers, peer), "2001:db8::1");
    }

    #[test]
    fn storage_failures_hide_detail() {
        let err = SessionError::storage(
            "auth.create_identity",
            anyhow::anyhow!("disk I/O error at /var/lib/keyturn.db"),
        );
        let (status, Json(body)) = service_error(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("keyturn.db"));
    }

    #[test]
    fn deadline_maps_to_service_unavailable() {
        let err = SessionError::DeadlineExceeded {
            op: "auth.issue_token_pair",
        };
        assert_eq!(service_error(&err).0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn router_echoes_request_id() {
        let (_tmp, state) = test_state();
        let response = test_router(state)
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .header(REQUEST_ID_HEADER, "trace-me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "trace-me");
    }

    #[tokio::test]
    async fn router_generates_request_id_when_absent() {
        let (_tmp, state) = test_state();
        let response = test_router(state)
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn router_create_rejects_undecodable_body() {
        let (_tmp, state) = test_state();
        let response = test_router(state)
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/create")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn router_create_then_fetch_tokens() {
        let (_tmp, state) = test_state();
        let app = test_router(state);

        let created = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/create")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"email":" b@x.com "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let bytes = to_bytes(created.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = body["id"].as_str().unwrap().to_owned();

        let tokens = app
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/tokens/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(tokens.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = handle_health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_returns_201_then_409() {
        let (_tmp, state) = test_state();

        let (status, body) = json_of(create(&state, "a@x.com").await).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["id"].as_str().unwrap().parse::<Uuid>().is_ok());
        assert_eq!(body["detail"], "identity created");

        let (status, _) = json_of(create(&state, "a@x.com").await).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_rejects_bad_email_with_422() {
        let (_tmp, state) = test_state();
        let (status, body) = json_of(create(&state, "not-an-email").await).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn tokens_rejects_bad_uuid_and_unknown_identity() {
        let (_tmp, state) = test_state();

        let bad = handle_tokens(
            State(state.clone()),
            peer(),
            HeaderMap::new(),
            Path("not-a-uuid".into()),
        )
        .await;
        assert_eq!(bad.0, StatusCode::BAD_REQUEST);

        let unknown = handle_tokens(
            State(state),
            peer(),
            HeaderMap::new(),
            Path(Uuid::new_v4().to_string()),
        )
        .await;
        assert_eq!(unknown.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_rotates_once_then_401() {
        let (_tmp, state) = test_state();
        let (_, pair) = create_and_issue(&state).await;

        let (status, body) = json_of(
            handle_refresh_tokens(State(state.clone()), peer(), bearer(&pair.refresh_token)).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access_token"].is_string());
        assert!(body["refresh_token"].is_string());

        let replay =
            handle_refresh_tokens(State(state), peer(), bearer(&pair.refresh_token)).await;
        assert_eq!(replay.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_without_header_is_400() {
        let (_tmp, state) = test_state();
        let response = handle_refresh_tokens(State(state), peer(), HeaderMap::new()).await;
        assert_eq!(response.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn current_user_round_trip() {
        let (_tmp, state) = test_state();
        let (id, pair) = create_and_issue(&state).await;

        let (status, body) =
            json_of(handle_current_user(State(state), bearer(&pair.access_token)).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.to_string());
        assert_eq!(body["email"], "a@x.com");
    }

    #[tokio::test]
    async fn current_user_failures_are_all_401() {
        let (_tmp, state) = test_state();
        let (_, pair) = create_and_issue(&state).await;

        let missing = handle_current_user(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(missing.0, StatusCode::UNAUTHORIZED);

        let garbage = handle_current_user(State(state.clone()), bearer("garbage")).await;
        assert_eq!(garbage.0, StatusCode::UNAUTHORIZED);

        // Refresh token presented where an access token is expected.
        let (status, body) =
            json_of(handle_current_user(State(state), bearer(&pair.refresh_token)).await).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn forwarded_address_lands_in_issued_tokens() {
        let (_tmp, state) = test_state();
        let (id, _) = create_and_issue(&state).await;

        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("198.51.100.4"));
        let (status, body) = json_of(
            handle_tokens(State(state), peer(), headers, Path(id.to_string())).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let claims = TokenCodec::new("keyturn-test")
            .verify(
                body["refresh_token"].as_str().unwrap(),
                &Secret::new("gateway-refresh"),
            )
            .unwrap();
        assert_eq!(claims.ip_address, "198.51.100.4");
    }

    #[tokio::test]
    async fn current_user_for_unknown_identity_is_401() {
        let (_tmp, state) = test_state();
        let token = TokenCodec::new("keyturn-test")
            .issue(
                Uuid::new_v4(),
                "10.0.0.1",
                1,
                &Secret::new("gateway-access"),
                Duration::from_secs(60),
            )
            .unwrap();

        let (status, body) =
            json_of(handle_current_user(State(state), bearer(&token)).await).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({ "error": "Unauthorized" }));
    }

    #[tokio::test]
    async fn refresh_for_unknown_identity_is_401() {
        let (_tmp, state) = test_state();
        let token = TokenCodec::new("keyturn-test")
            .issue(
                Uuid::new_v4(),
                "10.0.0.1",
                1,
                &Secret::new("gateway-refresh"),
                Duration::from_secs(60),
            )
            .unwrap();

        let (status, body) =
            json_of(handle_refresh_tokens(State(state), peer(), bearer(&token)).await).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({ "error": "Unauthorized" }));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        async fn exploding() -> StatusCode {
            panic!("handler exploded")
        }

        let app: Router = Router::new()
            .route("/boom", get(exploding))
            .layer(CatchPanicLayer::custom(handle_panic));

        let response = app
            .oneshot(HttpRequest::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("exploded"));
    }
}
