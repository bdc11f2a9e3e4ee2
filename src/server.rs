//!
//! agrigate HTTP server
//! --------------------
//! Axum-based HTTP API serving the gated aggregate-statistics endpoints.
//!
//! Responsibilities:
//! - Compose a per-route `Policy` and run every request through the
//!   `RequestAuthorizer`; verdicts are translated here, never inside the
//!   authorizer (the legacy direct-response shape lives in `deny_response`).
//! - Operator login/logout backed by an `AuthProvider` collaborator.
//! - Dashboard statistics behind the `DashboardSource` collaborator trait;
//!   the SQL aggregation itself is out of scope for this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::audit::{AuditSink, TracingAudit};
use crate::auth::{
    constant_time_eq, Decision, Policy, Principal, ReasonCode, RequestAuthorizer, RequestMeta,
    SessionStore, HDR_API_TIMESTAMP, HDR_API_TOKEN, HDR_APP_TIMESTAMP, HDR_APP_TOKEN,
    HDR_SESSION_TOKEN,
};
use crate::clock::Clock;
use crate::config::ConfigStore;
use crate::error::AppError;

/// Aggregate-statistics collaborator. The real implementation runs SQL
/// aggregations; this crate only consumes the result shapes.
pub trait DashboardSource: Send + Sync {
    fn overview(&self) -> serde_json::Value;
    fn field_summary(&self) -> serde_json::Value;
    fn activity(&self) -> serde_json::Value;
}

/// Fixed demo figures for local runs and tests.
pub struct StaticDashboard;

impl DashboardSource for StaticDashboard {
    fn overview(&self) -> serde_json::Value {
        json!({"fields": 12, "active_sensors": 48, "open_alerts": 3})
    }

    fn field_summary(&self) -> serde_json::Value {
        json!([
            {"field": "north-paddock", "crop": "barley", "hectares": 42.5},
            {"field": "river-flat", "crop": "lucerne", "hectares": 18.0}
        ])
    }

    fn activity(&self) -> serde_json::Value {
        json!({"irrigation_events_7d": 31, "harvest_jobs_7d": 2})
    }
}

/// Operator credential check. Full identity-provider concerns (hashing,
/// rotation, MFA) are out of scope; implementations only answer whether the
/// pair names a known operator.
pub trait AuthProvider: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Option<Principal>;
}

/// Config-backed operator credentials. Login is disabled entirely unless
/// `ADMIN_PASSWORD` is provisioned; comparisons are constant-time.
pub struct ConfigAuthProvider {
    config: Arc<ConfigStore>,
}

impl ConfigAuthProvider {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }
}

impl AuthProvider for ConfigAuthProvider {
    fn login(&self, username: &str, password: &str) -> Option<Principal> {
        let cfg = self.config.load();
        if !cfg.has("ADMIN_PASSWORD") {
            return None;
        }
        let user_ok = constant_time_eq(username, cfg.get("ADMIN_USER", "admin"));
        let pass_ok = constant_time_eq(password, cfg.get("ADMIN_PASSWORD", ""));
        if user_ok && pass_ok {
            Some(Principal::new(
                cfg.get("ADMIN_USER", "admin"),
                cfg.get("ADMIN_NAME", "Operator"),
                cfg.get("ADMIN_EMAIL", ""),
            ))
        } else {
            None
        }
    }
}

/// Shared server state injected into all handlers. Everything is explicit
/// and constructed at startup; no ambient global lookup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub sessions: SessionStore,
    pub authorizer: Arc<RequestAuthorizer>,
    pub dashboard: Arc<dyn DashboardSource>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigStore>,
        dashboard: Arc<dyn DashboardSource>,
        auth: Arc<dyn AuthProvider>,
        clock: Clock,
    ) -> Self {
        let sessions = SessionStore::new(clock.clone());
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAudit);
        let authorizer = Arc::new(RequestAuthorizer::new(
            config.clone(),
            sessions.clone(),
            audit,
            clock,
        ));
        Self { config, sessions, authorizer, dashboard, auth }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Extract the authorizer's view of this request from the header map.
pub fn request_meta(method: &str, path: &str, headers: &HeaderMap) -> RequestMeta {
    let mut forwarded = Vec::new();
    for name in ["x-forwarded-for", "x-real-ip"] {
        if let Some(v) = header_str(headers, name) {
            forwarded.push((name.to_string(), v));
        }
    }
    RequestMeta {
        method: method.to_string(),
        path: path.to_string(),
        user_agent: header_str(headers, "user-agent").unwrap_or_default(),
        app_token: header_str(headers, HDR_APP_TOKEN),
        app_timestamp: header_str(headers, HDR_APP_TIMESTAMP),
        session_token: header_str(headers, HDR_SESSION_TOKEN),
        api_token: header_str(headers, HDR_API_TOKEN),
        api_timestamp: header_str(headers, HDR_API_TIMESTAMP),
        forwarded,
        remote_addr: None,
    }
}

/// Legacy direct-response deny shape. `code` is a stable enumerated string
/// that downstream clients branch on.
pub fn deny_response(reason: ReasonCode) -> Response {
    let status =
        StatusCode::from_u16(reason.http_status()).unwrap_or(StatusCode::FORBIDDEN);
    let body = json!({
        "success": false,
        "error": reason.message(),
        "code": reason.as_str(),
        "timestamp": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    });
    (status, Json(body)).into_response()
}

fn gate(state: &AppState, policy: Policy, meta: &RequestMeta) -> Result<Decision, Response> {
    let decision = state.authorizer.authorize(policy, meta);
    if decision.allowed {
        Ok(decision)
    } else {
        Err(deny_response(decision.reason))
    }
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginPayload>,
) -> Response {
    let meta = request_meta("POST", "/login", &headers);
    if let Err(resp) = gate(&state, Policy::app_token(), &meta) {
        return resp;
    }
    match state.auth.login(&payload.username, &payload.password) {
        Some(principal) => {
            // Always a fresh identifier at privilege change, against fixation.
            let token = match meta.session_token.as_deref() {
                Some(t) => state.sessions.regenerate(t),
                None => state.sessions.start(None),
            };
            state.sessions.set_principal(&token, &principal);
            info!(target: "auth", operator = %principal.id, "login ok");
            Json(json!({"success": true, "session_token": token})).into_response()
        }
        None => {
            let e = AppError::auth("invalid_credentials", "invalid username or password");
            (
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
                Json(json!({"success": false, "error": e.message(), "code": e.code_str()})),
            )
                .into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = header_str(&headers, HDR_SESSION_TOKEN) {
        state.sessions.logout(&token);
    }
    Json(json!({"success": true})).into_response()
}

async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = header_str(&headers, HDR_SESSION_TOKEN) else {
        return deny_response(ReasonCode::Unauthorized);
    };
    match state.sessions.validate_token(&token) {
        Ok(principal) => Json(json!({"success": true, "principal": principal})).into_response(),
        Err(_) => deny_response(ReasonCode::Unauthorized),
    }
}

async fn stats_overview(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let meta = request_meta("GET", "/api/stats/overview", &headers);
    if let Err(resp) = gate(&state, Policy::app_token(), &meta) {
        return resp;
    }
    Json(json!({"success": true, "data": state.dashboard.overview()})).into_response()
}

async fn stats_fields(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let meta = request_meta("GET", "/api/stats/fields", &headers);
    if let Err(resp) = gate(&state, Policy::app_token(), &meta) {
        return resp;
    }
    Json(json!({"success": true, "data": state.dashboard.field_summary()})).into_response()
}

async fn stats_activity(State(state): State<AppState>, headers: HeaderMap) -> Response {
    // Strict: no development bypass for activity data.
    let meta = request_meta("GET", "/api/stats/activity", &headers);
    if let Err(resp) = gate(&state, Policy::full().strict(), &meta) {
        return resp;
    }
    Json(json!({"success": true, "data": state.dashboard.activity()})).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "agrigate ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/whoami", get(whoami))
        .route("/api/stats/overview", get(stats_overview))
        .route("/api/stats/fields", get(stats_fields))
        .route("/api/stats/activity", get(stats_activity))
        .with_state(state)
}

/// Start the agrigate HTTP server with the default collaborators.
pub async fn run_with_port(http_port: u16, config_path: &str) -> anyhow::Result<()> {
    let config = Arc::new(ConfigStore::new(config_path));
    {
        let cfg = config.load();
        info!(
            target: "startup",
            env = ?cfg.environment,
            domain = %cfg.domain,
            "configuration loaded"
        );
    }
    let auth: Arc<dyn AuthProvider> = Arc::new(ConfigAuthProvider::new(config.clone()));
    let state = AppState::new(config, Arc::new(StaticDashboard), auth, Clock::System);

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience entry point using the default port and config location.
pub async fn run() -> anyhow::Result<()> {
    run_with_port(7878, "agrigate.conf").await
}
