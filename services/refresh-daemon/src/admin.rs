//! Admin API for the refresh service
//!
//! Operator endpoints for inspecting accounts and steering auto-refresh.
//! Bind it to a private interface; there is no authentication.
//!
//! Endpoints:
//! - GET  /health                 liveness plus pool size
//! - GET  /metrics                Prometheus text exposition
//! - GET  /accounts               accounts with effective status, no secrets
//! - PUT  /accounts/{id}          edit credentials (adds unknown ids), unfreezes
//! - DELETE /accounts/{id}        remove an account
//! - POST /accounts/{id}/refresh  refresh one account now (`?mode=full|token`)
//! - GET  /auto-refresh           settings and scheduler state
//! - PUT  /auto-refresh           partial settings update
//! - POST /auto-refresh/trigger   run a cycle now and return its report

use std::sync::Arc;

use account_pool::config::{validate_concurrency, validate_interval, validate_max_batch_size};
use account_pool::{
    Account, AccountStatus, CredentialsEdit, CycleOutcome, Error, RefreshMode, RefreshService,
    Subscription, Usage,
};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    service: Arc<RefreshService>,
    prometheus: PrometheusHandle,
}

impl AdminState {
    pub fn new(service: Arc<RefreshService>, prometheus: PrometheusHandle) -> Self {
        Self {
            service,
            prometheus,
        }
    }
}

/// Build the admin router. `max_connections` bounds concurrent requests.
pub fn build_admin_router(state: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/accounts", get(list_accounts))
        .route("/accounts/{id}", put(edit_account).delete(remove_account))
        .route("/accounts/{id}/refresh", post(refresh_account))
        .route("/auto-refresh", get(auto_refresh_status).put(update_auto_refresh))
        .route("/auto-refresh/trigger", post(trigger_cycle))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Id for correlating an operator action with the log lines it produced.
fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map a pool error onto an HTTP status with a JSON error body.
fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::RefreshInProgress(_) => StatusCode::CONFLICT,
        Error::MissingCredentials(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::RefreshFailed { .. } => StatusCode::BAD_GATEWAY,
        Error::InvalidSetting(_) => StatusCode::BAD_REQUEST,
        Error::Store(_) | Error::Settings(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut body = serde_json::json!({ "error": err.to_string() });
    if let Error::RefreshFailed { status, .. } = err {
        body["status"] = serde_json::json!(status);
    }
    json_response(status, body)
}

/// Account as shown to operators. Tokens and client secrets never leave
/// the store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountView {
    id: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    last_used_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    subscription: Subscription,
    usage: Usage,
}

impl AccountView {
    fn new(account: Account, now_ms: i64) -> Self {
        let status = account.effective_status(now_ms);
        Self {
            id: account.id,
            email: account.email,
            user_id: account.user_id,
            status,
            last_error: account.last_error,
            last_used_at: account.last_used_at,
            expires_at: account.credentials.expires_at,
            region: account.credentials.region,
            subscription: account.subscription,
            usage: account.usage,
        }
    }
}

/// GET /health: 200 while the account store is readable, 503 otherwise.
async fn health(State(state): State<AdminState>) -> Response {
    let scheduler_running = state.service.status().running;
    match state.service.list_accounts().await {
        Ok(accounts) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "accounts_total": accounts.len(),
                "scheduler_running": scheduler_running,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check could not read the account store");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "degraded",
                    "error": e.to_string(),
                    "scheduler_running": scheduler_running,
                }),
            )
        }
    }
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// GET /accounts
async fn list_accounts(State(state): State<AdminState>) -> Response {
    let accounts = match state.service.list_accounts().await {
        Ok(accounts) => accounts,
        Err(e) => return error_response(&e),
    };
    let now = state.service.now_ms();
    let views: Vec<AccountView> = accounts
        .into_iter()
        .map(|a| AccountView::new(a, now))
        .collect();
    json_response(StatusCode::OK, serde_json::json!({ "accounts": views }))
}

/// Body for PUT /accounts/{id}. Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountEdit {
    email: Option<String>,
    #[serde(default)]
    credentials: CredentialsEdit,
}

/// PUT /accounts/{id}: merge credentials and reactivate a frozen account.
async fn edit_account(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    axum::Json(edit): axum::Json<AccountEdit>,
) -> Response {
    let request_id = new_request_id();
    let response = match state
        .service
        .edit_account(&id, edit.email, edit.credentials)
        .await
    {
        Ok(account) => {
            info!(request_id = %request_id, account_id = %id, status = account.status.label(), "account edited");
            let now = state.service.now_ms();
            json_response(StatusCode::OK, serde_json::json!(AccountView::new(account, now)))
        }
        Err(e) => {
            warn!(request_id = %request_id, account_id = %id, error = %e, "account edit failed");
            error_response(&e)
        }
    };
    with_request_id(response, &request_id)
}

/// DELETE /accounts/{id}
async fn remove_account(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let request_id = new_request_id();
    let response = match state.service.remove_account(&id).await {
        Ok(_) => {
            info!(request_id = %request_id, account_id = %id, "account removed");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "id": id, "removed": true }),
            )
        }
        Err(e) => {
            warn!(request_id = %request_id, account_id = %id, error = %e, "account removal failed");
            error_response(&e)
        }
    };
    with_request_id(response, &request_id)
}

#[derive(Debug, Deserialize)]
struct RefreshQuery {
    mode: Option<RefreshMode>,
}

/// POST /accounts/{id}/refresh: bypasses eligibility and frozen status.
async fn refresh_account(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Response {
    let request_id = new_request_id();
    let response = match state.service.refresh_account(&id, query.mode).await {
        Ok(patch) => {
            let status = patch.status.unwrap_or(AccountStatus::Active);
            info!(request_id = %request_id, account_id = %id, status = status.label(), "manual refresh succeeded");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "id": id, "status": status }),
            )
        }
        Err(e) => {
            warn!(request_id = %request_id, account_id = %id, error = %e, "manual refresh failed");
            error_response(&e)
        }
    };
    with_request_id(response, &request_id)
}

/// GET /auto-refresh
async fn auto_refresh_status(State(state): State<AdminState>) -> Response {
    json_response(StatusCode::OK, serde_json::json!(state.service.status()))
}

/// Body for PUT /auto-refresh. Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AutoRefreshUpdate {
    enabled: Option<bool>,
    interval: Option<f64>,
    sync_info: Option<bool>,
    max_batch_size: Option<u32>,
    concurrency: Option<u32>,
}

impl AutoRefreshUpdate {
    /// Check every supplied field before anything is applied.
    fn validate(&self) -> account_pool::Result<()> {
        if let Some(minutes) = self.interval {
            validate_interval(minutes)?;
        }
        if let Some(size) = self.max_batch_size {
            validate_max_batch_size(size)?;
        }
        if let Some(count) = self.concurrency {
            validate_concurrency(count)?;
        }
        Ok(())
    }

    async fn apply(&self, service: &RefreshService) -> account_pool::Result<()> {
        if let Some(sync_info) = self.sync_info {
            service.set_sync_info(sync_info).await?;
        }
        if let Some(size) = self.max_batch_size {
            service.set_max_batch_size(size).await?;
        }
        if let Some(count) = self.concurrency {
            service.set_concurrency(count).await?;
        }
        // Last, so a (re)started scheduler sees the other new values.
        if self.enabled.is_some() || self.interval.is_some() {
            let enabled = self.enabled.unwrap_or(service.config().enabled);
            service.set_auto_refresh(enabled, self.interval).await?;
        }
        Ok(())
    }
}

/// PUT /auto-refresh: 400 when any supplied value is out of range, in
/// which case nothing changes.
async fn update_auto_refresh(
    State(state): State<AdminState>,
    axum::Json(update): axum::Json<AutoRefreshUpdate>,
) -> Response {
    if let Err(e) = update.validate() {
        return error_response(&e);
    }
    if let Err(e) = update.apply(&state.service).await {
        return error_response(&e);
    }
    json_response(StatusCode::OK, serde_json::json!(state.service.status()))
}

/// POST /auto-refresh/trigger: waits for the cycle to finish.
async fn trigger_cycle(State(state): State<AdminState>) -> Response {
    let request_id = new_request_id();
    info!(request_id = %request_id, "refresh cycle triggered via admin API");
    let response = match state.service.trigger_cycle().await {
        Ok(outcome) => {
            let mut body = serde_json::json!(outcome);
            if matches!(outcome, CycleOutcome::Skipped) {
                body["skipped"] = serde_json::Value::Bool(true);
            }
            json_response(StatusCode::OK, body)
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "triggered refresh cycle failed");
            error_response(&e)
        }
    };
    with_request_id(response, &request_id)
}
