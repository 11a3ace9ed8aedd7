//! Admin HTTP surface.
//!
//! Authentication happens upstream; the auth layer forwards the operator
//! identity in `x-operator-id` and the tenant in `x-tenant-id`. Every route
//! except `/health` passes through the per-key, per-route rate limiter.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::core::{
    Admission, AdmissionReason, AppResult, PerformanceReport, PressureLevel, PriorityScheduler,
    QueueStats, RateLimiter, SchedulerError, SubmitRequest,
};
use crate::runtime::control::{
    ConfigUpdateRequest, ConfigUpdateResponse, ControlPlane, ControlResponse,
    MemoryControlRequest, MemoryControlResponse, MemoryOverview, QueueControlRequest,
};

/// Header carrying the authenticated operator identity.
pub const OPERATOR_HEADER: &str = "x-operator-id";
/// Header carrying the tenant on whose behalf a request is made.
pub const TENANT_HEADER: &str = "x-tenant-id";

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Error body returned by every failing route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// What went wrong.
    pub message: String,
    /// Always `false`.
    pub success: bool,
    /// Machine-readable admission reason, for denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AdmissionReason>,
}

/// Health summary served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` under memory pressure.
    pub status: String,
    /// Current memory classification, if it could be sampled.
    pub memory_level: Option<PressureLevel>,
    /// Queues throttled by the memory monitor.
    pub throttled_queues: Vec<String>,
    /// Number of configured queues.
    pub queues: usize,
}

/// Error converted into an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// A scheduler error.
    Scheduler(SchedulerError),
    /// The body did not parse into the expected record.
    BadRequest(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self::Scheduler(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

fn error_response(status: StatusCode, message: String, reason: Option<AdmissionReason>) -> Response {
    (
        status,
        Json(ErrorBody {
            message,
            success: false,
            reason,
        }),
    )
        .into_response()
}

fn set_rate_headers(headers: &mut HeaderMap, remaining: u32, reset_at_ms: u64) {
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_REMAINING),
        HeaderValue::from(remaining),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_RESET),
        HeaderValue::from(reset_at_ms.div_ceil(1_000)),
    );
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::BadRequest(message) => {
                return error_response(StatusCode::BAD_REQUEST, message, None);
            }
            Self::Scheduler(err) => err,
        };
        let message = err.to_string();
        match err {
            SchedulerError::AdmissionDenied(reason @ AdmissionReason::RateLimited { reset_at_ms }) => {
                let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, message, Some(reason));
                let headers = response.headers_mut();
                headers.insert(
                    RETRY_AFTER,
                    HeaderValue::from(PriorityScheduler::retry_after_secs(reset_at_ms)),
                );
                set_rate_headers(headers, 0, reset_at_ms);
                response
            }
            SchedulerError::AdmissionDenied(reason) => {
                error_response(StatusCode::CONFLICT, message, Some(reason))
            }
            SchedulerError::UnknownQueue(_) | SchedulerError::UnknownJob(_) => {
                error_response(StatusCode::NOT_FOUND, message, None)
            }
            SchedulerError::InvalidConfig(_) => error_response(StatusCode::BAD_REQUEST, message, None),
            SchedulerError::Backend(_) => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, message, None)
            }
            _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, message, None),
        }
    }
}

fn operator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Rate-limit every request by caller key and `METHOD path` route.
///
/// The key is the tenant header, else the operator header, else
/// `anonymous`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let key = headers
        .get(TENANT_HEADER)
        .or_else(|| headers.get(OPERATOR_HEADER))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    let route = format!("{} {}", request.method(), request.uri().path());

    let decision = limiter.check_rate_limit(&key, &route);
    if !decision.allowed {
        warn!(%key, %route, reset_at_ms = decision.reset_time_ms, "request rate limited");
        return ApiError::from(SchedulerError::AdmissionDenied(AdmissionReason::RateLimited {
            reset_at_ms: decision.reset_time_ms,
        }))
        .into_response();
    }

    let mut response = next.run(request).await;
    set_rate_headers(response.headers_mut(), decision.remaining, decision.reset_time_ms);
    response
}

async fn list_queues(State(control): State<ControlPlane>) -> Json<Vec<QueueStats>> {
    Json(control.queue_stats())
}

async fn queue_control(
    State(control): State<ControlPlane>,
    headers: HeaderMap,
    payload: Result<Json<QueueControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(control.queue_control(&request, operator(&headers))?))
}

async fn get_config(State(control): State<ControlPlane>) -> Json<BTreeMap<String, QueueConfig>> {
    Json(control.queue_configs())
}

async fn put_config(
    State(control): State<ControlPlane>,
    headers: HeaderMap,
    payload: Result<Json<ConfigUpdateRequest>, JsonRejection>,
) -> Result<Json<ConfigUpdateResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(control.update_config(&request, operator(&headers))?))
}

async fn performance(State(control): State<ControlPlane>) -> Json<PerformanceReport> {
    Json(control.performance())
}

async fn memory_overview(
    State(control): State<ControlPlane>,
) -> Result<Json<MemoryOverview>, ApiError> {
    Ok(Json(control.memory_overview()?))
}

async fn memory_control(
    State(control): State<ControlPlane>,
    headers: HeaderMap,
    payload: Result<Json<MemoryControlRequest>, JsonRejection>,
) -> Result<Json<MemoryControlResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(control.memory_control(&request, operator(&headers))?))
}

async fn submit_job(
    State(control): State<ControlPlane>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Admission>), ApiError> {
    let Json(request) = payload?;
    let admission = control.context().scheduler.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(admission)))
}

async fn health(State(control): State<ControlPlane>) -> Json<HealthResponse> {
    let ctx = control.context();
    let memory_level = ctx.memory.get_memory_stats().ok().map(|s| s.level);
    let throttled_queues = ctx.memory.throttled_queues();
    let degraded = memory_level == Some(PressureLevel::Critical) || !throttled_queues.is_empty();
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        memory_level,
        throttled_queues,
        queues: ctx.queues.queue_names().len(),
    })
}

/// Build the admin router.
pub fn router(control: ControlPlane) -> Router {
    let limiter = Arc::clone(&control.context().limiter);
    let limited = Router::new()
        .route("/queues", get(list_queues))
        .route("/queues/control", post(queue_control))
        .route("/queues/config", get(get_config).put(put_config))
        .route("/queues/performance", get(performance))
        .route("/memory", get(memory_overview).post(memory_control))
        .route("/jobs", post(submit_job))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(limited)
        .with_state(control)
}

/// Serve the admin API on `addr` until the listener fails.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(control: ControlPlane, addr: &str) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin API on {addr}"))?;
    info!(addr, "admin API listening");
    axum::serve(listener, router(control))
        .await
        .context("admin API server failed")?;
    Ok(())
}
