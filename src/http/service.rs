//! Rate-limited request handling.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing::{debug, instrument, warn};

use super::metrics::{self, DECISIONS_TOTAL};
use crate::config::{FailurePolicy, LimitsConfig};
use crate::error::{Result, TollgateError};
use crate::ratelimit::{Limit, RateLimiterBackend, Verdict};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Identity used when a request carries neither the identity header nor a
/// peer address.
const ANONYMOUS: &str = "anonymous";

/// Shared state for the HTTP handlers.
pub struct AppState<R: RateLimiterBackend> {
    /// The rate limiter instance
    pub limiter: Arc<R>,
    pub limits: LimitsConfig,
}

impl<R: RateLimiterBackend> AppState<R> {
    pub fn new(limiter: Arc<R>, limits: LimitsConfig) -> Self {
        Self { limiter, limits }
    }
}

impl<R: RateLimiterBackend> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            limits: self.limits.clone(),
        }
    }
}

/// Build the router: `/metrics`, `/health`, and every other path behind the
/// rate limiter.
pub fn router<R: RateLimiterBackend + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .fallback(limited_handler::<R>)
        .with_state(state)
}

/// Caller identity: the configured header if present, else the peer IP.
fn identity_of(request: &Request, header: &str) -> String {
    if let Some(value) = request
        .headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return value.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

fn with_limit_headers(mut response: Response, verdict: &Verdict) -> Response {
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(verdict.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(verdict.remaining()));
    response
}

fn serve(path: &str) -> Response {
    metrics::record_request(path);
    (StatusCode::OK, "OK\n").into_response()
}

/// Check `identity`, re-arming the window once if it opened without expiry.
///
/// The request is still decided on the count it was given. Only a failed
/// repair reaches the failure policy.
async fn check_with_repair<R: RateLimiterBackend>(
    limiter: &R,
    identity: &str,
    limits: &LimitsConfig,
) -> Result<Verdict> {
    match limiter
        .check(identity, limits.requests_per_window, limits.window_secs)
        .await
    {
        Err(TollgateError::PartialFailure { key, count, reason }) => {
            warn!(key = %key, count, reason = %reason, "Re-arming rate limit window");
            limiter.repair_expiry(identity, limits.window_secs).await?;
            let limit = Limit::new(limits.requests_per_window)?;
            Ok(Verdict {
                decision: limit.decide(count),
                count,
                limit: limit.get(),
                opened_window: count == 1,
            })
        }
        other => other,
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn limited_handler<R: RateLimiterBackend + 'static>(
    State(state): State<AppState<R>>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();
    let identity = identity_of(&request, &state.limits.identity_header);
    let limits = &state.limits;

    match check_with_repair(state.limiter.as_ref(), &identity, limits).await {
        Ok(verdict) => {
            DECISIONS_TOTAL
                .with_label_values(&[verdict.decision.as_str()])
                .inc();
            if verdict.decision.is_admit() {
                with_limit_headers(serve(&path), &verdict)
            } else {
                debug!(identity = %identity, count = verdict.count, "Request rate limited");
                let response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests\n").into_response();
                with_limit_headers(response, &verdict)
            }
        }
        Err(e) => {
            DECISIONS_TOTAL.with_label_values(&["error"]).inc();
            match limits.failure_policy {
                FailurePolicy::Open => {
                    warn!(identity = %identity, error = %e, "Rate limit unknown, failing open");
                    serve(&path)
                }
                FailurePolicy::Closed => {
                    warn!(identity = %identity, error = %e, "Rate limit unknown, failing closed");
                    (StatusCode::SERVICE_UNAVAILABLE, "Rate limit status unknown\n").into_response()
                }
            }
        }
    }
}

async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
