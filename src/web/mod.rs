//! HTTP router and handlers: the thin plumbing around the page caches.

pub mod middleware;

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::{Router, routing::get};
use serde_json::{Value, json};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing::error;

/// Upper bound on one request, including any time spent waiting on a
/// coalesced upstream fetch.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/_/logs", get(dump_logs))
        .route("/_/{origin}/stats", get(origin_stats))
        .route("/{origin}/search/{q}", get(search_front_page))
        .route("/{origin}/search/{q}/{n}", get(search_page))
        .with_state(state)
        .layer((
            axum::middleware::from_fn(middleware::trace_request),
            TimeoutLayer::new(REQUEST_TIMEOUT),
        ))
}

/// Liveness probe.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /{origin}/search/{q}`: first page of results.
async fn search_front_page(
    State(state): State<AppState>,
    Path((origin, q)): Path<(String, String)>,
) -> Response {
    serve_page(&state, &origin, &q, 0).await
}

/// `GET /{origin}/search/{q}/{n}`: page `n` of results.
async fn search_page(
    State(state): State<AppState>,
    Path((origin, q, n)): Path<(String, String, u32)>,
) -> Response {
    serve_page(&state, &origin, &q, n).await
}

async fn serve_page(state: &AppState, origin: &str, query: &str, index: u32) -> Response {
    let Some(cache) = state.origin(origin) else {
        return (StatusCode::NOT_FOUND, "unknown origin").into_response();
    };
    if query.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let page = match cache.get(query, index).await {
        Ok(page) => page,
        Err(e) => {
            error!(origin, query, index, error = ?e, "cache lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = page.body.into_response();
    let headers = response.headers_mut();
    if page.cached {
        headers.insert("x-from-cache", HeaderValue::from_static("1"));
    }
    if let Ok(until) = HeaderValue::from_str(&page.expire.to_rfc3339()) {
        headers.insert("x-cached-until", until);
    }
    response
}

/// `GET /_/{origin}/stats`: JSON counter snapshot for one origin.
async fn origin_stats(
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Response {
    let Some(cache) = state.origin(&origin) else {
        return (StatusCode::NOT_FOUND, "unknown origin").into_response();
    };
    match cache.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!(origin, error = ?e, "stats snapshot failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /_/logs`: dump the in-memory log ring as plain text.
async fn dump_logs(State(state): State<AppState>) -> Response {
    let mut response = state.logs.contents().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
