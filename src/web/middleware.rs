//! Request tracing.
//!
//! Each request runs inside a span tagged with a fresh ULID, and the same id
//! is echoed back as `X-Request-Id` so a client report can be matched to its
//! log lines. The completion log level tracks the response class: server
//! errors are warnings, client errors informational, everything else debug.

use crate::utils::fmt_duration;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{Instrument, debug, info, warn};

pub(super) async fn trace_request(request: Request, next: Next) -> Response {
    let id = ulid::Ulid::new().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let span = tracing::info_span!("request", id = %id);
    let start = Instant::now();

    async move {
        let mut response = next.run(request).await;

        let status = response.status();
        let elapsed = fmt_duration(start.elapsed());
        if status.is_server_error() {
            warn!(%method, path, status = status.as_u16(), elapsed, "request served");
        } else if status.is_client_error() {
            info!(%method, path, status = status.as_u16(), elapsed, "request served");
        } else {
            debug!(%method, path, status = status.as_u16(), elapsed, "request served");
        }

        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
    .instrument(span)
    .await
}
