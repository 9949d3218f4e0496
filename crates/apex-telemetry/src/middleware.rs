//! axum integration: every request runs as its own unit of work.
//!
//! ```rust,ignore
//! let pipeline = Arc::new(Pipeline::collector(config)?);
//! let app = Router::new()
//!     .route("/api/users", get(list_users))
//!     .layer(axum::middleware::from_fn_with_state(pipeline, apex_telemetry::middleware::collect));
//! ```

use crate::lifecycle::Pipeline;
use apex_core::http::{HttpRequest, HttpResponse};
use axum::body::{to_bytes, Body, Bytes, HttpBody};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Bodies above this size, or of unknown length, stream through uncaptured
pub const MAX_BUFFERED_BODY: u64 = 1024 * 1024;

/// Opens a unit before the handler runs, runs the rest of the stack inside
/// it, then captures the response and ships the unit.
pub async fn collect(
    State(pipeline): State<Arc<Pipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let (body, fields) = match buffer(body).await {
        Ok(bytes) => {
            let fields = parse_fields(&parts.headers, &bytes);
            (Body::from(bytes), fields)
        }
        Err(body) => (body, Map::new()),
    };

    let mut captured = HttpRequest::from_parts(&parts).with_body(fields);
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        captured = captured.with_peer_addr(addr.ip());
    }

    let unit = pipeline.before_dispatch(&captured);
    let response = unit.scope(next.run(Request::from_parts(parts, body))).await;

    let (parts, body) = response.into_parts();
    let mut observed = HttpResponse::from_parts(&parts);
    let body = match buffer(body).await {
        Ok(bytes) => {
            observed = observed.with_body(String::from_utf8_lossy(&bytes));
            Body::from(bytes)
        }
        Err(body) => body,
    };

    pipeline
        .after_dispatch(&unit, Some(&captured), Some(&observed))
        .await;
    Response::from_parts(parts, body)
}

/// Collect a body of known, bounded length; anything else is handed back
async fn buffer(body: Body) -> Result<Bytes, Body> {
    match body.size_hint().exact() {
        Some(len) if len <= MAX_BUFFERED_BODY => match to_bytes(body, len as usize).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                debug!(error = %e, "Failed to buffer body");
                Ok(Bytes::new())
            }
        },
        _ => Err(body),
    }
}

/// JSON objects and url-encoded forms become body fields
fn parse_fields(headers: &HeaderMap, bytes: &[u8]) -> Map<String, Value> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        match serde_json::from_slice(bytes) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(bytes)
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect()
    } else {
        Map::new()
    }
}
