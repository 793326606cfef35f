//! Request correlation: every request gets an id that shows up in its
//! admission logs, its response, and the tracing span around it.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Longest caller-supplied id that is kept as is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// The id assigned to the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// A caller id is reused only if it is short, visible ASCII; anything else
/// would end up verbatim in log lines.
fn accept_caller_id(value: &HeaderValue) -> Option<String> {
    let id = value.to_str().ok()?;
    let valid = !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic());
    valid.then(|| id.to_string())
}

/// Assigns the request id.
///
/// Keeps a well-formed incoming `X-Request-Id`, otherwise generates a UUID
/// v4. The id goes into a [`RequestId`] extension for the admission check,
/// the span covering the request, and the response headers.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(accept_caller_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), val);
    }

    response
}
