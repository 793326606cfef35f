//! Admission middleware: charges every request against its quota tiers.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pitstop_admission::{AdmissionError, QuotaSnapshot, RequestIdentity};

use super::request_id::RequestId;
use crate::error::ApiError;
use crate::state::AppState;

pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub static X_RATELIMIT_RESOURCE: HeaderName = HeaderName::from_static("x-ratelimit-resource");
static X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Identity established by an upstream authentication step.
///
/// Token verification happens before admission; it inserts this extension
/// when the caller is a known user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Extracts the client IP from the request.
///
/// `X-Forwarded-For` is only honored when the server sits behind a proxy
/// that sets it; otherwise any client could pick its own address.
pub fn extract_ip(req: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for
        && let Some(xff) = req.headers().get(&X_FORWARDED_FOR)
        && let Ok(s) = xff.to_str()
        && let Some(first) = s.split(',').next()
        && let Ok(ip) = first.trim().parse::<IpAddr>()
    {
        return Some(ip);
    }

    // Fallback to ConnectInfo (direct connection)
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Collects the identity signals of `req`.
pub fn request_identity(req: &Request, trust_forwarded_for: bool) -> RequestIdentity {
    let headers = req.headers();
    RequestIdentity {
        path: req.uri().path().to_string(),
        method: req.method().to_string(),
        address: extract_ip(req, trust_forwarded_for),
        user_id: req
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|u| u.0.clone()),
        api_key: header_str(headers, &X_API_KEY),
        user_agent: header_str(headers, &header::USER_AGENT),
        request_id: req.extensions().get::<RequestId>().map(|r| r.0.clone()),
    }
}

/// Writes the four rate-limit headers for `quota`.
pub fn set_quota_headers(headers: &mut HeaderMap, quota: &QuotaSnapshot) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(quota.limit));
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(quota.remaining),
    );
    headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(quota.reset));
    headers.insert(
        X_RATELIMIT_RESOURCE.clone(),
        HeaderValue::from_static(quota.label),
    );
}

/// Admission middleware.
///
/// Admitted requests run the inner service and get the quota headers of the
/// last evaluated tier. Rejected ones get 429 with the violated tier's
/// headers; missing identity gives 400 and store failures give 500.
pub async fn admission_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let identity = request_identity(&req, state.trust_forwarded_for());
    let cancel = state.shutdown().child_token();

    match state.admit(&identity, &cancel).await {
        Ok(admission) => {
            let mut response = next.run(req).await;
            if let Some(quota) = &admission.quota {
                set_quota_headers(response.headers_mut(), quota);
            }
            response
        }
        Err(AdmissionError::QuotaExceeded(quota)) => {
            let mut response = ApiError::TooManyRequests.into_response();
            set_quota_headers(response.headers_mut(), &quota);
            response
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    fn request(xff: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/api/v1/posts?page=2");
        if let Some(v) = xff {
            builder = builder.header("x-forwarded-for", v);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 5555))));
        req
    }

    #[test]
    fn forwarded_for_ignored_unless_trusted() {
        let req = request(Some("203.0.113.7, 10.0.0.1"));
        assert_eq!(extract_ip(&req, false), Some("10.0.0.9".parse().unwrap()));
        assert_eq!(extract_ip(&req, true), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn unparsable_forwarded_for_falls_back() {
        let req = request(Some("unknown"));
        assert_eq!(extract_ip(&req, true), Some("10.0.0.9".parse().unwrap()));
    }

    #[test]
    fn identity_reads_extension_and_headers() {
        let mut req = http::Request::builder()
            .method("POST")
            .uri("/api/v1/questions")
            .header("x-api-key", "k-1")
            .header("user-agent", "pitstop-ios/2.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(AuthenticatedUser("u-42".to_string()));
        req.extensions_mut().insert(RequestId("abc".to_string()));

        let identity = request_identity(&req, false);
        assert_eq!(identity.path, "/api/v1/questions");
        assert_eq!(identity.method, "POST");
        assert_eq!(identity.address, None);
        assert_eq!(identity.user_id.as_deref(), Some("u-42"));
        assert_eq!(identity.api_key.as_deref(), Some("k-1"));
        assert_eq!(identity.user_agent.as_deref(), Some("pitstop-ios/2.1"));
        assert_eq!(identity.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn quota_headers_written() {
        let mut headers = HeaderMap::new();
        set_quota_headers(
            &mut headers,
            &QuotaSnapshot {
                limit: 500,
                remaining: 499,
                reset: 1_792_170_000,
                label: "authenticated rate limit by user",
            },
        );
        assert_eq!(headers["x-ratelimit-limit"], "500");
        assert_eq!(headers["x-ratelimit-remaining"], "499");
        assert_eq!(headers["x-ratelimit-reset"], "1792170000");
        assert_eq!(
            headers["x-ratelimit-resource"],
            "authenticated rate limit by user"
        );
    }
}
