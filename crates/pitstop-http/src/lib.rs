//! Pitstop HTTP - axum transport adapter for Pitstop admission control.
//!
//! Provides:
//! - Admission middleware (quota headers, 429/400/500 mapping)
//! - Request-ID middleware
//! - System endpoints (health, metrics) and the quota status endpoint
//! - OpenAPI/Swagger UI
//!
//! The business API itself is supplied by the caller as a `Router` and is
//! wrapped by the same middleware stack.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use error::ErrorBody;
use middleware::admission::{
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, X_RATELIMIT_RESOURCE,
};

pub use middleware::admission::AuthenticatedUser;
pub use state::AppState;

// ---------------------------------------------------------------------------
// OpenAPI
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pitstop API",
        description = "Admission control for the Pitstop API.\n\nEvery response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset` and `X-RateLimit-Resource` for the quota tier evaluated last. Quotas reset at the top of every UTC hour.",
        version = "0.3.0",
        license(name = "Apache-2.0"),
    ),
    paths(
        routes::system::health,
        routes::quota::rate_limit_status,
    ),
    components(
        schemas(
            types::HealthResponse, types::RateLimitStatusResponse,
            pitstop_admission::TierUsage, ErrorBody,
        )
    ),
    tags(
        (name = "Rate Limit", description = "Quota usage of the calling identity"),
        (name = "System", description = "System and health endpoints"),
    )
)]
struct ApiDoc;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the HTTP router around the business routes in `api`.
///
/// Every route, including `api`'s and the docs, passes admission. An
/// upstream authentication layer that inserts [`AuthenticatedUser`] must
/// be added outside of this router.
pub fn router(state: AppState, api: Router<AppState>) -> Router {
    let app = Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics_endpoint))
        .route("/api/v1/rate-limit", get(routes::quota::rate_limit_status))
        .merge(api)
        .merge(SwaggerUi::new("/api/v1/docs").url("/api/v1/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    app.layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::admission::admission_middleware,
    ))
    .layer(axum::middleware::from_fn(
        middleware::request_id::request_id_middleware,
    ))
    .layer(cors_layer(&state))
    .with_state(state)
}

/// Serve the HTTP router on the given listener with graceful shutdown.
///
/// Wraps `axum::serve` with `ConnectInfo<SocketAddr>` so admission and
/// logging can extract client addresses.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = state.cors_origins();

    // No origins configured → no CORS headers (deny cross-origin by default).
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let x_request_id = HeaderName::from_static("x-request-id");
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            x_request_id.clone(),
        ])
        .expose_headers([
            x_request_id,
            X_RATELIMIT_LIMIT.clone(),
            X_RATELIMIT_REMAINING.clone(),
            X_RATELIMIT_RESET.clone(),
            X_RATELIMIT_RESOURCE.clone(),
        ]);

    if origins.len() == 1 && origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard origin, all cross-origin requests allowed");
        base.allow_origin(tower_http::cors::Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        base.allow_origin(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pitstop_admission::{AdmissionConfig, AdmissionController, MemoryCounterStore};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app(cors: Vec<String>) -> Router {
        let controller = AdmissionController::with_system_clock(
            AdmissionConfig::default(),
            Arc::new(MemoryCounterStore::new()),
        )
        .unwrap();
        let state = AppState::new(controller, cors, true, CancellationToken::new());
        router(state, Router::new())
    }

    #[tokio::test]
    async fn request_without_address_is_bad_request() {
        // `oneshot` has no ConnectInfo and no X-Forwarded-For.
        let resp = app(vec![])
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn cors_exposes_rate_limit_headers() {
        let resp = app(vec!["https://pitstop.example".to_string()])
            .oneshot(
                Request::get("/health")
                    .header("origin", "https://pitstop.example")
                    .header("x-forwarded-for", "203.0.113.7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let exposed = resp.headers()["access-control-expose-headers"]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(exposed.contains("x-ratelimit-remaining"));
        assert!(exposed.contains("x-ratelimit-resource"));
        assert_eq!(resp.headers()["x-ratelimit-remaining"], "9999");
    }
}
